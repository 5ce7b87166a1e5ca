//! Probe illumination of object patches.
//!
//! The nearplane tile is detector sized. The probe occupies the central
//! `[pad, end)` window of the tile; the margins carry the raw object patch
//! so that content near the edge of the footprint still reaches the detector.

use ndarray::{s, Array3, Array4, Array5, ArrayView3, ArrayView4, ArrayView5};
use num_complex::Complex64;

use super::patch::Patch;

/// Diffraction (illumination) operator.
#[derive(Debug, Clone, Copy)]
pub struct Diffraction {
    pub probe_shape: usize,
    pub detector_shape: usize,
    /// First pixel of the probe window inside the detector tile.
    pub pad: usize,
    /// One past the last pixel of the probe window.
    pub end: usize,
    tile: Patch,
    footprint: Patch,
}

impl Diffraction {
    pub fn new(probe_shape: usize, detector_shape: usize) -> Self {
        assert!(
            probe_shape <= detector_shape,
            "probe ({}) must fit on the detector ({})",
            probe_shape,
            detector_shape
        );
        let pad = (detector_shape - probe_shape) / 2;
        Self {
            probe_shape,
            detector_shape,
            pad,
            end: pad + probe_shape,
            tile: Patch::new(detector_shape, pad as f64),
            footprint: Patch::new(probe_shape, 0.0),
        }
    }

    /// Object content under each probe footprint, `(ntheta, nscan, P, P)`.
    pub fn patches(&self, psi: ArrayView3<'_, Complex64>, scan: ArrayView3<'_, f64>) -> Array4<Complex64> {
        self.footprint.fwd(psi, scan)
    }

    /// Adjoint of [`Diffraction::patches`].
    pub fn patches_adj(
        &self,
        patches: ArrayView4<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        psi_shape: (usize, usize),
    ) -> Array3<Complex64> {
        self.footprint.adj(patches, scan, psi_shape)
    }

    /// Illuminated nearplane tiles `(ntheta, nscan, nmodes, D, D)`.
    ///
    /// `probe` is `(ntheta, nscan, nmodes, P, P)` for a position-varying probe
    /// or `(ntheta, 1, nmodes, P, P)` for a probe shared by all positions.
    pub fn fwd(
        &self,
        psi: ArrayView3<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        probe: ArrayView5<'_, Complex64>,
    ) -> Array5<Complex64> {
        let tiles = self.tile.fwd(psi, scan);
        let (ntheta, nscan, d, _) = tiles.dim();
        let nmodes = probe.shape()[2];
        self.check_probe(probe, ntheta, nscan);
        let (pad, end) = (self.pad, self.end);

        let mut nearplane = Array5::<Complex64>::zeros((ntheta, nscan, nmodes, d, d));
        for t in 0..ntheta {
            for p in 0..nscan {
                let sp = probe_index(probe, p);
                for m in 0..nmodes {
                    let mut out = nearplane.slice_mut(s![t, p, m, .., ..]);
                    out.assign(&tiles.slice(s![t, p, .., ..]));
                    let mut window = out.slice_mut(s![pad..end, pad..end]);
                    window *= &probe.slice(s![t, sp, m, .., ..]);
                }
            }
        }
        nearplane
    }

    /// Adjoint of [`Diffraction::fwd`] with respect to the object.
    pub fn adj(
        &self,
        nearplane: ArrayView5<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        probe: ArrayView5<'_, Complex64>,
        psi_shape: (usize, usize),
    ) -> Array3<Complex64> {
        let (ntheta, nscan, nmodes, d, _) = nearplane.dim();
        self.check_probe(probe, ntheta, nscan);
        let (pad, end) = (self.pad, self.end);

        let mut tiles = Array4::<Complex64>::zeros((ntheta, nscan, d, d));
        for t in 0..ntheta {
            for p in 0..nscan {
                let sp = probe_index(probe, p);
                for m in 0..nmodes {
                    let mut mode = nearplane.slice(s![t, p, m, .., ..]).to_owned();
                    mode.slice_mut(s![pad..end, pad..end])
                        .zip_mut_with(&probe.slice(s![t, sp, m, .., ..]), |z, q| *z *= q.conj());
                    let mut tile = tiles.slice_mut(s![t, p, .., ..]);
                    tile += &mode;
                }
            }
        }
        self.tile.adj(tiles.view(), scan, psi_shape)
    }

    /// Adjoint of [`Diffraction::fwd`] with respect to the probe, per position.
    ///
    /// Returns $\overline{O_p} \cdot \psi_{p,m}$ on the probe window, shape
    /// `(ntheta, nscan, nmodes, P, P)`.
    pub fn adj_probe(
        &self,
        nearplane: ArrayView5<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        psi: ArrayView3<'_, Complex64>,
    ) -> Array5<Complex64> {
        let patches = self.patches(psi, scan);
        let (ntheta, nscan, nmodes, _, _) = nearplane.dim();
        let (pad, end, p) = (self.pad, self.end, self.probe_shape);

        let mut grad = Array5::<Complex64>::zeros((ntheta, nscan, nmodes, p, p));
        for t in 0..ntheta {
            for q in 0..nscan {
                let conj_patch = patches.slice(s![t, q, .., ..]).mapv(|z| z.conj());
                for m in 0..nmodes {
                    let mut out = grad.slice_mut(s![t, q, m, .., ..]);
                    out.assign(&nearplane.slice(s![t, q, m, pad..end, pad..end]));
                    out *= &conj_patch;
                }
            }
        }
        grad
    }

    fn check_probe(&self, probe: ArrayView5<'_, Complex64>, ntheta: usize, nscan: usize) {
        let shape = probe.shape();
        assert!(
            shape[0] == ntheta
                && (shape[1] == 1 || shape[1] == nscan)
                && shape[3] == self.probe_shape
                && shape[4] == self.probe_shape,
            "probe shape {:?} does not match ntheta={}, nscan={}, probe_shape={}",
            shape,
            ntheta,
            nscan,
            self.probe_shape
        );
    }
}

fn probe_index(probe: ArrayView5<'_, Complex64>, position: usize) -> usize {
    if probe.shape()[1] == 1 {
        0
    } else {
        position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::inner;
    use crate::sim::random_complex;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn scan() -> ndarray::Array3<f64> {
        array![[[0.0, 0.0], [2.5, 3.0], [5.0, 1.5]], [[1.0, 4.0], [3.0, 3.0], [4.5, 4.25]]]
    }

    #[test]
    fn test_margins_carry_raw_patch() {
        let psi = Array3::from_elem((2, 10, 10), Complex64::new(1.0, 0.0));
        let probe = Array5::from_elem((2, 1, 1, 4, 4), Complex64::new(0.0, 2.0));
        let op = Diffraction::new(4, 6);
        let nearplane = op.fwd(psi.view(), scan().view(), probe.view());
        assert_eq!(nearplane[[1, 1, 0, 0, 3]], Complex64::new(1.0, 0.0));
        assert_eq!(nearplane[[1, 1, 0, 2, 2]], Complex64::new(0.0, 2.0));
    }

    #[test]
    fn test_object_adjoint() {
        let mut rng = StdRng::seed_from_u64(7);
        let op = Diffraction::new(4, 8);
        let psi: Array3<Complex64> = random_complex((2, 10, 10), &mut rng);
        let probe: Array5<Complex64> = random_complex((2, 3, 2, 4, 4), &mut rng);
        let nearplane: Array5<Complex64> = random_complex((2, 3, 2, 8, 8), &mut rng);

        let a = inner(&op.fwd(psi.view(), scan().view(), probe.view()), &nearplane);
        let b = inner(&psi, &op.adj(nearplane.view(), scan().view(), probe.view(), (10, 10)));
        assert_relative_eq!(a.re, b.re, max_relative = 1e-10);
        assert_relative_eq!(a.im, b.im, max_relative = 1e-10);
    }

    #[test]
    fn test_probe_adjoint() {
        let mut rng = StdRng::seed_from_u64(8);
        let op = Diffraction::new(4, 4);
        let psi: Array3<Complex64> = random_complex((2, 10, 10), &mut rng);
        let probe: Array5<Complex64> = random_complex((2, 3, 1, 4, 4), &mut rng);
        let nearplane: Array5<Complex64> = random_complex((2, 3, 1, 4, 4), &mut rng);

        let a = inner(&op.fwd(psi.view(), scan().view(), probe.view()), &nearplane);
        let b = inner(&probe, &op.adj_probe(nearplane.view(), scan().view(), psi.view()));
        assert_relative_eq!(a.re, b.re, max_relative = 1e-10);
        assert_relative_eq!(a.im, b.im, max_relative = 1e-10);
    }
}
