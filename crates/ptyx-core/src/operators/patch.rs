//! Extraction of probe-sized windows ("patches") from the object.
//!
//! A scan position gives the `(row, col)` corner of a probe footprint in
//! object pixels. Fractional positions are sampled with bilinear weights, and
//! pixels that fall outside the object read as zero. The adjoint scatters
//! each patch back with the same weights, so
//! $\langle Q\psi, \Phi \rangle = \langle \psi, Q^*\Phi \rangle$ holds exactly.

use ndarray::{Array3, Array4, ArrayView3, ArrayView4};
use num_complex::Complex64;

/// Window extraction operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Patch {
    /// Width (and height) of each extracted window in pixels.
    pub width: usize,
    /// Distance from the window corner to the scan position along each axis.
    pub offset: f64,
}

/// Integer corner and the four bilinear tap weights of one window.
#[derive(Debug, Clone, Copy)]
struct Footprint {
    row: isize,
    col: isize,
    weights: [(isize, isize, f64); 4],
}

impl Footprint {
    fn new(position: [f64; 2], offset: f64) -> Self {
        let y = position[0] - offset;
        let x = position[1] - offset;
        let (row, col) = (y.floor(), x.floor());
        let (fy, fx) = (y - row, x - col);
        Self {
            row: row as isize,
            col: col as isize,
            weights: [
                (0, 0, (1.0 - fy) * (1.0 - fx)),
                (0, 1, (1.0 - fy) * fx),
                (1, 0, fy * (1.0 - fx)),
                (1, 1, fy * fx),
            ],
        }
    }
}

fn in_bounds(index: isize, len: usize) -> Option<usize> {
    if index >= 0 && (index as usize) < len {
        Some(index as usize)
    } else {
        None
    }
}

impl Patch {
    pub fn new(width: usize, offset: f64) -> Self {
        Self { width, offset }
    }

    /// Extract one window per scan position.
    ///
    /// # Arguments
    /// * `psi` - Object, `(ntheta, H, W)`.
    /// * `scan` - Positions, `(ntheta, nscan, 2)`.
    ///
    /// # Returns
    /// Patches of shape `(ntheta, nscan, width, width)`.
    pub fn fwd(&self, psi: ArrayView3<'_, Complex64>, scan: ArrayView3<'_, f64>) -> Array4<Complex64> {
        let (ntheta, nscan, _) = scan.dim();
        let (_, h, w) = psi.dim();
        assert_eq!(psi.shape()[0], ntheta, "psi and scan disagree on ntheta");
        let mut patches = Array4::<Complex64>::zeros((ntheta, nscan, self.width, self.width));

        for t in 0..ntheta {
            for s in 0..nscan {
                let fp = Footprint::new([scan[[t, s, 0]], scan[[t, s, 1]]], self.offset);
                for i in 0..self.width {
                    for j in 0..self.width {
                        let mut value = Complex64::default();
                        for &(di, dj, weight) in &fp.weights {
                            let r = in_bounds(fp.row + (i as isize) + di, h);
                            let c = in_bounds(fp.col + (j as isize) + dj, w);
                            if let (Some(r), Some(c)) = (r, c) {
                                value += psi[[t, r, c]] * weight;
                            }
                        }
                        patches[[t, s, i, j]] = value;
                    }
                }
            }
        }
        patches
    }

    /// Scatter-add windows back onto an object of shape `(ntheta, psi_shape.0, psi_shape.1)`.
    pub fn adj(
        &self,
        patches: ArrayView4<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        psi_shape: (usize, usize),
    ) -> Array3<Complex64> {
        let (ntheta, nscan, _) = scan.dim();
        let (h, w) = psi_shape;
        assert_eq!(
            patches.shape(),
            &[ntheta, nscan, self.width, self.width],
            "patches do not match the scan and window width"
        );
        let mut psi = Array3::<Complex64>::zeros((ntheta, h, w));

        for t in 0..ntheta {
            for s in 0..nscan {
                let fp = Footprint::new([scan[[t, s, 0]], scan[[t, s, 1]]], self.offset);
                for i in 0..self.width {
                    for j in 0..self.width {
                        let value = patches[[t, s, i, j]];
                        for &(di, dj, weight) in &fp.weights {
                            let r = in_bounds(fp.row + (i as isize) + di, h);
                            let c = in_bounds(fp.col + (j as isize) + dj, w);
                            if let (Some(r), Some(c)) = (r, c) {
                                psi[[t, r, c]] += value * weight;
                            }
                        }
                    }
                }
            }
        }
        psi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::random_complex;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_integer_position_copies_window() {
        let psi = Array3::from_shape_fn((1, 6, 6), |(_, r, c)| Complex64::new(r as f64, c as f64));
        let scan = array![[[2.0, 1.0]]];
        let patches = Patch::new(3, 0.0).fwd(psi.view(), scan.view());
        assert_eq!(patches[[0, 0, 0, 0]], Complex64::new(2.0, 1.0));
        assert_eq!(patches[[0, 0, 2, 2]], Complex64::new(4.0, 3.0));
    }

    #[test]
    fn test_fractional_position_interpolates() {
        let psi = Array3::from_shape_fn((1, 4, 4), |(_, _, c)| Complex64::new(c as f64, 0.0));
        let scan = array![[[0.0, 0.25]]];
        let patches = Patch::new(2, 0.0).fwd(psi.view(), scan.view());
        assert_relative_eq!(patches[[0, 0, 0, 0]].re, 0.25, epsilon = 1e-12);
        assert_relative_eq!(patches[[0, 0, 1, 1]].re, 1.25, epsilon = 1e-12);
    }

    #[test]
    fn test_out_of_bounds_reads_zero() {
        let psi = Array3::from_elem((1, 4, 4), Complex64::new(1.0, 0.0));
        let scan = array![[[0.0, 0.0]]];
        let patches = Patch::new(4, 1.0).fwd(psi.view(), scan.view());
        assert_eq!(patches[[0, 0, 0, 0]], Complex64::default());
        assert_eq!(patches[[0, 0, 1, 1]], Complex64::new(1.0, 0.0));
    }

    #[test]
    fn test_adjoint_with_fractional_positions() {
        let mut rng = StdRng::seed_from_u64(3);
        let op = Patch::new(5, 1.0);
        let psi = random_complex((2, 12, 12), &mut rng);
        let scan = array![
            [[1.3, 2.7], [4.0, 4.0], [6.9, 0.2]],
            [[0.0, 7.5], [3.25, 3.75], [8.0, 8.0]]
        ];
        let patches = random_complex((2, 3, 5, 5), &mut rng);

        let a = crate::linalg::inner(&op.fwd(psi.view(), scan.view()), &patches);
        let b = crate::linalg::inner(&psi, &op.adj(patches.view(), scan.view(), (12, 12)));
        assert_relative_eq!(a.re, b.re, max_relative = 1e-10);
        assert_relative_eq!(a.im, b.im, max_relative = 1e-10);
    }
}
