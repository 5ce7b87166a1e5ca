//! Synthetic objects, probes, scans, and datasets.
//!
//! These generators produce noiseless test problems with known ground
//! truth. They are used by the tests and by the command-line tool.

use std::f64::consts::PI;
use std::sync::Arc;

use ndarray::{Array, Array3, Array4, Axis, Dimension, ShapeBuilder};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use ptyx_compute::ComputeBackend;

use crate::operators::{NoiseModel, Ptycho};
use crate::solver::PtychoError;
use crate::types::PtychoState;

/// Complex array with real and imaginary parts uniform in `[-0.5, 0.5)`.
pub fn random_complex<Sh, D>(shape: Sh, rng: &mut impl Rng) -> Array<Complex64, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    Array::from_shape_simple_fn(shape, || Complex64::new(rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5)))
}

/// Complex array of unit modulus with uniformly random phase.
pub fn random_unit_modulus<Sh, D>(shape: Sh, rng: &mut impl Rng) -> Array<Complex64, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    Array::from_shape_simple_fn(shape, || Complex64::from_polar(1.0, rng.gen_range(-PI..PI)))
}

/// Gaussian probe modes, `(ntheta, nmodes, P, P)`.
///
/// Mode `m` is the fundamental Gaussian (σ = P/4) with an `m`-cycle phase
/// ramp across the window and amplitude `1 / (m + 1)`.
pub fn gaussian_probe(ntheta: usize, nmodes: usize, width: usize) -> Array4<Complex64> {
    let centre = (width as f64 - 1.0) / 2.0;
    let sigma = (width as f64 / 4.0).max(f64::EPSILON);
    Array4::from_shape_fn((ntheta, nmodes, width, width), |(_, m, i, j)| {
        let (y, x) = (i as f64 - centre, j as f64 - centre);
        let amplitude = (-(x * x + y * y) / (2.0 * sigma * sigma)).exp() / (m + 1) as f64;
        let phase = 2.0 * PI * m as f64 * j as f64 / width as f64;
        Complex64::from_polar(amplitude, phase)
    })
}

/// Raster scan covering an object of width `object_shape` with probe-sized
/// footprints every `step` pixels, identical for every view.
///
/// # Returns
/// Positions `(ntheta, nscan, 2)` in row-major raster order.
pub fn raster_scan(ntheta: usize, object_shape: usize, probe_shape: usize, step: f64) -> Array3<f64> {
    assert!(step > 0.0, "scan step must be positive, got {}", step);
    let last = object_shape.saturating_sub(probe_shape) as f64;
    let coords: Vec<f64> = (0..)
        .map(|k| k as f64 * step)
        .take_while(|&v| v <= last + 1e-9)
        .collect();
    let n = if object_shape >= probe_shape { coords.len() } else { 0 };
    Array3::from_shape_fn((ntheta, n * n, 2), |(_, s, axis)| {
        if axis == 0 {
            coords[s / n]
        } else {
            coords[s % n]
        }
    })
}

/// Parameters of a synthetic dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetParams {
    pub ntheta: usize,
    /// Object width and height in pixels.
    pub object_shape: usize,
    pub probe_shape: usize,
    pub detector_shape: usize,
    /// Raster step in pixels.
    pub scan_step: f64,
    pub nmodes: usize,
    pub seed: u64,
    pub noise_model: NoiseModel,
}

impl Default for DatasetParams {
    fn default() -> Self {
        Self {
            ntheta: 8,
            object_shape: 16,
            probe_shape: 8,
            detector_shape: 8,
            scan_step: 2.0,
            nmodes: 1,
            seed: 0,
            noise_model: NoiseModel::Gaussian,
        }
    }
}

/// Ground truth and noiseless measurements.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub psi: Array3<Complex64>,
    pub probe: Array4<Complex64>,
    pub scan: Array3<f64>,
    pub data: Array4<f64>,
}

impl SyntheticDataset {
    /// Simulate a dataset and return it with the operator that produced it.
    pub fn generate(
        params: &DatasetParams,
        backend: Arc<dyn ComputeBackend>,
    ) -> Result<(Ptycho, Self), PtychoError> {
        let mut rng = StdRng::seed_from_u64(params.seed);
        let op = Ptycho::new(
            params.ntheta,
            params.probe_shape,
            params.detector_shape,
            params.noise_model,
            backend,
        );
        let psi = random_unit_modulus((params.ntheta, params.object_shape, params.object_shape), &mut rng);
        let probe = gaussian_probe(params.ntheta, params.nmodes, params.probe_shape);
        let scan = raster_scan(params.ntheta, params.object_shape, params.probe_shape, params.scan_step);
        let data = op.simulate(psi.view(), scan.view(), probe.view().insert_axis(Axis(1)))?;
        Ok((op, Self { psi, probe, scan, data }))
    }

    /// Starting point of a reconstruction: a flat object and the true probe.
    pub fn initial_state(&self) -> PtychoState {
        let psi = Array3::from_elem(self.psi.raw_dim(), Complex64::new(1.0, 0.0));
        PtychoState::new(psi, self.probe.clone(), self.scan.clone())
    }

    pub fn nscan(&self) -> usize {
        self.scan.shape()[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_raster_scan_covers_object() {
        let scan = raster_scan(3, 16, 8, 2.0);
        assert_eq!(scan.shape(), &[3, 25, 2]);
        assert_eq!(scan[[0, 0, 0]], 0.0);
        assert_eq!(scan[[2, 24, 0]], 8.0);
        assert_eq!(scan[[2, 24, 1]], 8.0);
        assert_eq!(scan[[1, 1, 1]], 2.0);
    }

    #[test]
    fn test_raster_scan_without_room_is_empty() {
        assert_eq!(raster_scan(1, 4, 8, 1.0).shape(), &[1, 0, 2]);
    }

    #[test]
    fn test_unit_modulus() {
        let mut rng = StdRng::seed_from_u64(1);
        let psi: Array3<Complex64> = random_unit_modulus((2, 4, 4), &mut rng);
        for z in psi.iter() {
            assert_abs_diff_eq!(z.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_gaussian_probe_peaks_at_centre() {
        let probe = gaussian_probe(1, 2, 9);
        assert_abs_diff_eq!(probe[[0, 0, 4, 4]].norm(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(probe[[0, 1, 4, 4]].norm(), 0.5, epsilon = 1e-12);
        assert!(probe[[0, 0, 0, 0]].norm() < probe[[0, 0, 2, 2]].norm());
    }

    #[test]
    fn test_dataset_is_consistent() {
        let params = DatasetParams {
            ntheta: 2,
            ..DatasetParams::default()
        };
        let backend = Arc::new(ptyx_compute::CpuBackend::new());
        let (op, dataset) = SyntheticDataset::generate(&params, backend).unwrap();
        assert_eq!(dataset.data.shape(), &[2, 25, 8, 8]);
        assert!(dataset.data.iter().all(|&d| d >= 0.0));
        let mut state = dataset.initial_state();
        let device = state.device_mut().unwrap();
        device.validate(&op, &dataset.data).unwrap();
    }
}
