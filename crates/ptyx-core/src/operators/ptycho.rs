//! The combined ptychography operator: illumination followed by farfield propagation.

use std::sync::Arc;

use ndarray::{Array3, Array4, Array5, ArrayView3, ArrayView4, ArrayView5};
use num_complex::Complex64;

use ptyx_compute::ComputeBackend;

use super::diffraction::Diffraction;
use super::propagation::{intensity, NoiseModel, Propagation};
use crate::solver::PtychoError;

/// Ptychography forward model $\Psi = F(P \cdot Q\psi)$ over `ntheta` views.
#[derive(Debug, Clone)]
pub struct Ptycho {
    pub ntheta: usize,
    pub diffraction: Diffraction,
    pub propagation: Propagation,
}

impl Ptycho {
    /// # Arguments
    /// * `ntheta` - Number of independent views.
    /// * `probe_shape` - Probe width `P` in pixels.
    /// * `detector_shape` - Detector width `D >= P` in pixels.
    /// * `noise_model` - Intensity-fit cost used by [`Ptycho::cost`] and the solvers.
    /// * `backend` - FFT provider.
    pub fn new(
        ntheta: usize,
        probe_shape: usize,
        detector_shape: usize,
        noise_model: NoiseModel,
        backend: Arc<dyn ComputeBackend>,
    ) -> Self {
        Self {
            ntheta,
            diffraction: Diffraction::new(probe_shape, detector_shape),
            propagation: Propagation::new(detector_shape, detector_shape, noise_model, backend),
        }
    }

    pub fn probe_shape(&self) -> usize {
        self.diffraction.probe_shape
    }

    pub fn detector_shape(&self) -> usize {
        self.diffraction.detector_shape
    }

    pub fn pad(&self) -> usize {
        self.diffraction.pad
    }

    pub fn end(&self) -> usize {
        self.diffraction.end
    }

    pub fn noise_model(&self) -> NoiseModel {
        self.propagation.noise_model
    }

    /// Farplane wavefronts `(ntheta, nscan, nmodes, D, D)`.
    ///
    /// `probe` carries a position axis of length 1 (shared probe) or `nscan`.
    pub fn fwd(
        &self,
        psi: ArrayView3<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        probe: ArrayView5<'_, Complex64>,
    ) -> Result<Array5<Complex64>, PtychoError> {
        let nearplane = self.diffraction.fwd(psi, scan, probe);
        self.propagation.fwd(nearplane.view())
    }

    /// Modeled intensity summed over probe modes.
    pub fn intensity(
        &self,
        psi: ArrayView3<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        probe: ArrayView5<'_, Complex64>,
    ) -> Result<Array4<f64>, PtychoError> {
        Ok(intensity(self.fwd(psi, scan, probe)?.view()))
    }

    /// Noiseless measurements for a known object and probe.
    pub fn simulate(
        &self,
        psi: ArrayView3<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        probe: ArrayView5<'_, Complex64>,
    ) -> Result<Array4<f64>, PtychoError> {
        self.intensity(psi, scan, probe)
    }

    pub fn cost(
        &self,
        data: ArrayView4<'_, f64>,
        psi: ArrayView3<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        probe: ArrayView5<'_, Complex64>,
    ) -> Result<f64, PtychoError> {
        let modeled = self.intensity(psi, scan, probe)?;
        Ok(self.propagation.cost(data, modeled.view()))
    }

    /// Farplane gradient back-propagated to the nearplane.
    fn nearplane_grad(
        &self,
        data: ArrayView4<'_, f64>,
        psi: ArrayView3<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        probe: ArrayView5<'_, Complex64>,
    ) -> Result<Array5<Complex64>, PtychoError> {
        let farplane = self.fwd(psi, scan, probe)?;
        let modeled = intensity(farplane.view());
        let grad = self.propagation.grad(data, farplane.view(), modeled.view());
        self.propagation.adj(grad.view())
    }

    /// Gradient of the cost with respect to the object, `(ntheta, H, W)`.
    pub fn grad(
        &self,
        data: ArrayView4<'_, f64>,
        psi: ArrayView3<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        probe: ArrayView5<'_, Complex64>,
    ) -> Result<Array3<Complex64>, PtychoError> {
        let (_, h, w) = psi.dim();
        let nearplane = self.nearplane_grad(data, psi, scan, probe)?;
        Ok(self.diffraction.adj(nearplane.view(), scan, probe, (h, w)))
    }

    /// Per-position gradient with respect to the probe, `(ntheta, nscan, nmodes, P, P)`.
    pub fn grad_probe(
        &self,
        data: ArrayView4<'_, f64>,
        psi: ArrayView3<'_, Complex64>,
        scan: ArrayView3<'_, f64>,
        probe: ArrayView5<'_, Complex64>,
    ) -> Result<Array5<Complex64>, PtychoError> {
        let nearplane = self.nearplane_grad(data, psi, scan, probe)?;
        Ok(self.diffraction.adj_probe(nearplane.view(), scan, psi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{gaussian_probe, random_unit_modulus, raster_scan};
    use approx::assert_abs_diff_eq;
    use ndarray::Axis;
    use ptyx_compute::CpuBackend;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixture() -> (Ptycho, Array3<Complex64>, Array3<f64>, Array4<Complex64>) {
        let mut rng = StdRng::seed_from_u64(11);
        let op = Ptycho::new(2, 8, 8, NoiseModel::Gaussian, Arc::new(CpuBackend::new()));
        let psi = random_unit_modulus((2, 16, 16), &mut rng);
        let scan = raster_scan(2, 16, 8, 2.0);
        let probe = gaussian_probe(2, 1, 8);
        (op, psi, scan, probe)
    }

    #[test]
    fn test_cost_vanishes_on_simulated_data() {
        let (op, psi, scan, probe) = fixture();
        let probe = probe.insert_axis(Axis(1));
        let data = op.simulate(psi.view(), scan.view(), probe.view()).unwrap();
        let cost = op.cost(data.view(), psi.view(), scan.view(), probe.view()).unwrap();
        assert_abs_diff_eq!(cost, 0.0, epsilon = 1e-20);
    }

    #[test]
    fn test_gradients_vanish_on_simulated_data() {
        let (op, psi, scan, probe) = fixture();
        let probe = probe.insert_axis(Axis(1));
        let data = op.simulate(psi.view(), scan.view(), probe.view()).unwrap();
        let g = op.grad(data.view(), psi.view(), scan.view(), probe.view()).unwrap();
        let gp = op.grad_probe(data.view(), psi.view(), scan.view(), probe.view()).unwrap();
        assert!(g.iter().all(|z| z.norm() < 1e-8));
        assert!(gp.iter().all(|z| z.norm() < 1e-8));
    }

    #[test]
    fn test_object_gradient_points_uphill() {
        let (op, psi, scan, probe) = fixture();
        let probe = probe.insert_axis(Axis(1));
        let data = op.simulate(psi.view(), scan.view(), probe.view()).unwrap();
        let guess = psi.mapv(|z| z * 0.8);
        let cost = op.cost(data.view(), guess.view(), scan.view(), probe.view()).unwrap();
        let g = op.grad(data.view(), guess.view(), scan.view(), probe.view()).unwrap();
        let stepped = &guess - &g.mapv(|z| z * 1e-3);
        let lower = op.cost(data.view(), stepped.view(), scan.view(), probe.view()).unwrap();
        assert!(lower < cost, "{} >= {}", lower, cost);
    }
}
