//! Free-space propagation between the nearplane and the detector.
//!
//! The farfield is the orthonormal 2D Fourier transform of the nearplane,
//! zero-padded (centred) to the detector size when the nearplane is smaller:
//!
//! $$\Psi = \mathcal{F}\,\mathcal{P}\,\psi, \qquad \psi' = \mathcal{P}^*\mathcal{F}^{-1}\Psi$$
//!
//! Because both transforms are unitary and cropping is the adjoint of
//! padding, [`Propagation::adj`] is the exact adjoint of [`Propagation::fwd`].
//!
//! The intensity-fit objectives are evaluated here as well, since they only
//! involve detector-plane quantities.

use std::sync::Arc;

use ndarray::{Array, Array4, Array5, ArrayView, ArrayView4, ArrayView5, Axis, Dimension, Zip};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use ptyx_compute::{ComputeBackend, FftDirection};

use crate::solver::PtychoError;

/// Guards divisions by modeled intensities that are exactly zero.
const INTENSITY_EPS: f64 = 1e-32;

/// Statistical model of the measured intensities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseModel {
    /// Least squares on amplitudes, $\operatorname{mean}(\sqrt{I} - \sqrt{d})^2$.
    #[default]
    Gaussian,
    /// Poisson deviance, $\operatorname{mean}\bigl(I - d - d \ln(I/d)\bigr)$.
    Poisson,
}

/// Farfield propagation operator.
#[derive(Clone)]
pub struct Propagation {
    /// Width of the square detector in pixels.
    pub detector_shape: usize,
    /// Width of the square nearplane wavefront in pixels.
    pub nearplane_shape: usize,
    pub noise_model: NoiseModel,
    backend: Arc<dyn ComputeBackend>,
}

impl std::fmt::Debug for Propagation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Propagation")
            .field("detector_shape", &self.detector_shape)
            .field("nearplane_shape", &self.nearplane_shape)
            .field("noise_model", &self.noise_model)
            .field("backend", &self.backend.device_info().name)
            .finish()
    }
}

impl Propagation {
    pub fn new(
        detector_shape: usize,
        nearplane_shape: usize,
        noise_model: NoiseModel,
        backend: Arc<dyn ComputeBackend>,
    ) -> Self {
        assert!(
            nearplane_shape <= detector_shape,
            "nearplane ({}) must fit on the detector ({})",
            nearplane_shape,
            detector_shape
        );
        Self {
            detector_shape,
            nearplane_shape,
            noise_model,
            backend,
        }
    }

    fn pad(&self) -> usize {
        (self.detector_shape - self.nearplane_shape) / 2
    }

    /// Propagate a stack of nearplane wavefronts `(..., n, n)` to the detector `(..., D, D)`.
    pub fn fwd<D: Dimension>(
        &self,
        nearplane: ArrayView<'_, Complex64, D>,
    ) -> Result<Array<Complex64, D>, PtychoError> {
        let (n, det, pad) = (self.nearplane_shape, self.detector_shape, self.pad());
        let mut shape = nearplane.raw_dim();
        let ndim = shape.ndim();
        assert!(ndim >= 2, "nearplane must have at least two axes");
        assert_eq!(
            &nearplane.shape()[ndim - 2..],
            &[n, n],
            "nearplane does not match the configured shape"
        );
        shape[ndim - 2] = det;
        shape[ndim - 1] = det;

        let mut farplane = Array::<Complex64, D>::zeros(shape);
        {
            let near = nearplane.as_standard_layout();
            let src = near.as_slice().ok_or(PtychoError::NonContiguous("nearplane"))?;
            let dst = farplane
                .as_slice_mut()
                .ok_or(PtychoError::NonContiguous("farplane"))?;
            for (k, image) in src.chunks(n * n).enumerate() {
                let out = &mut dst[k * det * det..(k + 1) * det * det];
                for r in 0..n {
                    out[(r + pad) * det + pad..(r + pad) * det + pad + n]
                        .copy_from_slice(&image[r * n..(r + 1) * n]);
                }
            }
            self.backend.fft2(dst, (det, det), FftDirection::Forward)?;
        }
        Ok(farplane)
    }

    /// Back-propagate a stack of farplane wavefronts `(..., D, D)` to `(..., n, n)`.
    pub fn adj<D: Dimension>(
        &self,
        farplane: ArrayView<'_, Complex64, D>,
    ) -> Result<Array<Complex64, D>, PtychoError> {
        let (n, det, pad) = (self.nearplane_shape, self.detector_shape, self.pad());
        let mut shape = farplane.raw_dim();
        let ndim = shape.ndim();
        assert!(ndim >= 2, "farplane must have at least two axes");
        assert_eq!(
            &farplane.shape()[ndim - 2..],
            &[det, det],
            "farplane does not match the detector shape"
        );
        shape[ndim - 2] = n;
        shape[ndim - 1] = n;

        let mut buffer = farplane.as_standard_layout().into_owned();
        let src = buffer
            .as_slice_mut()
            .ok_or(PtychoError::NonContiguous("farplane"))?;
        self.backend.fft2(src, (det, det), FftDirection::Inverse)?;

        let mut nearplane = Array::<Complex64, D>::zeros(shape);
        let dst = nearplane
            .as_slice_mut()
            .ok_or(PtychoError::NonContiguous("nearplane"))?;
        for (k, image) in src.chunks(det * det).enumerate() {
            let out = &mut dst[k * n * n..(k + 1) * n * n];
            for r in 0..n {
                out[r * n..(r + 1) * n]
                    .copy_from_slice(&image[(r + pad) * det + pad..(r + pad) * det + pad + n]);
            }
        }
        Ok(nearplane)
    }

    /// Intensity-fit cost between measured `data` and modeled `intensity`.
    ///
    /// Both noise models return the mean over all detector pixels of a
    /// pointwise non-negative misfit, so the cost is never negative.
    pub fn cost(&self, data: ArrayView4<'_, f64>, intensity: ArrayView4<'_, f64>) -> f64 {
        assert_eq!(data.shape(), intensity.shape(), "data and intensity shapes differ");
        let count = data.len().max(1) as f64;
        let total: f64 = match self.noise_model {
            NoiseModel::Gaussian => Zip::from(&data)
                .and(&intensity)
                .fold(0.0, |acc, &d, &i| {
                    let diff = i.sqrt() - d.sqrt();
                    acc + diff * diff
                }),
            NoiseModel::Poisson => Zip::from(&data).and(&intensity).fold(0.0, |acc, &d, &i| {
                let term = if d > 0.0 {
                    i - d - d * ((i + INTENSITY_EPS) / d).ln()
                } else {
                    i
                };
                acc + term.max(0.0)
            }),
        };
        total / count
    }

    /// Gradient of the cost with respect to each farplane mode.
    ///
    /// # Arguments
    /// * `data` - Measured intensities, `(ntheta, nscan, D, D)`.
    /// * `farplane` - Modeled wavefronts, `(ntheta, nscan, nmodes, D, D)`.
    /// * `intensity` - Modeled intensity summed over all modes, `(ntheta, nscan, D, D)`.
    ///
    /// The intensity may include modes that are not present in `farplane`;
    /// the gradient of each supplied mode is still correct.
    pub fn grad(
        &self,
        data: ArrayView4<'_, f64>,
        farplane: ArrayView5<'_, Complex64>,
        intensity: ArrayView4<'_, f64>,
    ) -> Array5<Complex64> {
        assert_eq!(data.shape(), intensity.shape(), "data and intensity shapes differ");
        let factor: Array4<f64> = match self.noise_model {
            NoiseModel::Gaussian => Zip::from(&data)
                .and(&intensity)
                .map_collect(|&d, &i| 1.0 - d.sqrt() / (i.sqrt() + INTENSITY_EPS)),
            NoiseModel::Poisson => Zip::from(&data)
                .and(&intensity)
                .map_collect(|&d, &i| 1.0 - d / (i + INTENSITY_EPS)),
        };

        let mut gradient = farplane.to_owned();
        for m in 0..gradient.shape()[2] {
            let mut mode = gradient.index_axis_mut(Axis(2), m);
            mode.zip_mut_with(&factor, |g, &f| *g *= f);
        }
        gradient
    }
}

/// Modeled intensity $\sum_m |\Psi_m|^2$ of a farplane `(ntheta, nscan, nmodes, D, D)`.
pub fn intensity(farplane: ArrayView5<'_, Complex64>) -> Array4<f64> {
    farplane
        .mapv(|z| z.norm_sqr())
        .sum_axis(Axis(2))
}
