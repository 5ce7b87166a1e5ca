//! Core types shared across the Ptyx framework.
//!
//! This module defines the reconstruction state that the solvers mutate in
//! place, the per-algorithm option records, and the shape checks performed
//! at every solver entry point.
//!
//! ## Array layout
//!
//! | Array | Shape |
//! |-------|-------|
//! | object `psi` | `(ntheta, H, W)` |
//! | common probe | `(ntheta, nmodes, P, P)` |
//! | varying probe | `(ntheta, nscan, nmodes, P, P)` |
//! | eigen probes | `(ntheta, ncomp, nmodes, P, P)` |
//! | eigen weights | `(ntheta, nscan, ncomp, nmodes)` |
//! | scan | `(ntheta, nscan, 2)` |
//! | data | `(ntheta, nscan, D, D)` |

use ndarray::{Array3, Array4, Array5};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::operators::Ptycho;
use crate::solver::PtychoError;

/// Reconstruction state, stored per device.
///
/// Every field holds one entry per device to match the multi-device calling
/// convention. The solvers in this crate operate on exactly one device slice
/// and reject any other count with [`PtychoError::DeviceCount`].
#[derive(Debug, Clone)]
pub struct PtychoState {
    /// Complex object transmittance, `(ntheta, H, W)`.
    pub psi: Vec<Array3<Complex64>>,
    /// Common probe modes, `(ntheta, nmodes, P, P)`.
    pub probe: Vec<Array4<Complex64>>,
    /// Probe footprint corners `(row, col)` in object pixels, `(ntheta, nscan, 2)`.
    pub scan: Vec<Array3<f64>>,
    /// Orthogonal basis of probe variations, `(ntheta, ncomp, nmodes, P, P)`.
    pub eigen_probe: Option<Vec<Array5<Complex64>>>,
    /// Per-position eigen-probe coefficients, `(ntheta, nscan, ncomp, nmodes)`.
    pub eigen_weights: Option<Vec<Array4<f64>>>,
}

/// Exclusive view of the single device slice of a [`PtychoState`].
pub struct DeviceMut<'a> {
    pub psi: &'a mut Array3<Complex64>,
    pub probe: &'a mut Array4<Complex64>,
    pub scan: &'a Array3<f64>,
    pub eigen: Option<EigenMut<'a>>,
}

/// Exclusive view of the eigen-probe basis and its weights.
pub struct EigenMut<'a> {
    pub probe: &'a mut Array5<Complex64>,
    pub weights: &'a mut Array4<f64>,
}

impl PtychoState {
    /// Create a single-device state without eigen probes.
    pub fn new(psi: Array3<Complex64>, probe: Array4<Complex64>, scan: Array3<f64>) -> Self {
        Self {
            psi: vec![psi],
            probe: vec![probe],
            scan: vec![scan],
            eigen_probe: None,
            eigen_weights: None,
        }
    }

    /// Attach an eigen-probe basis and its weights.
    pub fn with_eigen(mut self, eigen_probe: Array5<Complex64>, eigen_weights: Array4<f64>) -> Self {
        self.eigen_probe = Some(vec![eigen_probe]);
        self.eigen_weights = Some(vec![eigen_weights]);
        self
    }

    /// Borrow the single device slice mutably.
    pub fn device_mut(&mut self) -> Result<DeviceMut<'_>, PtychoError> {
        let eigen = match (self.eigen_probe.as_mut(), self.eigen_weights.as_mut()) {
            (Some(probe), Some(weights)) => Some(EigenMut {
                probe: only_mut(probe)?,
                weights: only_mut(weights)?,
            }),
            (None, None) => None,
            _ => return Err(PtychoError::IncompleteEigenState),
        };
        let scan = match self.scan.as_slice() {
            [scan] => scan,
            other => return Err(PtychoError::DeviceCount { found: other.len() }),
        };
        Ok(DeviceMut {
            psi: only_mut(&mut self.psi)?,
            probe: only_mut(&mut self.probe)?,
            scan,
            eigen,
        })
    }
}

fn only_mut<T>(items: &mut [T]) -> Result<&mut T, PtychoError> {
    match items {
        [item] => Ok(item),
        other => Err(PtychoError::DeviceCount { found: other.len() }),
    }
}

/// Return the single per-device entry of `items`.
pub fn single_device<T>(items: &[T]) -> Result<&T, PtychoError> {
    match items {
        [item] => Ok(item),
        other => Err(PtychoError::DeviceCount { found: other.len() }),
    }
}

impl DeviceMut<'_> {
    /// Check every array against the operator configuration and the data.
    pub fn validate(&self, op: &Ptycho, data: &Array4<f64>) -> Result<(), PtychoError> {
        let ntheta = op.ntheta;
        let nscan = self.scan.shape()[1];
        let nmodes = self.probe.shape()[1];
        let p = op.probe_shape();
        let d = op.detector_shape();

        check_shape("scan", &[ntheta, nscan, 2], self.scan.shape())?;
        check_shape("data", &[ntheta, nscan, d, d], data.shape())?;
        check_shape("probe", &[ntheta, nmodes, p, p], self.probe.shape())?;
        check_shape("psi", &[ntheta], &self.psi.shape()[..1])?;

        if let Some(eigen) = &self.eigen {
            let ncomp = eigen.probe.shape()[1];
            check_shape("eigen_probe", &[ntheta, ncomp, nmodes, p, p], eigen.probe.shape())?;
            check_shape("eigen_weights", &[ntheta, nscan, ncomp, nmodes], eigen.weights.shape())?;
        }
        Ok(())
    }
}

/// Fail with [`PtychoError::ShapeMismatch`] unless `found == expected`.
pub fn check_shape(what: &'static str, expected: &[usize], found: &[usize]) -> Result<(), PtychoError> {
    if expected != found {
        return Err(PtychoError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            found: found.to_vec(),
        });
    }
    Ok(())
}

/// Options for the least-squares gradient solver.
///
/// The numeric fields replace constants of the published algorithm; their
/// defaults reproduce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LstsqOptions {
    pub recover_psi: bool,
    pub recover_probe: bool,
    /// Accepted for interface parity; positions are never changed by this solver.
    pub recover_positions: bool,
    /// Accepted for interface parity; the least-squares solver has no inner CG loop.
    pub cg_iter: usize,
    /// Fixed step of the farfield gradient move.
    pub farfield_step: f64,
    /// Learning rate β of the eigen-probe update.
    pub eigen_learning_rate: f64,
    /// Per-pixel offset added to the curvature sums `A1` and `A4`.
    pub curvature_offset: f64,
    /// Fraction of the cross-position mean curvature added to each position.
    pub step_stabilization: f64,
    /// Fraction of the cross-position mean `|φ|²` added to the weight denominator.
    pub weight_stabilization: f64,
    /// Recompute and log costs and residuals after each update.
    pub diagnostics: bool,
}

impl Default for LstsqOptions {
    fn default() -> Self {
        Self {
            recover_psi: true,
            recover_probe: false,
            recover_positions: false,
            cg_iter: 4,
            farfield_step: 0.5,
            eigen_learning_rate: 0.01,
            curvature_offset: 0.5,
            step_stabilization: 0.5,
            weight_stabilization: 0.1,
            diagnostics: false,
        }
    }
}

/// Options for the conjugate-gradient solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CgradOptions {
    pub recover_psi: bool,
    pub recover_probe: bool,
    pub recover_positions: bool,
    /// Conjugate-gradient iterations per unknown per outer iteration.
    pub cg_iter: usize,
    /// Initial backtracking step for the object.
    pub object_step_length: f64,
    /// Initial backtracking step for each probe mode.
    pub probe_step_length: f64,
}

impl Default for CgradOptions {
    fn default() -> Self {
        Self {
            recover_psi: true,
            recover_probe: true,
            recover_positions: false,
            cg_iter: 4,
            object_step_length: 1.0,
            probe_step_length: 4.0,
        }
    }
}
