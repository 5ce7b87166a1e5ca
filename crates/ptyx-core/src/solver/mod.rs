//! Reconstruction solvers.
//!
//! The [`PtychoSolver`] trait defines one outer iteration of a reconstruction
//! method. Two methods are provided:
//!
//! - [`LstsqSolver`]: linearized least-squares joint update of object, probe,
//!   and eigen-probes ([`lstsq::lstsq_grad`]).
//! - [`CgradSolver`]: nonlinear conjugate gradient on the object, then on
//!   each probe mode ([`cgrad::cgrad`]).

pub mod cgrad;
pub mod lstsq;

use ndarray::{Array4, ShapeError};
use ptyx_compute::ComputeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::operators::Ptycho;
use crate::types::{CgradOptions, LstsqOptions, PtychoState};

/// Errors that can occur during a reconstruction.
#[derive(Debug, Error)]
pub enum PtychoError {
    #[error("Eigen-probe weight update is not finite (mode {mode}, component {component})")]
    NonFiniteEigenWeights { mode: usize, component: usize },

    #[error("Iteration {iteration}: {source}")]
    AtIteration {
        iteration: usize,
        source: Box<PtychoError>,
    },

    #[error("Shape mismatch for {what}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Expected exactly one device slice, found {found}")]
    DeviceCount { found: usize },

    #[error("Eigen probes and eigen weights must be given together")]
    IncompleteEigenState,

    #[error("Array {0} is not contiguous")]
    NonContiguous(&'static str),

    #[error("Array layout error: {0}")]
    Layout(#[from] ShapeError),

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),
}

impl PtychoError {
    /// Attach the outer iteration index to an error.
    pub fn at_iteration(self, iteration: usize) -> Self {
        PtychoError::AtIteration {
            iteration,
            source: Box::new(self),
        }
    }

    /// The innermost error, with iteration context removed.
    pub fn root(&self) -> &PtychoError {
        match self {
            PtychoError::AtIteration { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the reconstruction diverged numerically.
    pub fn is_numerical_failure(&self) -> bool {
        matches!(self.root(), PtychoError::NonFiniteEigenWeights { .. })
    }
}

/// The interface every reconstruction method implements.
pub trait PtychoSolver {
    /// Run one outer iteration, mutating `state` in place.
    ///
    /// # Returns
    /// The farfield cost evaluated during the iteration.
    fn step(&self, op: &Ptycho, data: &[Array4<f64>], state: &mut PtychoState) -> Result<f64, PtychoError>;

    /// Human-readable name of the method.
    fn method_name(&self) -> &str;
}

/// Available reconstruction methods.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    #[default]
    Lstsq,
    Cgrad,
}

impl Algorithm {
    pub const ALL: [Algorithm; 2] = [Algorithm::Lstsq, Algorithm::Cgrad];

    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Lstsq => "lstsq",
            Algorithm::Cgrad => "cgrad",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Algorithm::Lstsq => "Linearized least-squares joint object, probe, and eigen-probe update",
            Algorithm::Cgrad => "Conjugate gradient on the object, then on each probe mode",
        }
    }
}

/// Least-squares gradient solver.
#[derive(Debug, Clone, Default)]
pub struct LstsqSolver {
    pub options: LstsqOptions,
}

impl LstsqSolver {
    pub fn new(options: LstsqOptions) -> Self {
        Self { options }
    }
}

impl PtychoSolver for LstsqSolver {
    fn step(&self, op: &Ptycho, data: &[Array4<f64>], state: &mut PtychoState) -> Result<f64, PtychoError> {
        lstsq::lstsq_grad(op, data, state, &self.options)
    }

    fn method_name(&self) -> &str {
        "Least-squares gradient (lstsq)"
    }
}

/// Conjugate-gradient solver.
#[derive(Debug, Clone, Default)]
pub struct CgradSolver {
    pub options: CgradOptions,
}

impl CgradSolver {
    pub fn new(options: CgradOptions) -> Self {
        Self { options }
    }
}

impl PtychoSolver for CgradSolver {
    fn step(&self, op: &Ptycho, data: &[Array4<f64>], state: &mut PtychoState) -> Result<f64, PtychoError> {
        cgrad::cgrad(op, data, state, &self.options)
    }

    fn method_name(&self) -> &str {
        "Conjugate gradient (cgrad)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_context_wraps_and_unwraps() {
        let err = PtychoError::NonFiniteEigenWeights { mode: 1, component: 2 }.at_iteration(7);
        assert!(err.is_numerical_failure());
        assert!(matches!(
            err.root(),
            PtychoError::NonFiniteEigenWeights { mode: 1, component: 2 }
        ));
        let message = err.to_string();
        assert!(message.contains("Iteration 7"), "{}", message);
        assert!(message.contains("mode 1"), "{}", message);
    }

    #[test]
    fn test_shape_errors_are_not_numerical() {
        let err = PtychoError::DeviceCount { found: 2 }.at_iteration(0);
        assert!(!err.is_numerical_failure());
        assert!(matches!(err.root(), PtychoError::DeviceCount { found: 2 }));
    }

    #[test]
    fn test_algorithm_names_round_trip_through_serde() {
        for algorithm in Algorithm::ALL {
            let json = serde_json::to_string(&algorithm).unwrap();
            assert_eq!(json, format!("\"{}\"", algorithm.name()));
        }
    }
}
