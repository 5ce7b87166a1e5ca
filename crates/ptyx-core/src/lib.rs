//! # Ptyx Core
//!
//! Ptychographic phase retrieval: recovering a complex object and the
//! illumination probe from far-field diffraction intensities recorded at
//! overlapping scan positions.
//!
//! ## Architecture
//!
//! Reconstruction methods implement the [`solver::PtychoSolver`] trait. The
//! primary method is the linearized least-squares solver
//! ([`solver::lstsq::lstsq_grad`]), which jointly updates the object, the
//! probe modes, and a low-rank basis of position-dependent probe variations
//! (eigen-probes). A conjugate-gradient method ([`solver::cgrad::cgrad`]) is
//! also available. [`reconstruct::reconstruct`] drives either one for a
//! number of outer iterations.
//!
//! ## Modules
//!
//! - [`types`]: Reconstruction state and solver options.
//! - [`operators`]: Patch, diffraction, propagation, and resampling operators.
//! - [`probe`]: Varying probes, eigen-probe updates, mode orthogonalization.
//! - [`opt`]: Line search and conjugate-gradient routines.
//! - [`solver`]: Solver trait, error type, and the two methods.
//! - [`reconstruct`]: Outer iteration loop.
//! - [`sim`]: Synthetic datasets.
//! - [`linalg`]: Complex inner products and projections.

pub mod linalg;
pub mod operators;
pub mod opt;
pub mod probe;
pub mod reconstruct;
pub mod sim;
pub mod solver;
pub mod types;

pub use operators::{Flow, Interpolation, NoiseModel, Ptycho};
pub use reconstruct::{reconstruct, ReconstructionParams, ReconstructionReport};
pub use solver::{Algorithm, CgradSolver, LstsqSolver, PtychoError, PtychoSolver};
pub use types::{CgradOptions, LstsqOptions, PtychoState};
