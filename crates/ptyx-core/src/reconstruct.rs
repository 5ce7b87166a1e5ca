//! Outer reconstruction loop.

use log::info;
use ndarray::Array4;
use serde::{Deserialize, Serialize};

use crate::operators::Ptycho;
use crate::probe::orthogonalize_gs;
use crate::solver::{Algorithm, CgradSolver, LstsqSolver, PtychoError, PtychoSolver};
use crate::types::{CgradOptions, LstsqOptions, PtychoState};

/// Parameters of a full reconstruction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionParams {
    pub algorithm: Algorithm,
    /// Number of outer iterations.
    pub num_iter: usize,
    /// Gram-Schmidt the probe modes after every iteration.
    pub orthogonalize_probe: bool,
    pub lstsq: LstsqOptions,
    pub cgrad: CgradOptions,
}

impl Default for ReconstructionParams {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Lstsq,
            num_iter: 50,
            orthogonalize_probe: false,
            lstsq: LstsqOptions::default(),
            cgrad: CgradOptions::default(),
        }
    }
}

impl ReconstructionParams {
    /// The solver selected by [`ReconstructionParams::algorithm`].
    pub fn solver(&self) -> Box<dyn PtychoSolver> {
        match self.algorithm {
            Algorithm::Lstsq => Box::new(LstsqSolver::new(self.lstsq.clone())),
            Algorithm::Cgrad => Box::new(CgradSolver::new(self.cgrad.clone())),
        }
    }
}

/// Outcome of [`reconstruct`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionReport {
    /// Name of the solver that ran.
    pub method: String,
    /// Cost reported by each outer iteration, in order.
    pub costs: Vec<f64>,
}

impl ReconstructionReport {
    pub fn final_cost(&self) -> Option<f64> {
        self.costs.last().copied()
    }
}

/// Run `params.num_iter` iterations of the selected algorithm on `state`.
///
/// Errors are wrapped with the zero-based index of the failing iteration.
/// The state keeps every update made before the failure.
pub fn reconstruct(
    op: &Ptycho,
    data: &[Array4<f64>],
    state: &mut PtychoState,
    params: &ReconstructionParams,
) -> Result<ReconstructionReport, PtychoError> {
    let solver = params.solver();
    info!(
        "Reconstructing with {} for {} iterations",
        solver.method_name(),
        params.num_iter
    );

    let mut costs = Vec::with_capacity(params.num_iter);
    for iteration in 0..params.num_iter {
        let cost = solver
            .step(op, data, state)
            .map_err(|e| e.at_iteration(iteration))?;
        if params.orthogonalize_probe {
            state.probe.iter_mut().for_each(orthogonalize_gs);
        }
        info!("Iteration {}: cost = {:.6e}", iteration, cost);
        costs.push(cost);
    }

    Ok(ReconstructionReport {
        method: solver.method_name().to_string(),
        costs,
    })
}
