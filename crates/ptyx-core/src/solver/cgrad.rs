//! Nonlinear conjugate-gradient solver.
//!
//! The object is minimized first with the probe fixed, then each probe mode
//! in turn with the object and the remaining modes fixed. Each unknown gets
//! `cg_iter` Dai-Yuan conjugate-gradient steps with a backtracking line
//! search.

use log::{debug, warn};
use ndarray::{s, Array3, Array4, ArrayView3, ArrayView4, Axis};
use num_complex::Complex64;

use super::PtychoError;
use crate::linalg::mean_over;
use crate::operators::Ptycho;
use crate::opt::conjugate_gradient;
use crate::types::{single_device, CgradOptions, DeviceMut, PtychoState};

/// Run one conjugate-gradient iteration, updating `state` in place.
///
/// # Returns
/// The cost after the last unknown was updated.
pub fn cgrad(
    op: &Ptycho,
    data: &[Array4<f64>],
    state: &mut PtychoState,
    options: &CgradOptions,
) -> Result<f64, PtychoError> {
    let data = single_device(data)?;
    let device = state.device_mut()?;
    device.validate(op, data)?;
    if options.recover_positions {
        warn!("cgrad does not refine scan positions; positions are left unchanged");
    }

    let DeviceMut { psi, probe, scan, eigen } = device;
    if eigen.is_some() {
        warn!("cgrad reconstructs the common probe only; eigen probes are left unchanged");
    }
    let data = data.view();
    let scan = scan.view();

    let mut cost = None;
    if options.recover_psi {
        let (updated, value) = update_object(op, data, scan, psi.clone(), probe, options)?;
        *psi = updated;
        debug!("object cost {:.6e}", value);
        cost = Some(value);
    }

    if options.recover_probe {
        for m in 0..probe.shape()[1] {
            let (updated, value) = update_probe_mode(op, data, scan, psi.view(), probe, m, options)?;
            probe.slice_mut(s![.., m, .., ..]).assign(&updated);
            debug!("probe mode {} cost {:.6e}", m, value);
            cost = Some(value);
        }
    }

    match cost {
        Some(value) => Ok(value),
        None => op.cost(data, psi.view(), scan, probe.view().insert_axis(Axis(1))),
    }
}

fn update_object(
    op: &Ptycho,
    data: ArrayView4<'_, f64>,
    scan: ArrayView3<'_, f64>,
    psi: Array3<Complex64>,
    probe: &Array4<Complex64>,
    options: &CgradOptions,
) -> Result<(Array3<Complex64>, f64), PtychoError> {
    let probe = probe.view().insert_axis(Axis(1));
    conjugate_gradient(
        psi,
        |x: &Array3<Complex64>| op.cost(data, x.view(), scan, probe),
        |x: &Array3<Complex64>| op.grad(data, x.view(), scan, probe),
        options.cg_iter,
        options.object_step_length,
    )
}

/// Probe array with mode `m` replaced by `mode`, with a unit position axis.
fn with_mode(probe: &Array4<Complex64>, m: usize, mode: &Array3<Complex64>) -> ndarray::Array5<Complex64> {
    let mut trial = probe.clone();
    trial.slice_mut(s![.., m, .., ..]).assign(mode);
    trial.insert_axis(Axis(1))
}

fn update_probe_mode(
    op: &Ptycho,
    data: ArrayView4<'_, f64>,
    scan: ArrayView3<'_, f64>,
    psi: ArrayView3<'_, Complex64>,
    probe: &Array4<Complex64>,
    m: usize,
    options: &CgradOptions,
) -> Result<(Array3<Complex64>, f64), PtychoError> {
    conjugate_gradient(
        probe.slice(s![.., m, .., ..]).to_owned(),
        |x: &Array3<Complex64>| op.cost(data, psi, scan, with_mode(probe, m, x).view()),
        |x: &Array3<Complex64>| {
            let grad = op.grad_probe(data, psi, scan, with_mode(probe, m, x).view())?;
            Ok(mean_over(&grad.slice(s![.., .., m, .., ..]), Axis(1)))
        },
        options.cg_iter,
        options.probe_step_length,
    )
}
