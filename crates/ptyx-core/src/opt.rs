//! Generic optimization routines used by the conjugate-gradient solver.
//!
//! The routines operate on complex arrays of any dimension. Cost and
//! gradient evaluations are fallible closures so that operator failures
//! propagate out of the inner loops unchanged.

use log::{debug, warn};
use ndarray::{Array, Dimension};
use num_complex::Complex64;

use crate::linalg::inner;
use crate::solver::PtychoError;

/// Smallest step accepted by [`line_search`] before it gives up.
const MIN_STEP: f64 = 1e-32;

/// Backtracking line search along `d` from `x`.
///
/// Starting at `step_length`, the step is multiplied by `step_shrink` until
/// `f(x + step * d) <= f(x)`.
///
/// # Returns
/// `(step, cost)` of the accepted point. If the step drops below `1e-32` a
/// warning is logged and `(0.0, f(x))` is returned.
pub fn line_search<D, F>(
    mut f: F,
    x: &Array<Complex64, D>,
    d: &Array<Complex64, D>,
    step_length: f64,
    step_shrink: f64,
) -> Result<(f64, f64), PtychoError>
where
    D: Dimension,
    F: FnMut(&Array<Complex64, D>) -> Result<f64, PtychoError>,
{
    assert!(
        step_shrink > 0.0 && step_shrink < 1.0,
        "step_shrink must be in (0, 1), got {}",
        step_shrink
    );
    let fx = f(x)?;
    let mut step = step_length;
    loop {
        let candidate = x + &d.mapv(|z| z * step);
        let fxsd = f(&candidate)?;
        if fxsd <= fx {
            return Ok((step, fxsd));
        }
        step *= step_shrink;
        if step < MIN_STEP {
            warn!("line search failed to find a descent step");
            return Ok((0.0, fx));
        }
    }
}

/// Dai-Yuan conjugate search direction.
///
/// $$d_1 = -g_1 + d_0 \frac{\|g_1\|^2}{\operatorname{Re}\langle d_0, g_1 - g_0 \rangle}$$
///
/// Without a previous direction this is steepest descent.
pub fn direction_dy<D: Dimension>(
    grad1: &Array<Complex64, D>,
    previous: Option<(&Array<Complex64, D>, &Array<Complex64, D>)>,
) -> Array<Complex64, D> {
    match previous {
        None => grad1.mapv(|g| -g),
        Some((grad0, dir)) => {
            let change = grad1 - grad0;
            let beta = inner(grad1, grad1).re / (inner(dir, &change).re + 1e-32);
            dir.mapv(|z| z * beta) - grad1
        }
    }
}

/// Minimize `cost` from `x` with `num_iter` nonlinear conjugate-gradient steps.
///
/// # Returns
/// The final point and its cost.
pub fn conjugate_gradient<D, C, G>(
    mut x: Array<Complex64, D>,
    mut cost: C,
    mut grad: G,
    num_iter: usize,
    step_length: f64,
) -> Result<(Array<Complex64, D>, f64), PtychoError>
where
    D: Dimension,
    C: FnMut(&Array<Complex64, D>) -> Result<f64, PtychoError>,
    G: FnMut(&Array<Complex64, D>) -> Result<Array<Complex64, D>, PtychoError>,
{
    let mut last: Option<(Array<Complex64, D>, Array<Complex64, D>)> = None;
    let mut current = cost(&x)?;
    for i in 0..num_iter {
        let grad1 = grad(&x)?;
        let dir = direction_dy(&grad1, last.as_ref().map(|(g, d)| (g, d)));
        let (gamma, value) = line_search(&mut cost, &x, &dir, step_length, 0.5)?;
        x.scaled_add(Complex64::new(gamma, 0.0), &dir);
        current = value;
        debug!("conjugate gradient step {}: gamma = {:.3e}, cost = {:.6e}", i, gamma, value);
        last = Some((grad1, dir));
    }
    Ok((x, current))
}
