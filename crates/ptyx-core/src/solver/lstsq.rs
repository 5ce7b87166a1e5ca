//! Linearized least-squares solver for the object, probe, and eigen-probes.
//!
//! One call of [`lstsq_grad`] performs one outer iteration:
//!
//! 1. **Farfield step.** The modeled farplane is moved a fixed step down the
//!    intensity-fit gradient and propagated back to a nearplane target
//!    ([`update_wavefront`]).
//! 2. **Nearfield step.** For each probe mode in ascending order the object
//!    and probe search directions are built from the nearplane residual and
//!    their step sizes come from a closed-form 2×2 least-squares solve per
//!    scan position. Modes are swept Gauss-Seidel style: the object update
//!    of mode `m` is already visible to mode `m + 1`.
//!
//! When eigen-probes are present and the probe is recovered, each component
//! is refined from the residual probe gradient, its weights are refitted,
//! and the residual is deflated before the next component.
//!
//! Reference: M. Odstrcil, A. Menzel, M. Guizar-Sicairos, "Iterative
//! least-squares solver for generalized maximum-likelihood ptychography",
//! Opt. Express 26 (2018).

use log::{debug, info, warn};
use ndarray::{s, Array2, Array3, Array4, Array5, ArrayView3, ArrayView4, ArrayView5, Axis, Zip};
use num_complex::Complex64;

use super::PtychoError;
use crate::linalg::{mean_over, norm};
use crate::operators::{intensity, Ptycho};
use crate::probe::{deflate, get_varying_probe, recenter_weights, update_eigen_probe};
use crate::types::{single_device, DeviceMut, EigenMut, LstsqOptions, PtychoState};

/// Run one least-squares iteration, updating `state` in place.
///
/// # Arguments
/// * `op` - Forward model; its noise model selects the farfield cost.
/// * `data` - Measured intensities, one `(ntheta, nscan, D, D)` array per device.
/// * `state` - Object, probe, scan, and optional eigen state; mutated in place.
/// * `options` - Which unknowns to recover and the numeric tuning constants.
///
/// # Returns
/// The farfield cost of the state as it was before the update.
///
/// # Errors
/// [`PtychoError::NonFiniteEigenWeights`] when an eigen-weight update is not
/// finite. Shape and device-count problems are reported before any mutation.
pub fn lstsq_grad(
    op: &Ptycho,
    data: &[Array4<f64>],
    state: &mut PtychoState,
    options: &LstsqOptions,
) -> Result<f64, PtychoError> {
    let data = single_device(data)?;
    let device = state.device_mut()?;
    device.validate(op, data)?;
    if options.recover_positions {
        warn!("lstsq does not refine scan positions; positions are left unchanged");
    }

    let DeviceMut {
        psi,
        probe,
        scan,
        mut eigen,
    } = device;
    let nscan = scan.shape()[1];
    let varying = get_varying_probe(
        probe.view(),
        eigen.as_ref().map(|e| (e.probe.view(), e.weights.view())),
        nscan,
    );

    let (cost, target) = update_wavefront(op, data.view(), varying.view(), scan.view(), psi.view(), options)?;

    for m in 0..probe.shape()[1] {
        update_mode(
            op,
            m,
            target.view(),
            varying.view(),
            scan.view(),
            psi,
            probe,
            eigen.as_mut(),
            options,
        )?;
    }
    Ok(cost)
}

/// Farfield phase-retrieval step.
///
/// # Returns
/// The cost before the step and the nearplane target
/// `(ntheta, nscan, nmodes, D, D)` obtained by back-propagating the updated
/// farplane.
pub fn update_wavefront(
    op: &Ptycho,
    data: ArrayView4<'_, f64>,
    varying_probe: ArrayView5<'_, Complex64>,
    scan: ArrayView3<'_, f64>,
    psi: ArrayView3<'_, Complex64>,
    options: &LstsqOptions,
) -> Result<(f64, Array5<Complex64>), PtychoError> {
    let nearplane = op.diffraction.fwd(psi, scan, varying_probe);
    let mut farplane = op.propagation.fwd(nearplane.view())?;
    let modeled = intensity(farplane.view());
    let cost = op.propagation.cost(data, modeled.view());

    let grad = op.propagation.grad(data, farplane.view(), modeled.view());
    farplane.scaled_add(Complex64::new(-options.farfield_step, 0.0), &grad);

    if options.diagnostics {
        let after = op.propagation.cost(data, intensity(farplane.view()).view());
        debug!("farplane cost {:.6e} -> {:.6e}", cost, after);
    }

    let target = op.propagation.adj(farplane.view())?;
    Ok((cost, target))
}

/// Curvature and projected residual of one search direction, per position.
///
/// For a direction whose effect on the nearplane is `delta`:
///
/// $$A_{t,s} = \sum_{\text{px}} \bigl(|\delta|^2 + \text{offset}\bigr), \qquad
///   b_{t,s} = \sum_{\text{px}} \operatorname{Re}(\bar\delta \cdot \text{diff})$$
///
/// and then `A += stabilization * mean_s(A)` within each view.
#[derive(Debug, Clone)]
pub struct Curvature {
    /// Nearplane change of the direction, `(ntheta, nscan, P, P)`.
    pub delta: Array4<Complex64>,
    /// Stabilized curvature, `(ntheta, nscan)`.
    pub a: Array2<f64>,
    /// Residual projected onto the direction, `(ntheta, nscan)`.
    pub b: Array2<f64>,
}

impl Curvature {
    pub fn new(delta: Array4<Complex64>, diff: ArrayView4<'_, Complex64>, options: &LstsqOptions) -> Self {
        let pixels = (delta.shape()[2] * delta.shape()[3]) as f64;
        let mut a = sum_pixels(&delta.mapv(|z| z.norm_sqr())) + options.curvature_offset * pixels;
        let mean = mean_over(&a, Axis(1));
        for (mut row, &m) in a.outer_iter_mut().zip(mean.iter()) {
            row += options.step_stabilization * m;
        }
        let b = sum_pixels(&Zip::from(&delta).and(&diff).map_collect(|d, r| (d.conj() * r).re));
        Self { delta, a, b }
    }
}

/// Step sizes `(x1, x2)` for the object and probe directions, `(ntheta, nscan)` each.
///
/// With both unknowns the 2×2 system is solved in closed form:
///
/// $$x_1 = \overline{A_4 b_1 - A_2 b_2} / \det, \qquad
///   x_2 = \overline{A_1 b_2 - A_3 b_1} / \det$$
///
/// with $A_2 = \sum \delta_O \bar\delta_P$, $A_3 = \bar A_2$ and
/// $\det = A_1 A_4 - A_2 A_3$. The determinant is not regularized.
/// With a single unknown the step is `b / A`.
pub fn step_sizes(
    object: Option<&Curvature>,
    probe: Option<&Curvature>,
) -> (Option<Array2<Complex64>>, Option<Array2<Complex64>>) {
    match (object, probe) {
        (Some(o), Some(p)) => {
            let a2 = sum_pixels(&Zip::from(&o.delta).and(&p.delta).map_collect(|x, y| x * y.conj()));
            let det = Array2::from_shape_fn(a2.raw_dim(), |ix| {
                Complex64::from(o.a[ix] * p.a[ix]) - a2[ix] * a2[ix].conj()
            });
            let x1 = Array2::from_shape_fn(a2.raw_dim(), |ix| {
                (Complex64::from(p.a[ix] * o.b[ix]) - a2[ix] * p.b[ix]).conj() / det[ix]
            });
            let x2 = Array2::from_shape_fn(a2.raw_dim(), |ix| {
                (Complex64::from(o.a[ix] * p.b[ix]) - a2[ix].conj() * o.b[ix]).conj() / det[ix]
            });
            (Some(x1), Some(x2))
        }
        (Some(o), None) => (Some(single_step(o)), None),
        (None, Some(p)) => (None, Some(single_step(p))),
        (None, None) => (None, None),
    }
}

fn single_step(c: &Curvature) -> Array2<Complex64> {
    Zip::from(&c.b).and(&c.a).map_collect(|&b, &a| Complex64::new(b / a, 0.0))
}

fn sum_pixels<A: ndarray::LinalgScalar>(x: &Array4<A>) -> Array2<A> {
    x.sum_axis(Axis(3)).sum_axis(Axis(2))
}

/// Multiply every position of `stack` `(ntheta, nscan, P, P)` by the view's image `(ntheta, P, P)`.
fn times_per_view(stack: &Array4<Complex64>, images: ArrayView3<'_, Complex64>) -> Array4<Complex64> {
    let mut out = stack.clone();
    for (mut view, image) in out.outer_iter_mut().zip(images.outer_iter()) {
        view *= &image;
    }
    out
}

/// Nearfield least-squares step for probe mode `m`.
#[allow(clippy::too_many_arguments)]
fn update_mode(
    op: &Ptycho,
    m: usize,
    target: ArrayView5<'_, Complex64>,
    varying_probe: ArrayView5<'_, Complex64>,
    scan: ArrayView3<'_, f64>,
    psi: &mut Array3<Complex64>,
    probe: &mut Array4<Complex64>,
    eigen: Option<&mut EigenMut<'_>>,
    options: &LstsqOptions,
) -> Result<(), PtychoError> {
    let (pad, end) = (op.pad(), op.end());
    let (_, h, w) = psi.dim();

    let patches = op.diffraction.patches(psi.view(), scan);
    let target_m = target.slice(s![.., .., m, pad..end, pad..end]);
    let probe_m = varying_probe.slice(s![.., .., m, .., ..]);
    let diff = &target_m - &(&probe_m * &patches);
    info!("mode {}: nearplane residual {:.6e}", m, norm(&diff));

    let object: Option<(Array3<Complex64>, Curvature)> = if options.recover_psi {
        let grad = &diff * &probe_m.mapv(|z| z.conj());
        let common = op.diffraction.patches_adj(grad.view(), scan, (h, w));
        let delta = &op.diffraction.patches(common.view(), scan) * &probe_m;
        let curvature = Curvature::new(delta, diff.view(), options);
        Some((common, curvature))
    } else {
        None
    };

    let illumination: Option<(Array3<Complex64>, Curvature)> = if options.recover_probe {
        let grad = &diff * &patches.mapv(|z| z.conj());
        let common = mean_over(&grad, Axis(1));
        if let Some(eigen) = eigen {
            let mut residual = grad;
            for (mut view, mean) in residual.outer_iter_mut().zip(common.outer_iter()) {
                view -= &mean;
            }
            update_eigen(m, residual, &patches, &diff, eigen, options)?;
        }
        let delta = times_per_view(&patches, common.view());
        let curvature = Curvature::new(delta, diff.view(), options);
        Some((common, curvature))
    } else {
        None
    };

    let (x1, x2) = step_sizes(
        object.as_ref().map(|(_, c)| c),
        illumination.as_ref().map(|(_, c)| c),
    );

    if let (Some((common, _)), Some(x1)) = (&object, &x1) {
        let weighted = mean_over(x1, Axis(1));
        for ((mut view, grad), &step) in psi.outer_iter_mut().zip(common.outer_iter()).zip(weighted.iter()) {
            view.scaled_add(step, &grad);
        }
        debug!("mode {}: mean object step {:.3e}", m, weighted.mapv(|z| z.norm()).mean().unwrap_or(0.0));
    }
    if let (Some((common, _)), Some(x2)) = (&illumination, &x2) {
        let weighted = mean_over(x2, Axis(1));
        for (t, &step) in weighted.iter().enumerate() {
            probe
                .slice_mut(s![t, m, .., ..])
                .scaled_add(step, &common.index_axis(Axis(0), t));
        }
        debug!("mode {}: mean probe step {:.3e}", m, weighted.mapv(|z| z.norm()).mean().unwrap_or(0.0));
    }

    if options.diagnostics {
        let patches = op.diffraction.patches(psi.view(), scan);
        let modeled = times_per_view(&patches, probe.slice(s![.., m, .., ..]));
        let residual = norm(&(&modeled - &target_m));
        debug!("mode {}: nearplane residual after update {:.6e}", m, residual);
    }
    Ok(())
}

/// Refine every eigen-probe component of mode `m` and refit its weights.
///
/// Components are only renormalized, never re-orthogonalized, so they drift
/// away from orthogonality over many iterations. Deflating against component
/// `c` then no longer keeps the residual orthogonal to components `< c`.
fn update_eigen(
    m: usize,
    mut residual: Array4<Complex64>,
    patches: &Array4<Complex64>,
    diff: &Array4<Complex64>,
    eigen: &mut EigenMut<'_>,
    options: &LstsqOptions,
) -> Result<(), PtychoError> {
    let ncomp = eigen.probe.shape()[1];
    let pixels = (patches.shape()[2] * patches.shape()[3]).max(1) as f64;

    for c in 0..ncomp {
        update_eigen_probe(
            residual.view(),
            eigen.probe.slice_mut(s![.., c, m, .., ..]),
            eigen.weights.slice(s![.., .., c, m]),
            options.eigen_learning_rate,
        );

        let phi = times_per_view(patches, eigen.probe.slice(s![.., c, m, .., ..]));
        let numerator = sum_pixels(&Zip::from(diff).and(&phi).map_collect(|d, f| (d * f.conj()).re)) / pixels;
        let mut denominator = sum_pixels(&phi.mapv(|z| z.norm_sqr())) / pixels;
        let mean = mean_over(&denominator, Axis(1));
        for (mut row, &d) in denominator.outer_iter_mut().zip(mean.iter()) {
            row += options.weight_stabilization * d;
        }
        let update = numerator / denominator;
        if update.iter().any(|v| !v.is_finite()) {
            return Err(PtychoError::NonFiniteEigenWeights { mode: m, component: c });
        }

        let mut weights = eigen.weights.slice_mut(s![.., .., c, m]);
        weights += &update;
        recenter_weights(weights);

        if c + 1 < ncomp {
            deflate(&mut residual, eigen.probe.slice(s![.., c, m, .., ..]));
        }
    }
    Ok(())
}
