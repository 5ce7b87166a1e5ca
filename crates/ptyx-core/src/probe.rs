//! Probe models: the common probe, its per-position variations, and mode
//! orthogonality.
//!
//! A position-varying probe is the common probe plus a weighted sum of
//! eigen-probes,
//!
//! $$P_{t,s,m} = P_{t,m} + \sum_c w_{t,s,c,m} \, E_{t,c,m}.$$
//!
//! The eigen-probes of each `(view, mode)` form an orthonormal set that is
//! refined a little every iteration from the residual probe gradient.

use ndarray::{s, Array4, Array5, ArrayView2, ArrayView3, ArrayView4, ArrayView5, ArrayViewMut3, Axis};
use num_complex::Complex64;
use rand::Rng;

use crate::linalg::{inner, mean_over, norm, projection};
use crate::sim::random_complex;

/// Assemble the probe seen at each scan position, `(ntheta, nscan, nmodes, P, P)`.
///
/// Without eigen state every position sees the common probe.
pub fn get_varying_probe(
    probe: ArrayView4<'_, Complex64>,
    eigen: Option<(ArrayView5<'_, Complex64>, ArrayView4<'_, f64>)>,
    nscan: usize,
) -> Array5<Complex64> {
    let (ntheta, nmodes, p, _) = probe.dim();
    let mut varying = Array5::<Complex64>::zeros((ntheta, nscan, nmodes, p, p));
    for s in 0..nscan {
        varying.slice_mut(s![.., s, .., .., ..]).assign(&probe);
    }

    if let Some((eigen_probe, weights)) = eigen {
        let ncomp = eigen_probe.shape()[1];
        for t in 0..ntheta {
            for s in 0..nscan {
                for c in 0..ncomp {
                    for m in 0..nmodes {
                        let w = weights[[t, s, c, m]];
                        varying
                            .slice_mut(s![t, s, m, .., ..])
                            .scaled_add(Complex64::new(w, 0.0), &eigen_probe.slice(s![t, c, m, .., ..]));
                    }
                }
            }
        }
    }
    varying
}

/// Refine one eigen-probe from the residual probe gradient.
///
/// # Arguments
/// * `residual` - Probe gradient minus its position mean, `(ntheta, nscan, P, P)`.
/// * `eigen_probe` - The component being refined, `(ntheta, P, P)`; updated in place.
/// * `weights` - Its current weights, `(ntheta, nscan)`.
/// * `beta` - Learning rate.
///
/// Each view's component becomes
/// $\operatorname{normalize}(E + \beta \operatorname{mean}_s(R_s w_s))$.
/// A component with zero norm becomes NaN, which the weight update reports.
pub fn update_eigen_probe(
    residual: ArrayView4<'_, Complex64>,
    mut eigen_probe: ArrayViewMut3<'_, Complex64>,
    weights: ArrayView2<'_, f64>,
    beta: f64,
) {
    let (ntheta, nscan, _, _) = residual.dim();
    let scale = beta / nscan.max(1) as f64;
    for t in 0..ntheta {
        let mut component = eigen_probe.index_axis_mut(Axis(0), t);
        for s in 0..nscan {
            component.scaled_add(
                Complex64::new(weights[[t, s]] * scale, 0.0),
                &residual.slice(s![t, s, .., ..]),
            );
        }
        let length = norm(&component);
        component.mapv_inplace(|z| z / length);
    }
}

/// Remove the component along `eigen_probe` from every residual image.
///
/// `residual` is `(ntheta, nscan, P, P)` and `eigen_probe` is `(ntheta, P, P)`.
pub fn deflate(residual: &mut Array4<Complex64>, eigen_probe: ArrayView3<'_, Complex64>) {
    let (ntheta, nscan, _, _) = residual.dim();
    for t in 0..ntheta {
        let basis = eigen_probe.index_axis(Axis(0), t);
        for s in 0..nscan {
            let mut image = residual.slice_mut(s![t, s, .., ..]);
            let along = projection(&image, &basis);
            image -= &along;
        }
    }
}

/// Make the probe modes of each view mutually orthogonal (Gram-Schmidt in mode order).
///
/// Modes are not normalized. Modes with zero energy are left as they are.
pub fn orthogonalize_gs(probe: &mut Array4<Complex64>) {
    let (ntheta, nmodes, _, _) = probe.dim();
    for t in 0..ntheta {
        for m in 1..nmodes {
            for k in 0..m {
                let basis = probe.slice(s![t, k, .., ..]).to_owned();
                if inner(&basis, &basis).re == 0.0 {
                    continue;
                }
                let mut mode = probe.slice_mut(s![t, m, .., ..]);
                let along = projection(&mode, &basis);
                mode -= &along;
            }
        }
    }
}

/// Random orthonormal eigen-probes with zero weights.
///
/// # Returns
/// `(eigen_probe, eigen_weights)` with shapes `(ntheta, ncomp, nmodes, P, P)`
/// and `(ntheta, nscan, ncomp, nmodes)`.
pub fn init_eigen(
    ntheta: usize,
    nscan: usize,
    ncomp: usize,
    nmodes: usize,
    probe_shape: usize,
    rng: &mut impl Rng,
) -> (Array5<Complex64>, Array4<f64>) {
    let mut eigen_probe: Array5<Complex64> =
        random_complex((ntheta, ncomp, nmodes, probe_shape, probe_shape), rng);
    for t in 0..ntheta {
        for m in 0..nmodes {
            for c in 0..ncomp {
                for k in 0..c {
                    let basis = eigen_probe.slice(s![t, k, m, .., ..]).to_owned();
                    let mut component = eigen_probe.slice_mut(s![t, c, m, .., ..]);
                    let along = projection(&component, &basis);
                    component -= &along;
                }
                let mut component = eigen_probe.slice_mut(s![t, c, m, .., ..]);
                let length = norm(&component);
                component.mapv_inplace(|z| z / length);
            }
        }
    }
    (eigen_probe, Array4::zeros((ntheta, nscan, ncomp, nmodes)))
}

/// Recentre eigen weights of one `(component, mode)` to zero mean over positions.
///
/// `weights` is `(ntheta, nscan)`.
pub fn recenter_weights(mut weights: ndarray::ArrayViewMut2<'_, f64>) {
    let mean = mean_over(&weights, Axis(1));
    for (mut row, m) in weights.outer_iter_mut().zip(mean.iter()) {
        row -= *m;
    }
}
