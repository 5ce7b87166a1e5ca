//! Small complex linear-algebra helpers over `ndarray` views.

use std::ops::Div;

use ndarray::{Array, ArrayBase, Axis, Data, Dimension, LinalgScalar, RemoveAxis};
use num_complex::Complex64;

/// Complex inner product $\langle x, y \rangle = \sum \bar{x} y$.
pub fn inner<S1, S2, D>(x: &ArrayBase<S1, D>, y: &ArrayBase<S2, D>) -> Complex64
where
    S1: Data<Elem = Complex64>,
    S2: Data<Elem = Complex64>,
    D: Dimension,
{
    x.iter().zip(y.iter()).map(|(a, b)| a.conj() * b).sum()
}

/// Euclidean norm over every element.
pub fn norm<S, D>(x: &ArrayBase<S, D>) -> f64
where
    S: Data<Elem = Complex64>,
    D: Dimension,
{
    x.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt()
}

/// Vector projection of `a` onto `b`: $\frac{\langle b, a \rangle}{\langle b, b \rangle} b$.
pub fn projection<S1, S2, D>(a: &ArrayBase<S1, D>, b: &ArrayBase<S2, D>) -> Array<Complex64, D>
where
    S1: Data<Elem = Complex64>,
    S2: Data<Elem = Complex64>,
    D: Dimension,
{
    let coefficient = inner(b, a) / inner(b, b).re;
    b.mapv(|z| coefficient * z)
}

/// Mean along `axis`; an empty axis yields zeros instead of `None`.
pub fn mean_over<A, S, D>(x: &ArrayBase<S, D>, axis: Axis) -> Array<A, D::Smaller>
where
    A: LinalgScalar + Div<f64, Output = A>,
    S: Data<Elem = A>,
    D: Dimension + RemoveAxis,
{
    let n = x.len_of(axis).max(1) as f64;
    x.sum_axis(axis).mapv(|v| v / n)
}
