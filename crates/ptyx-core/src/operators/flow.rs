//! Dense resampling of image stacks along a displacement field.
//!
//! Each image of a `(..., H, W)` stack is sampled at
//! `(row, col) = (i + flow[..., i, j, 1], j + flow[..., i, j, 0])`. Samples
//! that fall outside the image read as zero. Images are independent and are
//! resampled in parallel.

use std::ops::{Add, Mul};

use ndarray::{s, Array, Array2, ArrayBase, ArrayView2, ArrayView3, Axis, Data, Dimension};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::solver::PtychoError;

/// Continuous interpolation kernel used between pixel centres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Linear,
    /// Catmull-Rom cubic convolution.
    Cubic,
}

/// Element types that can be interpolated with real weights.
pub trait Sample: Copy + Default + Add<Output = Self> + Mul<f64, Output = Self> + Send + Sync {}

impl<T> Sample for T where T: Copy + Default + Add<Output = T> + Mul<f64, Output = T> + Send + Sync {}

/// Resampling operator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flow {
    pub interpolation: Interpolation,
}

impl Flow {
    pub fn new(interpolation: Interpolation) -> Self {
        Self { interpolation }
    }

    /// Resample `f` along the displacement field `flow`.
    ///
    /// # Arguments
    /// * `f` - Image stack `(..., H, W)`.
    /// * `flow` - Displacements `(..., H, W, 2)`; channel 0 is the column shift,
    ///   channel 1 the row shift.
    ///
    /// # Panics
    /// If `flow` does not have the shape of `f` with a trailing axis of length 2.
    pub fn fwd<A, S1, S2, D>(
        &self,
        f: &ArrayBase<S1, D>,
        flow: &ArrayBase<S2, D::Larger>,
    ) -> Result<Array<A, D>, PtychoError>
    where
        A: Sample,
        S1: Data<Elem = A>,
        S2: Data<Elem = f64>,
        D: Dimension,
    {
        let shape = f.shape();
        let ndim = shape.len();
        assert!(ndim >= 2, "images need at least two axes");
        let mut expected = shape.to_vec();
        expected.push(2);
        assert_eq!(flow.shape(), expected.as_slice(), "flow does not match the image stack");

        let (h, w) = (shape[ndim - 2], shape[ndim - 1]);
        let count: usize = shape[..ndim - 2].iter().product();
        if count == 0 || h == 0 || w == 0 {
            return Ok(Array::default(f.raw_dim()));
        }

        let f = f.as_standard_layout();
        let flow = flow.as_standard_layout();
        let images: ArrayView3<'_, A> = f.view().into_shape((count, h, w))?;
        let fields = flow.view().into_shape((count, h, w, 2))?;

        let resampled: Vec<Array2<A>> = (0..count)
            .into_par_iter()
            .map(|k| {
                resample(
                    images.index_axis(Axis(0), k),
                    fields.slice(s![k, .., .., 1]),
                    fields.slice(s![k, .., .., 0]),
                    self.interpolation,
                )
            })
            .collect();

        let views: Vec<ArrayView2<'_, A>> = resampled.iter().map(|image| image.view()).collect();
        let stacked = ndarray::stack(Axis(0), &views)?;
        Ok(stacked.into_shape(f.raw_dim())?)
    }
}

fn resample<A: Sample>(
    image: ArrayView2<'_, A>,
    drow: ArrayView2<'_, f64>,
    dcol: ArrayView2<'_, f64>,
    interpolation: Interpolation,
) -> Array2<A> {
    let (h, w) = image.dim();
    Array2::from_shape_fn((h, w), |(i, j)| {
        let y = i as f64 + drow[[i, j]];
        let x = j as f64 + dcol[[i, j]];
        match interpolation {
            Interpolation::Linear => sample_linear(image, y, x),
            Interpolation::Cubic => sample_cubic(image, y, x),
        }
    })
}

fn pixel<A: Sample>(image: ArrayView2<'_, A>, row: isize, col: isize) -> A {
    let (h, w) = image.dim();
    if row < 0 || col < 0 || row as usize >= h || col as usize >= w {
        A::default()
    } else {
        image[[row as usize, col as usize]]
    }
}

fn sample_linear<A: Sample>(image: ArrayView2<'_, A>, y: f64, x: f64) -> A {
    if !(y.is_finite() && x.is_finite()) {
        return A::default();
    }
    let (r, c) = (y.floor(), x.floor());
    let (fy, fx) = (y - r, x - c);
    let (r, c) = (r as isize, c as isize);
    pixel(image, r, c) * ((1.0 - fy) * (1.0 - fx))
        + pixel(image, r, c + 1) * ((1.0 - fy) * fx)
        + pixel(image, r + 1, c) * (fy * (1.0 - fx))
        + pixel(image, r + 1, c + 1) * (fy * fx)
}

/// Catmull-Rom weights for taps at offsets -1, 0, 1, 2.
fn catmull_rom(t: f64) -> [f64; 4] {
    let (t2, t3) = (t * t, t * t * t);
    [
        0.5 * (-t3 + 2.0 * t2 - t),
        0.5 * (3.0 * t3 - 5.0 * t2 + 2.0),
        0.5 * (-3.0 * t3 + 4.0 * t2 + t),
        0.5 * (t3 - t2),
    ]
}

fn sample_cubic<A: Sample>(image: ArrayView2<'_, A>, y: f64, x: f64) -> A {
    if !(y.is_finite() && x.is_finite()) {
        return A::default();
    }
    let (r, c) = (y.floor(), x.floor());
    let (wy, wx) = (catmull_rom(y - r), catmull_rom(x - c));
    let (r, c) = (r as isize, c as isize);
    let mut value = A::default();
    for (di, &ky) in wy.iter().enumerate() {
        for (dj, &kx) in wx.iter().enumerate() {
            let weight = ky * kx;
            if weight != 0.0 {
                value = value + pixel(image, r + di as isize - 1, c + dj as isize - 1) * weight;
            }
        }
    }
    value
}
