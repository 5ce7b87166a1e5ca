//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait abstracts over execution environments so that
//! the reconstruction code in `ptyx-core` stays device-agnostic. The hot path
//! of every ptychography iteration is a batch of small 2D FFTs (one per scan
//! position and probe mode), so that is what backends provide.

use num_complex::Complex64;
use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Buffer of length {len} is not a whole number of {rows}x{cols} images")]
    Layout { len: usize, rows: usize, cols: usize },

    #[error("Device error: {0}")]
    DeviceError(String),
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Cpu,
}

/// Direction of a Fourier transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

/// Abstraction over compute backends.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Orthonormal 2D FFT of every image in a contiguous stack, in place.
    ///
    /// `buffer` holds `buffer.len() / (rows * cols)` row-major images of shape
    /// `(rows, cols)` back to back. Both directions are scaled by
    /// $1/\sqrt{\text{rows} \cdot \text{cols}}$, so the inverse transform is the
    /// exact adjoint of the forward one.
    fn fft2(
        &self,
        buffer: &mut [Complex64],
        shape: (usize, usize),
        direction: FftDirection,
    ) -> Result<(), ComputeError>;
}

/// Check that `len` is a whole number of `(rows, cols)` images.
pub fn check_image_stack(len: usize, shape: (usize, usize)) -> Result<usize, ComputeError> {
    let (rows, cols) = shape;
    let image = rows * cols;
    if image == 0 || len % image != 0 {
        return Err(ComputeError::Layout { len, rows, cols });
    }
    Ok(len / image)
}
