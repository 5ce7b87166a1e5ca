//! CPU compute backend: rustfft plans, Rayon across images.

use std::sync::{Arc, Mutex};

use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};

use crate::backend::{
    check_image_stack, BackendType, ComputeBackend, ComputeError, DeviceInfo, FftDirection,
};

/// CPU backend that parallelises batched FFTs across threads via Rayon.
pub struct CpuBackend {
    num_threads: usize,
    planner: Mutex<FftPlanner<f64>>,
}

impl CpuBackend {
    /// Create a new CPU backend using all available threads.
    pub fn new() -> Self {
        Self::with_threads(rayon::current_num_threads())
    }

    /// Create a CPU backend reporting a specified thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            planner: Mutex::new(FftPlanner::new()),
        }
    }

    fn plans(
        &self,
        shape: (usize, usize),
        direction: FftDirection,
    ) -> Result<(Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>), ComputeError> {
        let mut planner = self
            .planner
            .lock()
            .map_err(|e| ComputeError::DeviceError(format!("FFT planner poisoned: {}", e)))?;
        let (rows, cols) = shape;
        Ok(match direction {
            FftDirection::Forward => (planner.plan_fft_forward(cols), planner.plan_fft_forward(rows)),
            FftDirection::Inverse => (planner.plan_fft_inverse(cols), planner.plan_fft_inverse(rows)),
        })
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn fft2(
        &self,
        buffer: &mut [Complex64],
        shape: (usize, usize),
        direction: FftDirection,
    ) -> Result<(), ComputeError> {
        check_image_stack(buffer.len(), shape)?;
        let (row_fft, col_fft) = self.plans(shape, direction)?;
        let (rows, cols) = shape;
        let scale = 1.0 / ((rows * cols) as f64).sqrt();

        buffer.par_chunks_mut(rows * cols).for_each(|image| {
            fft2_image(image, rows, cols, row_fft.as_ref(), col_fft.as_ref(), scale);
        });
        Ok(())
    }
}

/// Row transforms in place, then column transforms through a transposed scratch.
fn fft2_image(
    image: &mut [Complex64],
    rows: usize,
    cols: usize,
    row_fft: &dyn Fft<f64>,
    col_fft: &dyn Fft<f64>,
    scale: f64,
) {
    row_fft.process(image);

    let mut transposed = vec![Complex64::default(); rows * cols];
    for r in 0..rows {
        for c in 0..cols {
            transposed[c * rows + r] = image[r * cols + c];
        }
    }
    col_fft.process(&mut transposed);

    for r in 0..rows {
        for c in 0..cols {
            image[r * cols + c] = transposed[c * rows + r] * scale;
        }
    }
}
