//! Linear operators of the ptychography forward model.
//!
//! | Operator | Maps |
//! |----------|------|
//! | [`Patch`] | object → windows at the scan positions |
//! | [`Diffraction`] | object, probe → illuminated nearplane tiles |
//! | [`Propagation`] | nearplane → farplane (orthonormal FFT) |
//! | [`Ptycho`] | object, probe → farplane, plus cost and gradients |
//! | [`Flow`] | image stack, displacement field → resampled stack |

pub mod diffraction;
pub mod flow;
pub mod patch;
pub mod propagation;
pub mod ptycho;

pub use diffraction::Diffraction;
pub use flow::{Flow, Interpolation};
pub use patch::Patch;
pub use propagation::{intensity, NoiseModel, Propagation};
pub use ptycho::Ptycho;
