//! Low-level numeric helpers shared by the analysis modules

pub mod fft;
pub mod polynomial;

pub use fft::Fft;
