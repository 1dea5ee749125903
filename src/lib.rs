//! speechtrack-core: formant and pitch tracking for speech
//!
//! The crate turns frames of audio into formant and F0 tracks. It is built
//! from small stages that can also be used on their own:
//!
//! - [`lpc`] - all-pole models by autocorrelation, covariance or Burg
//! - [`roots`] - polynomial roots (companion eigenvalues, Laguerre, Bairstow)
//!   and argument-principle root counting
//! - [`formant`] - formant candidates from LPC roots, with merged-peak splitting
//! - [`kalman`] - extended Kalman filter tracking formants from the LPC cepstrum
//! - [`viterbi`] - minimum-cost paths over candidate lattices, single or multi-track
//! - [`pitch`] - RAPT pitch candidates and path
//! - [`analyzer`] - end-to-end analysis of a [`Sound`]
//!
//! # Core Types
//!
//! - [`Sound`] - Audio samples with sample rate
//! - [`LpcModel`] - Prediction coefficients and gain of one frame
//! - [`FormantFrame`] - Formant candidates of one frame
//! - [`Track`] - Per-frame optional values over time
//! - [`AnalysisConfig`] - Every tunable parameter, serde-deserializable

pub mod analyzer;
pub mod cepstrum;
pub mod config;
pub mod formant;
pub mod kalman;
pub mod lpc;
pub mod pitch;
pub mod roots;
pub mod sound;
pub mod track;
pub mod viterbi;
pub mod window;

pub mod utils;

// Re-export main types at crate root
pub use analyzer::{AnalysisResult, Analyzer};
pub use config::{AnalysisConfig, FormantTracking};
pub use formant::{FormantCandidate, FormantExtractor, FormantFrame, FormantSolver};
pub use kalman::{FormantKalmanTracker, SkipReason, StepOutcome};
pub use lpc::{LinearPredictor, LpcMethod, LpcModel};
pub use pitch::{PitchCandidate, PitchMethod, PitchTracker};
pub use roots::RootMethod;
pub use sound::{AudioFrame, Sound};
pub use track::{Track, TrackPoint};
pub use window::WindowShape;

use thiserror::Error;

/// Errors that can occur in speechtrack-core operations
///
/// Per-frame numeric trouble (a reduced LPC order, an unresolved merged
/// peak, a skipped Kalman update) is not an error; it is reported through
/// the returned values instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("No finite-cost path reaches frame {frame}")]
    TrackingInfeasible { frame: usize },

    #[error("{combinations} combinations of {tracks} tracks over {candidates} candidates exceed the limit")]
    CombinatorialOverflow {
        candidates: usize,
        tracks: usize,
        combinations: f64,
    },

    #[error("Cannot assign {tracks} tracks to {candidates} candidates")]
    TooManyTracks { tracks: usize, candidates: usize },

    #[error("Frame has {available} formants, {required} needed")]
    InsufficientFormants { required: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, TrackError>;
