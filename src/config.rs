//! Analysis configuration
//!
//! Every stage has its own section with defaults suitable for adult speech.
//! All structs deserialize with `#[serde(default)]`, so a partial document
//! only needs the values that differ:
//!
//! ```json
//! {
//!   "tracking": "viterbi",
//!   "lpc": { "method": "burg", "order": 12 },
//!   "pitch": { "f0_min": 75.0, "f0_max": 400.0 }
//! }
//! ```
//!
//! Loading and persisting the document is left to the caller.

use serde::{Deserialize, Serialize};

use crate::formant::{FormantSolver, MergerRefinement};
use crate::lpc::LpcMethod;
use crate::pitch::PitchMethod;
use crate::roots::RootMethod;
use crate::window::WindowShape;
use crate::{Result, TrackError};

fn invalid(message: impl Into<String>) -> TrackError {
    TrackError::InvalidParameter(message.into())
}

/// LPC estimation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LpcConfig {
    /// Estimation method
    pub method: LpcMethod,
    /// Requested model order
    pub order: usize,
    /// Root finder for the model polynomial
    pub root_method: RootMethod,
}

impl Default for LpcConfig {
    fn default() -> Self {
        Self {
            method: LpcMethod::Autocorrelation,
            order: 10,
            root_method: RootMethod::Eigen,
        }
    }
}

impl LpcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.order == 0 {
            return Err(invalid("LPC order must be at least 1"));
        }
        Ok(())
    }
}

/// Formant candidate extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormantConfig {
    /// Which root-to-formant strategy to use
    pub solver: FormantSolver,
    /// How a merged peak is re-rooted once two poles are counted under it
    pub refinement: MergerRefinement,
    /// Smallest root magnitude accepted as a resonance
    pub min_magnitude: f64,
    /// Gap to the next candidate (Hz) above which a peak is suspected merged
    pub merger_gap_hz: f64,
    /// A first candidate followed by one above this frequency is suspected merged
    pub first_formant_ceiling_hz: f64,
    /// Lower frequency limit of the pole-counting sector
    pub min_sector_hz: f64,
    /// Outer radius of the pole-counting contour
    pub sector_radius: f64,
    /// Bisection depth cap of the pole-counting contour
    pub max_count_depth: usize,
    /// Magnitude of the seed used to re-root a merged peak
    pub seed_magnitude: f64,
}

impl Default for FormantConfig {
    fn default() -> Self {
        Self {
            solver: FormantSolver::PeakMerger,
            refinement: MergerRefinement::Bairstow,
            min_magnitude: 0.7,
            merger_gap_hz: 700.0,
            first_formant_ceiling_hz: 1800.0,
            min_sector_hz: 200.0,
            sector_radius: 2.0,
            max_count_depth: 10,
            seed_magnitude: 0.9,
        }
    }
}

impl FormantConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_magnitude > 0.0 && self.min_magnitude < 1.0) {
            return Err(invalid("formant min_magnitude must lie in (0, 1)"));
        }
        if !(self.seed_magnitude > 0.0 && self.seed_magnitude < 1.0) {
            return Err(invalid("formant seed_magnitude must lie in (0, 1)"));
        }
        if !(self.merger_gap_hz > 0.0) || !(self.sector_radius > 1.0) {
            return Err(invalid("merger gap must be positive and sector radius above 1"));
        }
        if self.max_count_depth == 0 {
            return Err(invalid("pole counting depth must be at least 1"));
        }
        Ok(())
    }
}

/// Formant Kalman filter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Number of tracked formants N (state size 2N)
    pub num_formants: usize,
    /// Number of cepstral coefficients observed per frame
    pub cepstral_order: usize,
    /// Initial formant frequencies in Hz
    pub initial_frequencies: Vec<f64>,
    /// Initial formant bandwidths in Hz
    pub initial_bandwidths: Vec<f64>,
    /// Random-walk standard deviation of frequencies per frame (Hz)
    pub frequency_noise_std: f64,
    /// Random-walk standard deviation of bandwidths per frame (Hz)
    pub bandwidth_noise_std: f64,
    /// Scale of the observation noise `R_ii = scale / i`
    pub observation_noise_scale: f64,
    /// Distance from 0 Hz and from Nyquist used when re-sorting the state
    pub frequency_margin_hz: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            num_formants: 3,
            cepstral_order: 15,
            initial_frequencies: vec![500.0, 1500.0, 2500.0],
            initial_bandwidths: vec![80.0, 120.0, 160.0],
            frequency_noise_std: 320.0,
            bandwidth_noise_std: 100.0,
            observation_noise_scale: 1.0,
            frequency_margin_hz: 60.0,
        }
    }
}

impl KalmanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_formants == 0 || self.cepstral_order == 0 {
            return Err(invalid("Kalman filter needs at least one formant and one cepstral coefficient"));
        }
        if self.initial_frequencies.len() != self.num_formants
            || self.initial_bandwidths.len() != self.num_formants
        {
            return Err(invalid(format!(
                "Kalman initial state needs {} frequencies and bandwidths",
                self.num_formants
            )));
        }
        if !(self.frequency_noise_std > 0.0)
            || !(self.bandwidth_noise_std > 0.0)
            || !(self.observation_noise_scale >= 0.0)
        {
            return Err(invalid("Kalman noise scales must be positive"));
        }
        Ok(())
    }
}

/// Viterbi formant track assignment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormantTrackingConfig {
    /// Number of simultaneous tracks K
    pub num_tracks: usize,
    /// Reference frequency of each track in Hz
    pub reference_frequencies: Vec<f64>,
    /// Cost per kHz of deviation from the track reference
    pub frequency_cost: f64,
    /// Cost weight of the bandwidth/frequency ratio
    pub bandwidth_cost: f64,
    /// Cost per octave of frame-to-frame frequency jump
    pub octave_jump_cost: f64,
}

impl Default for FormantTrackingConfig {
    fn default() -> Self {
        Self {
            num_tracks: 3,
            reference_frequencies: vec![550.0, 1650.0, 2750.0, 3850.0, 4950.0],
            frequency_cost: 1.0,
            bandwidth_cost: 1.0,
            octave_jump_cost: 2.0,
        }
    }
}

impl FormantTrackingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_tracks == 0 {
            return Err(invalid("at least one formant track is required"));
        }
        if self.reference_frequencies.len() < self.num_tracks {
            return Err(invalid(format!(
                "{} tracks need as many reference frequencies, got {}",
                self.num_tracks,
                self.reference_frequencies.len()
            )));
        }
        if self.frequency_cost < 0.0 || self.bandwidth_cost < 0.0 || self.octave_jump_cost < 0.0 {
            return Err(invalid("tracking costs must be non-negative"));
        }
        Ok(())
    }
}

/// Pitch candidate and path settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Candidate generator
    pub method: PitchMethod,
    /// Lowest F0 searched (Hz)
    pub f0_min: f64,
    /// Highest F0 searched (Hz)
    pub f0_max: f64,
    /// Analysis frame length for pitch (s); must cover the longest period
    /// plus the correlation window
    pub frame_length: f64,
    /// Correlation window length (s)
    pub correlation_window: f64,
    /// Peaks below this fraction of the frame maximum are discarded
    pub candidate_threshold: f64,
    /// Linear penalty on long lags
    pub lag_weight: f64,
    /// Weight of the log-frequency jump between voiced frames
    pub frequency_weight: f64,
    /// Fixed cost of a voicing state change
    pub voicing_transition_cost: f64,
    /// Weight of the energy ratio in voicing changes
    pub amplitude_change_cost: f64,
    /// Weight of the spectral change in voicing changes
    pub spectral_change_cost: f64,
    /// Bias added to the unvoiced hypothesis
    pub voicing_bias: f64,
    /// Cost of an octave jump relative to a free one
    pub doubling_cost: f64,
    /// Candidates kept per frame, the unvoiced one included
    pub max_candidates: usize,
    /// YIN absolute threshold on the normalized difference
    pub yin_threshold: f64,
    /// MPM picks the first key maximum above this fraction of the highest
    pub mpm_cutoff: f64,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            method: PitchMethod::Rapt,
            f0_min: 60.0,
            f0_max: 600.0,
            frame_length: 0.04,
            correlation_window: 0.0075,
            candidate_threshold: 0.3,
            lag_weight: 0.3,
            frequency_weight: 0.02,
            voicing_transition_cost: 0.005,
            amplitude_change_cost: 0.5,
            spectral_change_cost: 0.5,
            voicing_bias: 0.0,
            doubling_cost: 0.35,
            max_candidates: 20,
            yin_threshold: 0.1,
            mpm_cutoff: 0.93,
        }
    }
}

impl PitchConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.f0_min > 0.0 && self.f0_min < self.f0_max) {
            return Err(invalid(format!(
                "pitch range must satisfy 0 < f0_min < f0_max, got {}..{}",
                self.f0_min, self.f0_max
            )));
        }
        if !(self.candidate_threshold > 0.0 && self.candidate_threshold < 1.0) {
            return Err(invalid("pitch candidate_threshold must lie in (0, 1)"));
        }
        if !(self.correlation_window > 0.0) || !(self.frame_length > 0.0) {
            return Err(invalid("pitch window lengths must be positive"));
        }
        if self.frame_length < 1.0 / self.f0_min + self.correlation_window {
            return Err(invalid(format!(
                "pitch frame of {} s cannot hold a {} Hz period plus the correlation window",
                self.frame_length, self.f0_min
            )));
        }
        if self.max_candidates < 2 {
            return Err(invalid("pitch needs room for a voiced and the unvoiced candidate"));
        }
        if !(self.yin_threshold > 0.0 && self.yin_threshold < 1.0)
            || !(self.mpm_cutoff > 0.0 && self.mpm_cutoff <= 1.0)
        {
            return Err(invalid("pitch yin_threshold must lie in (0, 1) and mpm_cutoff in (0, 1]"));
        }
        Ok(())
    }
}

/// How formant candidates become formant tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormantTracking {
    /// Lowest candidates of each frame, no tracking
    Raw,
    /// Extended Kalman filter on the LPC cepstrum
    #[default]
    Kalman,
    /// Viterbi assignment over voiced segments
    Viterbi,
}

/// Complete analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Formant analysis frame length (s)
    pub frame_length: f64,
    /// Time between frames (s)
    pub time_step: f64,
    /// Sample rate formant analysis runs at; higher-rate input is resampled
    pub formant_sample_rate: f64,
    /// Pre-emphasis corner frequency (Hz); 0 disables it
    pub pre_emphasis_hz: f64,
    /// Analysis window for formant frames
    pub window: WindowShape,
    /// Formant tracking strategy
    pub tracking: FormantTracking,
    pub lpc: LpcConfig,
    pub formant: FormantConfig,
    pub kalman: KalmanConfig,
    pub formant_tracking: FormantTrackingConfig,
    pub pitch: PitchConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_length: 0.025,
            time_step: 0.01,
            formant_sample_rate: 11000.0,
            pre_emphasis_hz: 200.0,
            window: WindowShape::Gaussian,
            tracking: FormantTracking::Kalman,
            lpc: LpcConfig::default(),
            formant: FormantConfig::default(),
            kalman: KalmanConfig::default(),
            formant_tracking: FormantTrackingConfig::default(),
            pitch: PitchConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Check every section and the constraints between them
    pub fn validate(&self) -> Result<()> {
        if !(self.frame_length > 0.0) || !(self.time_step > 0.0) {
            return Err(invalid("frame length and time step must be positive"));
        }
        if !(self.formant_sample_rate > 0.0) || self.pre_emphasis_hz < 0.0 {
            return Err(invalid("formant sample rate must be positive and pre-emphasis non-negative"));
        }
        self.lpc.validate()?;
        self.formant.validate()?;
        self.kalman.validate()?;
        self.formant_tracking.validate()?;
        self.pitch.validate()?;

        let max_formants = self.lpc.order / 2;
        if self.formant_tracking.num_tracks > max_formants {
            return Err(TrackError::TooManyTracks {
                tracks: self.formant_tracking.num_tracks,
                candidates: max_formants,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        AnalysisConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_overrides_defaults() {
        let json = r#"{
            "tracking": "viterbi",
            "lpc": { "method": "burg", "order": 12 },
            "pitch": { "f0_min": 75.0, "f0_max": 400.0 }
        }"#;
        let config: AnalysisConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.tracking, FormantTracking::Viterbi);
        assert_eq!(config.lpc.method, LpcMethod::Burg);
        assert_eq!(config.lpc.order, 12);
        assert_eq!(config.lpc.root_method, RootMethod::Eigen);
        assert_eq!(config.pitch.f0_min, 75.0);
        assert_eq!(config.pitch.max_candidates, 20);
        assert_eq!(config.pitch.method, PitchMethod::Rapt);
        assert_eq!(config.kalman, KalmanConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_pitch_range_rejected() {
        let mut config = AnalysisConfig::default();
        config.pitch.f0_min = 500.0;
        config.pitch.f0_max = 100.0;
        assert!(matches!(config.validate(), Err(TrackError::InvalidParameter(_))));
    }

    #[test]
    fn test_pitch_method_from_json() {
        let config: PitchConfig = serde_json::from_str(r#"{ "method": "mpm", "mpm_cutoff": 0.9 }"#).unwrap();
        assert_eq!(config.method, PitchMethod::Mpm);
        assert_eq!(config.mpm_cutoff, 0.9);
        assert_eq!(config.yin_threshold, 0.1);

        let yin = PitchConfig {
            method: PitchMethod::Yin,
            yin_threshold: 1.5,
            ..PitchConfig::default()
        };
        assert!(matches!(yin.validate(), Err(TrackError::InvalidParameter(_))));
    }

    #[test]
    fn test_mismatched_kalman_seed_rejected() {
        let mut config = KalmanConfig::default();
        config.num_formants = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_more_tracks_than_formants_rejected() {
        let mut config = AnalysisConfig::default();
        config.lpc.order = 4;
        assert!(matches!(
            config.validate(),
            Err(TrackError::TooManyTracks { tracks: 3, candidates: 2 })
        ));
    }
}
