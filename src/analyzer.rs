//! End-to-end formant and pitch analysis of a sound
//!
//! Formant frames come from the sound resampled to the formant analysis rate
//! and pre-emphasized, one windowed LPC fit per frame. Pitch frames are cut
//! from the original sound, centred on the same times, so every output track
//! shares one time axis. The pitch voicing decision gates the formant
//! trackers: the Kalman filter only updates on voiced frames, and the
//! Viterbi assignment only runs over voiced segments.

use crate::config::{AnalysisConfig, FormantTracking};
use crate::formant::{FormantExtractor, FormantFrame};
use crate::kalman::{FormantKalmanTracker, StepOutcome};
use crate::lpc::{LinearPredictor, LpcModel};
use crate::pitch::PitchTracker;
use crate::sound::Sound;
use crate::track::{track_voiced_segments, Track};
use crate::{Result, TrackError};

/// Tracks produced by [`Analyzer::analyze`]
#[derive(Debug, Clone, Default)]
pub struct AnalysisResult {
    /// F0 in Hz, `None` where unvoiced
    pub pitch: Track,
    /// One track per formant, lowest first
    pub formants: Vec<Track>,
    /// Formant candidates per frame; after Viterbi tracking, tracked frames
    /// hold exactly the assigned formants
    pub frames: Vec<FormantFrame>,
}

impl AnalysisResult {
    /// Frame centre times in seconds
    pub fn times(&self) -> Vec<f64> {
        self.pitch.points().iter().map(|p| p.time).collect()
    }

    /// Formant track `number` (1-based: F1, F2, ...)
    pub fn formant(&self, number: usize) -> Option<&Track> {
        number.checked_sub(1).and_then(|i| self.formants.get(i))
    }
}

/// Per-frame LPC analysis of the formant signal
struct FormantAnalysis {
    times: Vec<f64>,
    models: Vec<LpcModel>,
    frames: Vec<FormantFrame>,
    sample_rate: f64,
}

/// Runs the complete analysis with one configuration
pub struct Analyzer {
    config: AnalysisConfig,
    predictor: LinearPredictor,
    extractor: FormantExtractor,
    windowed: Vec<f64>,
}

impl Analyzer {
    /// # Errors
    /// The configuration is validated; see [`AnalysisConfig::validate`].
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            predictor: LinearPredictor::new(config.lpc.method),
            extractor: FormantExtractor::new(config.formant.clone()),
            windowed: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Analyse a whole sound
    ///
    /// An infeasible pitch path falls back to the best candidate of each
    /// frame; Viterbi segments that cannot be tracked keep their measured
    /// formants. Neither is reported as an error.
    pub fn analyze(&mut self, sound: &Sound) -> Result<AnalysisResult> {
        if !(sound.sample_rate() > 0.0) {
            return Err(TrackError::InvalidParameter(format!(
                "invalid sample rate {}",
                sound.sample_rate()
            )));
        }

        let FormantAnalysis {
            times,
            models,
            mut frames,
            sample_rate,
        } = self.formant_frames(sound);
        let pitch = self.pitch_values(sound, &times)?;
        let voiced: Vec<bool> = pitch.iter().map(Option::is_some).collect();

        let formants = match self.config.tracking {
            FormantTracking::Raw => {
                let all = vec![true; frames.len()];
                measured_tracks(&frames, &times, &all, self.config.formant_tracking.num_tracks)
            }
            FormantTracking::Kalman => self.kalman_tracks(&models, &times, &voiced, sample_rate)?,
            FormantTracking::Viterbi => {
                let num_tracks = self.config.formant_tracking.num_tracks;
                let segments = track_voiced_segments(
                    &mut frames,
                    &voiced,
                    num_tracks,
                    &self.config.formant_tracking,
                );
                tracing::debug!(segments, "voiced segments tracked");
                measured_tracks(&frames, &times, &voiced, num_tracks)
            }
        };

        tracing::debug!(
            frames = frames.len(),
            voiced = voiced.iter().filter(|&&v| v).count(),
            tracking = ?self.config.tracking,
            "analysis complete"
        );

        Ok(AnalysisResult {
            pitch: Track::from_values(&times, &pitch),
            formants,
            frames,
        })
    }

    /// Resample, pre-emphasize, window and fit every formant frame
    fn formant_frames(&mut self, sound: &Sound) -> FormantAnalysis {
        let config = &self.config;
        let resampled;
        let source = if sound.sample_rate() > config.formant_sample_rate {
            resampled = sound.resample(config.formant_sample_rate);
            &resampled
        } else {
            sound
        };
        let emphasized = if config.pre_emphasis_hz > 0.0 {
            source.pre_emphasis(config.pre_emphasis_hz)
        } else {
            source.clone()
        };

        let fs = emphasized.sample_rate();
        let frame_len = (config.frame_length * fs).round() as usize;
        let hop = ((config.time_step * fs).round() as usize).max(1);

        let mut analysis = FormantAnalysis {
            times: Vec::new(),
            models: Vec::new(),
            frames: Vec::new(),
            sample_rate: fs,
        };
        for frame in emphasized.frames(frame_len, hop) {
            config.window.apply_into(frame.samples, &mut self.windowed);
            let model = self.predictor.solve(&self.windowed, config.lpc.order);
            let formants = self.extractor.extract_lpc(&model, fs, config.lpc.root_method);

            analysis.times.push(frame.time);
            analysis.frames.push(formants);
            analysis.models.push(model);
        }
        analysis
    }

    /// F0 per formant frame time, from the full-rate sound
    fn pitch_values(&self, sound: &Sound, times: &[f64]) -> Result<Vec<Option<f64>>> {
        let mut tracker = PitchTracker::new(&self.config.pitch)?;
        let frame_len = (self.config.pitch.frame_length * sound.sample_rate()).round() as usize;
        for &time in times {
            tracker.process_frame(&sound.frame_at(time, frame_len));
        }

        match tracker.compute_path() {
            Ok(path) => Ok(path),
            Err(err) => {
                tracing::warn!(%err, "pitch path search failed, using per-frame best candidates");
                Ok(tracker.best_candidates())
            }
        }
    }

    fn kalman_tracks(
        &self,
        models: &[LpcModel],
        times: &[f64],
        voiced: &[bool],
        sample_rate: f64,
    ) -> Result<Vec<Track>> {
        let num_formants = self.config.kalman.num_formants;
        let mut filter = FormantKalmanTracker::new(&self.config.kalman, sample_rate)?;
        let mut values = vec![Vec::with_capacity(models.len()); num_formants];
        let mut skipped = 0;

        for (model, &is_voiced) in models.iter().zip(voiced) {
            if filter.step_lpc(model, is_voiced) != StepOutcome::Updated {
                skipped += 1;
            }
            let frequencies = filter.frequencies();
            for (track, &f) in values.iter_mut().zip(&frequencies) {
                track.push(is_voiced.then_some(f));
            }
        }
        tracing::debug!(
            frames = models.len(),
            skipped,
            "formant filter finished"
        );

        Ok(values
            .iter()
            .map(|v| Track::from_values(times, v))
            .collect())
    }
}

/// Tracks read directly from the frames: track k is the k-th lowest formant
/// where `include` is set
fn measured_tracks(
    frames: &[FormantFrame],
    times: &[f64],
    include: &[bool],
    num_tracks: usize,
) -> Vec<Track> {
    (1..=num_tracks)
        .map(|number| {
            let values: Vec<Option<f64>> = frames
                .iter()
                .zip(include)
                .map(|(frame, &on)| {
                    if on {
                        frame.get_formant(number).map(|f| f.frequency)
                    } else {
                        None
                    }
                })
                .collect();
            Track::from_values(times, &values)
        })
        .collect()
}
