//! Formant track assignment and track output series
//!
//! [`track_formants`] runs the multi-track Viterbi search over a run of
//! [`FormantFrame`]s and rewrites each frame to hold exactly the chosen
//! formants, one per track. Track k prefers candidates near its reference
//! frequency, narrow resonances, and small log-frequency jumps between frames.

use crate::config::FormantTrackingConfig;
use crate::formant::{FormantCandidate, FormantFrame};
use crate::viterbi::{viterbi_multi, MultiCostModel, FORBIDDEN_COST};
use crate::{Result, TrackError};

/// Viterbi costs for assigning formant candidates to tracks
pub struct FormantTrackCosts<'a> {
    frames: &'a [FormantFrame],
    config: &'a FormantTrackingConfig,
    assignment: Vec<Vec<usize>>,
}

impl<'a> FormantTrackCosts<'a> {
    pub fn new(frames: &'a [FormantFrame], num_tracks: usize, config: &'a FormantTrackingConfig) -> Self {
        Self {
            frames,
            config,
            assignment: vec![vec![0; num_tracks]; frames.len()],
        }
    }

    fn candidate(&self, frame: usize, candidate: usize) -> Option<&FormantCandidate> {
        self.frames[frame].formants().get(candidate)
    }

    /// Chosen candidate index per frame and track
    pub fn assignment(&self) -> &[Vec<usize>] {
        &self.assignment
    }
}

impl MultiCostModel for FormantTrackCosts<'_> {
    fn num_frames(&self) -> usize {
        self.frames.len()
    }

    fn local_cost(&self, frame: usize, candidate: usize, track: usize) -> f64 {
        let Some(c) = self.candidate(frame, candidate) else {
            return FORBIDDEN_COST;
        };
        if !(c.frequency > 0.0) {
            return FORBIDDEN_COST;
        }
        let reference = self.config.reference_frequencies[track];
        self.config.frequency_cost * (c.frequency - reference).abs() / 1000.0
            + self.config.bandwidth_cost * c.bandwidth / c.frequency
    }

    fn transition_cost(&self, frame: usize, previous: usize, current: usize, _track: usize) -> f64 {
        let (Some(a), Some(b)) = (self.candidate(frame - 1, previous), self.candidate(frame, current)) else {
            return FORBIDDEN_COST;
        };
        if !(a.frequency > 0.0 && b.frequency > 0.0) {
            return FORBIDDEN_COST;
        }
        self.config.octave_jump_cost * (a.frequency / b.frequency).log2().abs()
    }

    fn put_result(&mut self, frame: usize, candidate: usize, track: usize) {
        self.assignment[frame][track] = candidate;
    }
}

/// Assign `num_tracks` formant tracks across `frames`
///
/// On success every frame holds exactly `num_tracks` formants, in track
/// order. On failure the frames are left untouched.
///
/// # Errors
/// - [`TrackError::InsufficientFormants`] if a frame has fewer candidates than tracks
/// - errors from [`viterbi_multi`]
pub fn track_formants(
    frames: &mut [FormantFrame],
    num_tracks: usize,
    config: &FormantTrackingConfig,
) -> Result<f64> {
    if num_tracks == 0 || config.reference_frequencies.len() < num_tracks {
        return Err(TrackError::InvalidParameter(format!(
            "{num_tracks} tracks need as many reference frequencies"
        )));
    }
    if let Some(short) = frames.iter().find(|f| f.num_formants() < num_tracks) {
        return Err(TrackError::InsufficientFormants {
            required: num_tracks,
            available: short.num_formants(),
        });
    }
    let num_candidates = frames.iter().map(FormantFrame::num_formants).max().unwrap_or(0);

    let mut costs = FormantTrackCosts::new(frames, num_tracks, config);
    let cost = viterbi_multi(&mut costs, num_candidates, num_tracks)?;
    let assignment = costs.assignment;

    for (frame, chosen) in frames.iter_mut().zip(assignment) {
        let formants = chosen.iter().map(|&c| frame.formants()[c]).collect();
        frame.set_formants(formants);
    }
    Ok(cost)
}

/// Run [`track_formants`] over every maximal voiced run of frames
///
/// A run is tracked when it spans at least two frames that each hold at
/// least `num_tracks` formants. Frames outside such runs, and runs whose
/// search fails, keep their measured candidates.
///
/// Returns the number of runs that were tracked.
pub fn track_voiced_segments(
    frames: &mut [FormantFrame],
    voiced: &[bool],
    num_tracks: usize,
    config: &FormantTrackingConfig,
) -> usize {
    let eligible = |i: usize| {
        voiced.get(i).copied().unwrap_or(false) && frames[i].num_formants() >= num_tracks
    };
    let flags: Vec<bool> = (0..frames.len()).map(eligible).collect();

    let mut tracked = 0;
    let mut start = 0;
    while start < frames.len() {
        if !flags[start] {
            start += 1;
            continue;
        }
        let end = (start..frames.len()).find(|&i| !flags[i]).unwrap_or(frames.len());
        if end - start >= 2 {
            match track_formants(&mut frames[start..end], num_tracks, config) {
                Ok(_) => tracked += 1,
                Err(err) => tracing::debug!(start, end, %err, "formant segment left untracked"),
            }
        }
        start = end;
    }
    tracked
}

/// One sample of a tracked quantity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPoint {
    /// Frame centre in seconds
    pub time: f64,
    /// Value in Hz, `None` where unvoiced or undetermined
    pub value: Option<f64>,
}

/// Time series of an optional value, one point per frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Track {
    points: Vec<TrackPoint>,
}

impl Track {
    pub fn new(points: Vec<TrackPoint>) -> Self {
        Self { points }
    }

    /// Build a track from parallel frame times and values
    pub fn from_values(times: &[f64], values: &[Option<f64>]) -> Self {
        Self {
            points: times
                .iter()
                .zip(values)
                .map(|(&time, &value)| TrackPoint { time, value })
                .collect(),
        }
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Get the value at a specific frame
    pub fn value_at_frame(&self, frame: usize) -> Option<f64> {
        self.points.get(frame).and_then(|p| p.value)
    }

    /// Value of the frame nearest to `time`
    pub fn value_at_time(&self, time: f64) -> Option<f64> {
        self.points
            .iter()
            .min_by(|a, b| (a.time - time).abs().total_cmp(&(b.time - time).abs()))
            .and_then(|p| p.value)
    }

    /// Count frames with a value
    pub fn voiced_count(&self) -> usize {
        self.defined().count()
    }

    /// Mean over frames with a value
    pub fn mean(&self) -> Option<f64> {
        let count = self.voiced_count();
        if count == 0 {
            return None;
        }
        Some(self.defined().sum::<f64>() / count as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.defined().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.defined().reduce(f64::max)
    }

    fn defined(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().filter_map(|p| p.value)
    }
}
