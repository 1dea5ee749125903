//! Pitch (F0) tracking
//!
//! Three per-frame candidate generators are available, see [`PitchMethod`].
//! The default is RAPT, after Talkin (1995): "A robust algorithm for pitch
//! tracking (RAPT)". Each frame is searched twice with the normalized
//! cross-correlation function (NCCF). A coarse pass over a decimated copy of
//! the frame covers the whole lag range cheaply; a fine pass at the full rate
//! refines only the lags around the coarse peaks.
//!
//! Whatever the generator, the voiced candidates share one cost scale and
//! one unvoiced candidate is always added. Dynamic programming over the
//! frame history then picks the path that balances local evidence against
//! frequency jumps and voicing changes, where the cost of a voicing change
//! depends on how much energy and spectrum change between the two frames.

use std::f64::consts::LN_2;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::config::PitchConfig;
use crate::lpc::{LinearPredictor, LpcMethod, LpcModel};
use crate::sound::{pre_emphasize, resample, AudioFrame};
use crate::utils::Fft;
use crate::viterbi::{viterbi, CostModel};
use crate::window::WindowShape;
use crate::Result;

/// Fine-pass search radius around each mapped coarse peak (samples)
const FINE_SEARCH_RADIUS: usize = 3;

/// Length of the energy and spectrum window (s)
const STATS_WINDOW: f64 = 0.03;

/// Pre-emphasis of the spectral-change LPC, `alpha = exp(-7000 / fs)`
const STATS_PRE_EMPHASIS: f64 = 7000.0;

/// Floor for frame RMS when forming energy ratios
const MIN_RMS: f64 = 1e-10;

/// NSDF key maxima at or below this value are not period estimates
const MPM_MIN_PEAK: f64 = 0.5;

/// Per-frame candidate generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitchMethod {
    /// Cumulative mean normalized difference with an absolute threshold
    /// (de Cheveigné & Kawahara, 2002); at most one voiced candidate
    Yin,
    /// Key maxima of the normalized square difference function
    /// (McLeod & Wyvill, 2005); at most one voiced candidate
    Mpm,
    /// Two-pass NCCF search (Talkin, 1995); up to `max_candidates - 1`
    /// voiced candidates
    #[default]
    Rapt,
}

/// A pitch candidate for a single frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchCandidate {
    /// Frequency in Hz (0.0 for unvoiced)
    pub frequency: f64,
    /// Period in samples at the analysis rate (0.0 for unvoiced)
    pub lag: f64,
    /// Interpolated NCCF peak value
    pub merit: f64,
    /// Cost of choosing this candidate, lower is better
    pub local_cost: f64,
}

impl PitchCandidate {
    fn unvoiced(local_cost: f64) -> Self {
        Self {
            frequency: 0.0,
            lag: 0.0,
            merit: 0.0,
            local_cost,
        }
    }

    pub fn is_voiced(&self) -> bool {
        self.lag > 0.0
    }
}

/// Candidates and voicing statistics of one analysed frame
#[derive(Debug, Clone)]
pub struct PitchFrame {
    /// Frame centre in seconds
    pub time: f64,
    /// Candidates ascending by local cost, unvoiced one included
    pub candidates: Vec<PitchCandidate>,
    /// Hann-weighted RMS of the frame centre
    pub rms: f64,
    /// RMS relative to the previous frame
    pub rms_ratio: f64,
    /// Spectral change relative to the previous frame, in [0, 1]
    pub spectral_change: f64,
}

impl PitchFrame {
    /// Frequency of the lowest-cost candidate, `None` if that is unvoiced
    pub fn best(&self) -> Option<f64> {
        self.candidates
            .first()
            .filter(|c| c.is_voiced())
            .map(|c| c.frequency)
    }
}

/// Sample-rate dependent analysis parameters
#[derive(Debug, Clone)]
struct PitchSetup {
    sample_rate: f64,
    decimated_rate: f64,
    coarse_lags: (usize, usize),
    coarse_window: usize,
    fine_lags: (usize, usize),
    fine_window: usize,
    lag_penalty: f64,
    lpc_order: usize,
    stats_window: Vec<f64>,
    pre_emphasis: f64,
}

impl PitchSetup {
    fn new(config: &PitchConfig, fs: f64) -> Self {
        let decimation = (fs / (4.0 * config.f0_max)).round().max(1.0);
        let decimated_rate = (fs / decimation).round();
        let stats_len = (STATS_WINDOW * fs).round() as usize;

        Self {
            sample_rate: fs,
            decimated_rate,
            coarse_lags: lag_range(decimated_rate, config),
            coarse_window: ((config.correlation_window * decimated_rate).round() as usize).max(1),
            fine_lags: lag_range(fs, config),
            fine_window: ((config.correlation_window * fs).round() as usize).max(1),
            lag_penalty: config.lag_weight / (fs / config.f0_min),
            lpc_order: 2 + (fs / 1000.0).round() as usize,
            stats_window: WindowShape::Hanning.generate(stats_len),
            pre_emphasis: (-STATS_PRE_EMPHASIS / fs).exp(),
        }
    }

    /// Voiced candidate at `lag` samples with peak value `merit`
    fn voiced(&self, lag: f64, merit: f64) -> PitchCandidate {
        PitchCandidate {
            frequency: self.sample_rate / lag,
            lag,
            merit,
            local_cost: 1.0 - merit * (1.0 - self.lag_penalty * lag),
        }
    }
}

fn lag_range(rate: f64, config: &PitchConfig) -> (usize, usize) {
    let lo = ((rate / config.f0_max).round() as usize).max(1);
    let hi = ((rate / config.f0_min).round() as usize).max(lo);
    (lo, hi)
}

/// Frame-by-frame pitch tracker
///
/// One instance per stream. Frames must arrive in temporal order; the
/// tracker keeps every processed frame so [`PitchTracker::compute_path`]
/// can run over the whole history.
pub struct PitchTracker {
    config: PitchConfig,
    setup: Option<PitchSetup>,
    fft: Fft,
    predictor: LinearPredictor,
    centred: Vec<f64>,
    weighted: Vec<f64>,
    previous_model: LpcModel,
    previous_rms: Option<f64>,
    frames: Vec<PitchFrame>,
}

impl PitchTracker {
    pub fn new(config: &PitchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: config.clone(),
            setup: None,
            fft: Fft::new(),
            predictor: LinearPredictor::new(LpcMethod::Autocorrelation),
            centred: Vec::new(),
            weighted: Vec::new(),
            previous_model: LpcModel::empty(0),
            previous_rms: None,
            frames: Vec::new(),
        })
    }

    /// Forget all processed frames
    pub fn reset(&mut self) {
        self.frames.clear();
        self.previous_model = LpcModel::empty(0);
        self.previous_rms = None;
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[PitchFrame] {
        &self.frames
    }

    /// Candidates of a processed frame, best first
    pub fn candidates(&self, frame: usize) -> Option<&[PitchCandidate]> {
        self.frames.get(frame).map(|f| f.candidates.as_slice())
    }

    /// Per-frame best candidates without path smoothing
    pub fn best_candidates(&self) -> Vec<Option<f64>> {
        self.frames.iter().map(PitchFrame::best).collect()
    }

    /// Analyse one frame and append it to the history
    ///
    /// The frame must span at least the longest period plus the correlation
    /// window; shorter frames only get the unvoiced candidate.
    ///
    /// Returns the frequency of the lowest-cost candidate, or `None` when
    /// that candidate is the unvoiced one.
    pub fn process_frame(&mut self, frame: &AudioFrame) -> Option<f64> {
        let fs = frame.sample_rate;
        if self.setup.as_ref().map_or(true, |s| s.sample_rate != fs) {
            self.setup = Some(PitchSetup::new(&self.config, fs));
        }
        let Some(setup) = self.setup.take() else {
            return None;
        };

        let mean = frame.samples.iter().sum::<f64>() / frame.len().max(1) as f64;
        self.centred.clear();
        self.centred.extend(frame.samples.iter().map(|s| s - mean));

        let mut candidates = match self.config.method {
            PitchMethod::Rapt => self.nccf_candidates(&setup),
            PitchMethod::Yin => self.yin_candidate(&setup).into_iter().collect(),
            PitchMethod::Mpm => self.mpm_candidate(&setup).into_iter().collect(),
        };
        let best_merit = candidates.iter().map(|c| c.merit).fold(0.0, f64::max);
        candidates.push(PitchCandidate::unvoiced(self.config.voicing_bias + best_merit));
        candidates.sort_by(|a, b| a.local_cost.total_cmp(&b.local_cost));

        let (rms, rms_ratio, spectral_change) = self.frame_statistics(&setup);
        tracing::trace!(
            time = frame.time,
            candidates = candidates.len(),
            rms,
            "pitch frame analysed"
        );

        let pitch_frame = PitchFrame {
            time: frame.time,
            candidates,
            rms,
            rms_ratio,
            spectral_change,
        };
        let best = pitch_frame.best();
        self.frames.push(pitch_frame);
        self.setup = Some(setup);
        best
    }

    /// RAPT candidates of the current frame, at most `max_candidates - 1`
    fn nccf_candidates(&mut self, setup: &PitchSetup) -> Vec<PitchCandidate> {
        let x = &self.centred;
        let max_voiced = self.config.max_candidates - 1;

        // Coarse pass on the decimated frame
        let decimated = if setup.decimated_rate < setup.sample_rate {
            resample(x, setup.sample_rate, setup.decimated_rate, &mut self.fft)
        } else {
            x.clone()
        };
        let coarse = nccf_peaks(
            &decimated,
            setup.coarse_window,
            setup.coarse_lags,
            self.config.candidate_threshold,
        );

        let mut peaks: Vec<(f64, f64)> = coarse;
        peaks.sort_by(|a, b| b.1.total_cmp(&a.1));
        peaks.truncate(max_voiced);

        // Fine pass around each coarse peak at the full rate
        let n = setup.fine_window;
        let (lag_lo, lag_hi) = setup.fine_lags;
        let Some(max_lag) = x.len().checked_sub(n + 1) else {
            return Vec::new();
        };
        let e0 = energy(x, 0, n);

        let mut candidates: Vec<PitchCandidate> = Vec::new();
        for (coarse_lag, _) in peaks {
            let centre = (coarse_lag * setup.sample_rate / setup.decimated_rate).round() as usize;
            let lo = centre.saturating_sub(FINE_SEARCH_RADIUS).max(lag_lo).max(2);
            let hi = (centre + FINE_SEARCH_RADIUS).min(lag_hi).min(max_lag);
            if lo > hi {
                continue;
            }

            let values: Vec<f64> = (lo - 1..=hi + 1).map(|k| nccf(x, n, k, e0)).collect();
            let Some((best, _)) = (1..values.len() - 1)
                .map(|i| (i, values[i]))
                .max_by(|a, b| a.1.total_cmp(&b.1))
            else {
                continue;
            };
            let (offset, merit) = parabolic_peak(values[best - 1], values[best], values[best + 1]);
            if !(merit > 0.0) {
                continue;
            }
            let lag = ((lo + best - 1) as f64 + offset).clamp(lag_lo as f64, lag_hi as f64);

            if candidates.iter().any(|c| (c.lag - lag).abs() < 1.0) {
                continue;
            }
            candidates.push(setup.voiced(lag, merit));
        }
        candidates
    }

    /// YIN: the first dip of the cumulative mean normalized difference below
    /// the absolute threshold, followed down to its local minimum
    fn yin_candidate(&self, setup: &PitchSetup) -> Option<PitchCandidate> {
        let x = &self.centred;
        let (lag_lo, lag_hi) = setup.fine_lags;
        let max_tau = lag_hi + 1;
        let window = x.len().checked_sub(max_tau).filter(|&w| w > 0)?;
        let cmnd = cumulative_mean_normalized_difference(x, window, max_tau);

        let mut k = (lag_lo.max(2)..=lag_hi).find(|&k| cmnd[k] < self.config.yin_threshold)?;
        while k < lag_hi && cmnd[k + 1] < cmnd[k] {
            k += 1;
        }

        let (offset, value) = parabolic_peak(-cmnd[k - 1], -cmnd[k], -cmnd[k + 1]);
        let lag = (k as f64 + offset).clamp(lag_lo as f64, lag_hi as f64);
        Some(setup.voiced(lag, (1.0 + value).clamp(0.0, 1.0)))
    }

    /// MPM: the first NSDF key maximum within `mpm_cutoff` of the highest one
    fn mpm_candidate(&mut self, setup: &PitchSetup) -> Option<PitchCandidate> {
        let (lag_lo, lag_hi) = setup.fine_lags;
        let len = self.centred.len();
        if len < 4 {
            return None;
        }
        let max_tau = (lag_hi + 1).min(len - 1);
        let nsdf = normalized_square_difference(&self.centred, max_tau, &mut self.fft);

        let estimates: Vec<(f64, f64)> = key_maxima(&nsdf)
            .into_iter()
            .filter(|&k| nsdf[k] > MPM_MIN_PEAK && (lag_lo..=lag_hi).contains(&k))
            .map(|k| {
                let (offset, value) = parabolic_peak(nsdf[k - 1], nsdf[k], nsdf[k + 1]);
                ((k as f64 + offset).clamp(lag_lo as f64, lag_hi as f64), value)
            })
            .collect();

        let highest = estimates.iter().map(|e| e.1).fold(f64::NEG_INFINITY, f64::max);
        let &(lag, merit) = estimates
            .iter()
            .find(|e| e.1 >= self.config.mpm_cutoff * highest)?;
        Some(setup.voiced(lag, merit.min(1.0)))
    }

    /// RMS, RMS ratio and spectral change of the centred frame
    fn frame_statistics(&mut self, setup: &PitchSetup) -> (f64, f64, f64) {
        let x = &self.centred;
        let len = setup.stats_window.len().min(x.len());
        let start = (x.len() - len) / 2;
        let segment = &x[start..start + len];
        let window = &setup.stats_window[..len];

        let weight: f64 = window.iter().sum();
        let rms = if weight > 0.0 {
            (segment.iter().zip(window).map(|(s, w)| w * s * s).sum::<f64>() / weight).sqrt()
        } else {
            0.0
        };
        let rms_ratio = match self.previous_rms {
            Some(previous) => rms.max(MIN_RMS) / previous.max(MIN_RMS),
            None => 1.0,
        };

        self.weighted.clear();
        self.weighted.extend_from_slice(segment);
        pre_emphasize(&mut self.weighted, setup.pre_emphasis);
        for (s, w) in self.weighted.iter_mut().zip(window) {
            *s *= w;
        }
        let model = self.predictor.solve(&self.weighted, setup.lpc_order);

        let spectral_change = if self.previous_rms.is_some() {
            model
                .itakura_distance(&self.previous_model)
                .map_or(0.0, |d| 0.2 / (d - 0.8).max(0.2))
        } else {
            0.0
        };

        self.previous_rms = Some(rms);
        self.previous_model = model;
        (rms, rms_ratio, spectral_change)
    }

    /// Lowest-cost pitch path over every processed frame
    ///
    /// # Errors
    /// [`crate::TrackError::TrackingInfeasible`] if the lattice has no finite path.
    pub fn compute_path(&self) -> Result<Vec<Option<f64>>> {
        let mut costs = PitchPathCosts::new(&self.frames, &self.config);
        viterbi(&mut costs)?;
        Ok(costs
            .path
            .iter()
            .zip(&self.frames)
            .map(|(&c, frame)| {
                let candidate = frame.candidates[c];
                candidate.is_voiced().then_some(candidate.frequency)
            })
            .collect())
    }
}

/// Path costs between pitch candidates of consecutive frames
pub struct PitchPathCosts<'a> {
    frames: &'a [PitchFrame],
    config: &'a PitchConfig,
    path: Vec<usize>,
}

impl<'a> PitchPathCosts<'a> {
    pub fn new(frames: &'a [PitchFrame], config: &'a PitchConfig) -> Self {
        Self {
            frames,
            config,
            path: vec![0; frames.len()],
        }
    }

    /// Chosen candidate index per frame
    pub fn path(&self) -> &[usize] {
        &self.path
    }
}

impl CostModel for PitchPathCosts<'_> {
    fn num_frames(&self) -> usize {
        self.frames.len()
    }

    fn num_candidates(&self, frame: usize) -> usize {
        self.frames[frame].candidates.len()
    }

    fn local_cost(&self, frame: usize, candidate: usize) -> f64 {
        self.frames[frame].candidates[candidate].local_cost
    }

    fn transition_cost(&self, frame: usize, previous: usize, current: usize) -> f64 {
        let config = self.config;
        let this = &self.frames[frame];
        let from = &self.frames[frame - 1].candidates[previous];
        let to = &this.candidates[current];
        let voicing_change =
            config.voicing_transition_cost + config.spectral_change_cost * this.spectral_change;

        match (from.is_voiced(), to.is_voiced()) {
            (true, true) => {
                let jump = (to.lag / from.lag).ln().abs();
                config.frequency_weight * jump.min(config.doubling_cost + (jump - LN_2).abs())
            }
            (true, false) => voicing_change + config.amplitude_change_cost * this.rms_ratio,
            (false, true) => voicing_change + config.amplitude_change_cost / this.rms_ratio,
            (false, false) => 0.0,
        }
    }

    fn put_result(&mut self, frame: usize, candidate: usize) {
        self.path[frame] = candidate;
    }
}

fn energy(x: &[f64], start: usize, n: usize) -> f64 {
    x[start..start + n].iter().map(|v| v * v).sum()
}

/// NCCF at lag `k` over a window of `n` samples; `e0` is the energy of
/// `x[0..n]`. Requires `x.len() >= n + k`.
fn nccf(x: &[f64], n: usize, k: usize, e0: f64) -> f64 {
    let denominator = (e0 * energy(x, k, n)).sqrt();
    if !(denominator > 0.0) {
        return 0.0;
    }
    x[..n].iter().zip(&x[k..k + n]).map(|(a, b)| a * b).sum::<f64>() / denominator
}

/// Local NCCF maxima above `threshold` times the largest value, as
/// (interpolated lag, interpolated value)
fn nccf_peaks(x: &[f64], n: usize, (lo, hi): (usize, usize), threshold: f64) -> Vec<(f64, f64)> {
    let Some(max_lag) = x.len().checked_sub(n + 1) else {
        return Vec::new();
    };
    let lo = lo.max(2);
    let hi = hi.min(max_lag);
    if lo > hi {
        return Vec::new();
    }

    let e0 = energy(x, 0, n);
    let values: Vec<f64> = (lo - 1..=hi + 1).map(|k| nccf(x, n, k, e0)).collect();
    let peak = values[1..values.len() - 1].iter().copied().fold(0.0, f64::max);
    if !(peak > 0.0) {
        return Vec::new();
    }

    (1..values.len() - 1)
        .filter(|&i| {
            values[i] > values[i - 1] && values[i] >= values[i + 1] && values[i] >= threshold * peak
        })
        .map(|i| {
            let (offset, value) = parabolic_peak(values[i - 1], values[i], values[i + 1]);
            ((lo + i - 1) as f64 + offset, value)
        })
        .collect()
}

/// YIN's d'(τ) for τ in `0..=max_tau` over an integration window of
/// `window` samples; requires `x.len() >= window + max_tau`
fn cumulative_mean_normalized_difference(x: &[f64], window: usize, max_tau: usize) -> Vec<f64> {
    let mut cmnd = vec![1.0; max_tau + 1];
    let mut running = 0.0;
    for tau in 1..=max_tau {
        let d: f64 = x[..window]
            .iter()
            .zip(&x[tau..tau + window])
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        running += d;
        cmnd[tau] = if running > 0.0 { d * tau as f64 / running } else { 1.0 };
    }
    cmnd
}

/// McLeod's NSDF `2·r(τ) / m(τ)` for τ in `0..=max_tau`, with the
/// autocorrelation computed by FFT; requires `max_tau < x.len()`
fn normalized_square_difference(x: &[f64], max_tau: usize, fft: &mut Fft) -> Vec<f64> {
    let n = x.len();
    let mut spectrum = fft.real_fft(x, (2 * n).next_power_of_two());
    for c in &mut spectrum {
        *c = Complex::new(c.norm_sqr(), 0.0);
    }
    let autocorrelation = fft.inverse_fft(&spectrum);

    let total = 2.0 * x.iter().map(|v| v * v).sum::<f64>();
    let floor = 1e-12 * total;
    let mut m = total;
    (0..=max_tau)
        .map(|tau| {
            if tau > 0 {
                m -= x[tau - 1] * x[tau - 1] + x[n - tau] * x[n - tau];
            }
            if m > floor {
                2.0 * autocorrelation[tau].re / m
            } else {
                0.0
            }
        })
        .collect()
}

/// Highest local maximum of each positive NSDF region after the lobe
/// around zero lag
fn key_maxima(nsdf: &[f64]) -> Vec<usize> {
    let size = nsdf.len();
    let mut maxima = Vec::new();
    if size < 3 {
        return maxima;
    }

    let mut pos = 0;
    while pos < (size - 1) / 3 && nsdf[pos] > 0.0 {
        pos += 1;
    }
    while pos < size - 1 && nsdf[pos] <= 0.0 {
        pos += 1;
    }
    pos = pos.max(1);

    let mut current: Option<usize> = None;
    while pos < size - 1 {
        if nsdf[pos] > nsdf[pos - 1]
            && nsdf[pos] >= nsdf[pos + 1]
            && current.map_or(true, |c| nsdf[pos] > nsdf[c])
        {
            current = Some(pos);
        }
        pos += 1;
        if pos < size - 1 && nsdf[pos] <= 0.0 {
            maxima.extend(current.take());
            while pos < size - 1 && nsdf[pos] <= 0.0 {
                pos += 1;
            }
        }
    }
    maxima.extend(current);
    maxima
}

/// Vertex of the parabola through three equally spaced points, as
/// (offset from the middle point, value)
fn parabolic_peak(left: f64, middle: f64, right: f64) -> (f64, f64) {
    let curvature = left - 2.0 * middle + right;
    if !(curvature < 0.0) {
        return (0.0, middle);
    }
    let offset = (0.5 * (left - right) / curvature).clamp(-0.5, 0.5);
    (offset, middle - 0.25 * (left - right) * offset)
}
