//! Sound type for audio data representation and framing
//!
//! The Sound type holds mono samples at a fixed rate. Analysis works on
//! [`AudioFrame`]s, borrowed windows of the samples tagged with their centre
//! time. Decoding audio files is left to the caller.

use std::f64::consts::PI;

use num_complex::Complex;

use crate::utils::Fft;

/// Depth of the windowed-sinc interpolator in samples per side
const SINC_DEPTH: usize = 50;

/// Zero padding on each side of the signal before FFT low-pass filtering
const ANTI_TURN_AROUND: usize = 1000;

/// Audio samples with associated sample rate and timing information
#[derive(Debug, Clone)]
pub struct Sound {
    /// Audio samples (mono, normalized to [-1, 1] range)
    samples: Vec<f64>,
    /// Sample rate in Hz
    sample_rate: f64,
    /// Start time of the first sample (usually 0.0)
    start_time: f64,
}

/// A borrowed window of samples
#[derive(Debug, Clone, Copy)]
pub struct AudioFrame<'a> {
    pub samples: &'a [f64],
    pub sample_rate: f64,
    /// Centre of the frame in seconds
    pub time: f64,
}

impl AudioFrame<'_> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn rms(&self) -> f64 {
        rms(self.samples)
    }
}

impl Sound {
    /// Create a Sound from raw samples
    ///
    /// # Arguments
    /// * `samples` - Audio samples (will be cloned)
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Example
    /// ```
    /// use speechtrack_core::Sound;
    ///
    /// let samples = vec![0.0, 0.5, 1.0, 0.5, 0.0, -0.5, -1.0, -0.5];
    /// let sound = Sound::from_samples(&samples, 16000.0);
    /// assert_eq!(sound.sample_rate(), 16000.0);
    /// ```
    pub fn from_samples(samples: &[f64], sample_rate: f64) -> Self {
        Self::from_samples_owned(samples.to_vec(), sample_rate)
    }

    /// Create a Sound from owned samples (avoids cloning)
    pub fn from_samples_owned(samples: Vec<f64>, sample_rate: f64) -> Self {
        Self {
            samples,
            sample_rate,
            start_time: 0.0,
        }
    }

    /// Get the sample rate in Hz
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Get a reference to the audio samples
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// Get the total duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Consecutive frames of `frame_len` samples, `hop` samples apart
    ///
    /// Only whole frames are produced; each carries the time of its centre.
    pub fn frames(&self, frame_len: usize, hop: usize) -> impl Iterator<Item = AudioFrame<'_>> + '_ {
        let count = if frame_len == 0 || hop == 0 || self.samples.len() < frame_len {
            0
        } else {
            (self.samples.len() - frame_len) / hop + 1
        };
        (0..count).map(move |i| {
            let start = i * hop;
            AudioFrame {
                samples: &self.samples[start..start + frame_len],
                sample_rate: self.sample_rate,
                time: self.start_time + (start as f64 + frame_len as f64 / 2.0) / self.sample_rate,
            }
        })
    }

    /// Frame of `frame_len` samples centred as closely as possible on `time`
    ///
    /// The window is shifted to stay inside the sound and shortened only
    /// when the sound itself is shorter. The reported time is `time`.
    pub fn frame_at(&self, time: f64, frame_len: usize) -> AudioFrame<'_> {
        let n = self.samples.len();
        let len = frame_len.min(n);
        let centre = (time - self.start_time) * self.sample_rate;
        let start = (centre - len as f64 / 2.0).round().max(0.0) as usize;
        let start = start.min(n - len);
        AudioFrame {
            samples: &self.samples[start..start + len],
            sample_rate: self.sample_rate,
            time,
        }
    }

    /// Apply pre-emphasis filter
    ///
    /// The filter is: y[n] = x[n] - alpha * x[n-1]
    /// where alpha = exp(-2 * pi * from_frequency / sample_rate)
    pub fn pre_emphasis(&self, from_frequency: f64) -> Sound {
        let mut samples = self.samples.clone();
        pre_emphasize(&mut samples, (-2.0 * PI * from_frequency / self.sample_rate).exp());
        Sound {
            samples,
            sample_rate: self.sample_rate,
            start_time: self.start_time,
        }
    }

    /// Create a pure tone (sine wave)
    ///
    /// # Arguments
    /// * `frequency` - Frequency in Hz
    /// * `duration` - Duration in seconds
    /// * `sample_rate` - Sample rate in Hz
    /// * `amplitude` - Peak amplitude (0.0 to 1.0)
    /// * `phase` - Initial phase in radians
    pub fn create_tone(
        frequency: f64,
        duration: f64,
        sample_rate: f64,
        amplitude: f64,
        phase: f64,
    ) -> Sound {
        let n_samples = (duration * sample_rate).round() as usize;
        let omega = 2.0 * PI * frequency / sample_rate;
        let samples = (0..n_samples)
            .map(|i| amplitude * (omega * i as f64 + phase).sin())
            .collect();
        Self::from_samples_owned(samples, sample_rate)
    }

    /// Create silence
    pub fn create_silence(duration: f64, sample_rate: f64) -> Sound {
        let n_samples = (duration * sample_rate).round() as usize;
        Self::from_samples_owned(vec![0.0; n_samples], sample_rate)
    }

    /// Get the root-mean-square (RMS) amplitude
    pub fn rms(&self) -> f64 {
        rms(&self.samples)
    }

    /// Resample to a new rate with windowed-sinc interpolation
    ///
    /// Downsampling low-pass filters the signal at the new Nyquist first.
    pub fn resample(&self, new_sample_rate: f64) -> Sound {
        let mut fft = Fft::new();
        Sound {
            samples: resample(&self.samples, self.sample_rate, new_sample_rate, &mut fft),
            sample_rate: new_sample_rate,
            start_time: self.start_time,
        }
    }
}

pub(crate) fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|&s| s * s).sum::<f64>() / samples.len() as f64).sqrt()
}

/// First-order pre-emphasis `y[n] = x[n] - alpha·x[n-1]`, in place
pub(crate) fn pre_emphasize(samples: &mut [f64], alpha: f64) {
    for i in (1..samples.len()).rev() {
        samples[i] -= alpha * samples[i - 1];
    }
}

/// Resample `samples` from `from_rate` to `to_rate`
///
/// The output covers the same time span; sample centres are placed
/// symmetrically inside it. `fft` provides the planner for the anti-aliasing
/// filter so repeated calls reuse plans.
pub fn resample(samples: &[f64], from_rate: f64, to_rate: f64, fft: &mut Fft) -> Vec<f64> {
    if samples.is_empty() || !(from_rate > 0.0) || !(to_rate > 0.0) {
        return Vec::new();
    }
    let ratio = to_rate / from_rate;
    if (ratio - 1.0).abs() < 1e-6 {
        return samples.to_vec();
    }

    let duration = samples.len() as f64 / from_rate;
    let new_len = (duration * to_rate).round() as usize;
    if new_len == 0 {
        return Vec::new();
    }

    let filtered;
    let source = if ratio < 1.0 {
        filtered = lowpass(samples, ratio, fft);
        &filtered[..]
    } else {
        samples
    };

    let first_old = 0.5 / from_rate;
    let first_new = 0.5 * (duration - (new_len - 1) as f64 / to_rate);
    (0..new_len)
        .map(|i| {
            let time = first_new + i as f64 / to_rate;
            sinc_interpolate(source, (time - first_old) * from_rate, SINC_DEPTH)
        })
        .collect()
}

/// Zero every FFT bin above `ratio` of the Nyquist frequency
fn lowpass(samples: &[f64], ratio: f64, fft: &mut Fft) -> Vec<f64> {
    let n = samples.len();
    let nfft = (n + 2 * ANTI_TURN_AROUND).next_power_of_two();

    let mut padded = vec![0.0; nfft];
    padded[ANTI_TURN_AROUND..ANTI_TURN_AROUND + n].copy_from_slice(samples);
    let mut spectrum = fft.real_fft(&padded, nfft);

    let cutoff = ((ratio * nfft as f64 / 2.0).floor() as usize).min(nfft / 2);
    for bin in cutoff..=nfft / 2 {
        spectrum[bin] = Complex::new(0.0, 0.0);
        spectrum[(nfft - bin) % nfft] = Complex::new(0.0, 0.0);
    }

    let filtered = fft.inverse_fft(&spectrum);
    filtered[ANTI_TURN_AROUND..ANTI_TURN_AROUND + n]
        .iter()
        .map(|c| c.re)
        .collect()
}

/// Windowed-sinc interpolation at fractional position `x` (0-based)
///
/// Uses up to `max_depth` samples on each side with a raised-cosine window,
/// fewer near the edges; positions outside the signal take the edge value.
fn sinc_interpolate(samples: &[f64], x: f64, max_depth: usize) -> f64 {
    let n = samples.len();
    if x <= 0.0 {
        return samples[0];
    }
    if x >= (n - 1) as f64 {
        return samples[n - 1];
    }

    let left = x.floor() as usize;
    let frac = x - left as f64;
    if frac == 0.0 {
        return samples[left];
    }

    let depth = max_depth.min(left + 1).min(n - 1 - left);
    if depth <= 1 {
        return samples[left] + frac * (samples[left + 1] - samples[left]);
    }

    let half_width = depth as f64 + 0.5;
    (left + 1 - depth..=left + depth)
        .map(|i| {
            let d = x - i as f64;
            let sinc = (PI * d).sin() / (PI * d);
            let window = 0.5 * (1.0 + (PI * d / half_width).cos());
            samples[i] * sinc * window
        })
        .sum()
}
