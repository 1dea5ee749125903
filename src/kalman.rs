//! Extended Kalman filter for formant tracking
//!
//! The state holds N formant frequencies followed by their N bandwidths. The
//! process model is a random walk (`F = I`, diagonal `Q`), and the observation
//! is the LPC cepstrum of the frame, predicted from the state by
//! [`CepstralProjector`]. Each step:
//!
//! 1. Predict `m = F·m`, `P = F·P·Fᵗ + Q`; state entries above Nyquist are
//!    reflected back into range, bandwidths included.
//! 2. Linearize the observation model at the prediction.
//! 3. Compute the gain from `S = H·P·Hᵗ + R`. Unvoiced frames, unusable
//!    observations and a near-singular `S` leave the prediction as the estimate.
//! 4. Update mean and covariance.
//! 5. Re-sort formants by (clamped) frequency, permuting `P` along with
//!    the mean, so slot k keeps meaning "the k-th lowest formant".
//!
//! The filter runs frame by frame in temporal order; one instance per stream.

use nalgebra::{DMatrix, DVector};

use crate::cepstrum::CepstralProjector;
use crate::config::KalmanConfig;
use crate::formant::FormantCandidate;
use crate::lpc::LpcModel;
use crate::{Result, TrackError};

/// `S` is treated as singular when its smallest Cholesky pivot falls this far
/// below the largest
const MIN_PIVOT_RATIO: f64 = 1e-12;

/// Why a step kept the prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The caller flagged the frame as unvoiced
    Unvoiced,
    /// No usable LPC model or a non-finite cepstrum
    DegenerateObservation,
    /// Innovation covariance too close to singular to invert
    IllConditionedGain,
}

/// Result of one filter step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Measurement update applied
    Updated,
    /// Only the prediction was applied
    PredictionOnly(SkipReason),
}

/// Filter matrices and current estimate
#[derive(Debug, Clone)]
pub struct KalmanState {
    /// `[f_1..f_N, b_1..b_N]`
    pub mean: DVector<f64>,
    /// 2N × 2N estimate covariance
    pub covariance: DMatrix<f64>,
    /// State transition `F`
    pub transition: DMatrix<f64>,
    /// Process noise `Q`
    pub process_noise: DMatrix<f64>,
    /// Observation noise `R`
    pub observation_noise: DMatrix<f64>,
    num_formants: usize,
    cepstral_order: usize,
}

impl KalmanState {
    fn from_config(config: &KalmanConfig) -> Self {
        let n = config.num_formants;
        let mean = DVector::from_iterator(
            2 * n,
            config
                .initial_frequencies
                .iter()
                .chain(&config.initial_bandwidths)
                .copied(),
        );

        let frequency_var = config.frequency_noise_std * config.frequency_noise_std;
        let bandwidth_var = config.bandwidth_noise_std * config.bandwidth_noise_std;
        let process_noise = DMatrix::from_fn(2 * n, 2 * n, |i, j| match (i == j, i < n) {
            (true, true) => frequency_var,
            (true, false) => bandwidth_var,
            _ => 0.0,
        });

        let c = config.cepstral_order;
        let observation_noise = DMatrix::from_fn(c, c, |i, j| {
            if i == j {
                config.observation_noise_scale / (i + 1) as f64
            } else {
                0.0
            }
        });

        Self {
            mean,
            covariance: process_noise.clone(),
            transition: DMatrix::identity(2 * n, 2 * n),
            process_noise,
            observation_noise,
            num_formants: n,
            cepstral_order: c,
        }
    }

    pub fn num_formants(&self) -> usize {
        self.num_formants
    }

    pub fn cepstral_order(&self) -> usize {
        self.cepstral_order
    }
}

/// Formant tracker driven by per-frame LPC cepstra
#[derive(Debug, Clone)]
pub struct FormantKalmanTracker {
    state: KalmanState,
    initial: KalmanState,
    projector: CepstralProjector,
    frequency_margin: f64,
}

impl FormantKalmanTracker {
    /// Create a tracker seeded from the configured initial formants
    ///
    /// # Arguments
    /// * `config` - Filter dimensions, seed and noise levels
    /// * `sample_rate` - Sample rate the LPC frames are computed at
    pub fn new(config: &KalmanConfig, sample_rate: f64) -> Result<Self> {
        config.validate()?;
        if !(sample_rate > 0.0) {
            return Err(TrackError::InvalidParameter(format!(
                "invalid sample rate {sample_rate}"
            )));
        }

        let state = KalmanState::from_config(config);
        Ok(Self {
            initial: state.clone(),
            state,
            projector: CepstralProjector::new(config.cepstral_order, sample_rate),
            frequency_margin: config.frequency_margin_hz,
        })
    }

    /// Return to the seeded state
    pub fn reset(&mut self) {
        self.state = self.initial.clone();
    }

    pub fn state(&self) -> &KalmanState {
        &self.state
    }

    pub fn frequencies(&self) -> Vec<f64> {
        let n = self.state.num_formants;
        self.state.mean.rows(0, n).iter().copied().collect()
    }

    pub fn bandwidths(&self) -> Vec<f64> {
        let n = self.state.num_formants;
        self.state.mean.rows(n, n).iter().copied().collect()
    }

    /// Current estimate as formant candidates, lowest first
    pub fn formants(&self) -> Vec<FormantCandidate> {
        self.frequencies()
            .into_iter()
            .zip(self.bandwidths())
            .map(|(f, b)| FormantCandidate::new(f, b))
            .collect()
    }

    pub fn covariance_trace(&self) -> f64 {
        self.state.covariance.trace()
    }

    /// Step with the cepstrum of an LPC model
    pub fn step_lpc(&mut self, model: &LpcModel, voiced: bool) -> StepOutcome {
        if voiced && !model.is_usable() {
            return self.step(&[], voiced);
        }
        let cepstrum = model.cepstrum(self.state.cepstral_order);
        self.step(&cepstrum, voiced)
    }

    /// Advance one frame
    ///
    /// # Arguments
    /// * `observation` - Measured cepstrum `c_1..`; padded with zeros or
    ///   truncated to the cepstral order
    /// * `voiced` - Whether the frame should update the estimate at all
    pub fn step(&mut self, observation: &[f64], voiced: bool) -> StepOutcome {
        self.predict();

        let outcome = if !voiced {
            StepOutcome::PredictionOnly(SkipReason::Unvoiced)
        } else if observation.is_empty() || observation.iter().any(|v| !v.is_finite()) {
            StepOutcome::PredictionOnly(SkipReason::DegenerateObservation)
        } else {
            self.update(observation)
        };

        if let StepOutcome::PredictionOnly(reason) = outcome {
            tracing::trace!(?reason, "formant filter kept prediction");
        }

        self.sort_formants();
        outcome
    }

    fn predict(&mut self) {
        let state = &mut self.state;
        let n = state.num_formants;
        let fs = self.projector.sample_rate();
        let nyquist = fs / 2.0;

        state.mean = &state.transition * &state.mean;
        state.covariance =
            &state.transition * &state.covariance * state.transition.transpose() + &state.process_noise;

        for i in 0..2 * n {
            if state.mean[i] > nyquist {
                state.mean[i] = fs - state.mean[i];
            }
            if state.mean[i] < 0.0 {
                state.mean[i] = -state.mean[i];
            }
        }
    }

    fn update(&mut self, observation: &[f64]) -> StepOutcome {
        let state = &mut self.state;
        let order = state.cepstral_order;
        let measured =
            DVector::from_fn(order, |i, _| observation.get(i).copied().unwrap_or(0.0));

        let h = self.projector.jacobian(&state.mean);
        let hp = &h * &state.covariance;
        let innovation_cov = &hp * h.transpose() + &state.observation_noise;

        let Some(cholesky) = innovation_cov.cholesky() else {
            tracing::debug!("innovation covariance not positive definite, skipping update");
            return StepOutcome::PredictionOnly(SkipReason::IllConditionedGain);
        };
        let pivots = cholesky.l_dirty().diagonal();
        let (lo, hi) = pivots
            .iter()
            .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &d| (lo.min(d * d), hi.max(d * d)));
        if !(lo > MIN_PIVOT_RATIO * hi) {
            tracing::debug!(
                min_pivot = lo,
                max_pivot = hi,
                "singular innovation covariance, skipping update"
            );
            return StepOutcome::PredictionOnly(SkipReason::IllConditionedGain);
        }

        // K = P·Hᵗ·S⁻¹ = (S⁻¹·H·P)ᵗ since P and S are symmetric
        let gain = cholesky.solve(&hp).transpose();
        let innovation = measured - self.projector.project(&state.mean);

        let mean = &state.mean + &gain * innovation;
        let covariance = &state.covariance - &gain * &hp;
        if mean.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return StepOutcome::PredictionOnly(SkipReason::IllConditionedGain);
        }

        state.mean = mean;
        state.covariance = (&covariance + covariance.transpose()) * 0.5;
        StepOutcome::Updated
    }

    /// Clamp frequencies into `[margin, Nyquist - margin]` (reflecting values
    /// past Nyquist) and sort the formant slots by frequency
    fn sort_formants(&mut self) {
        let state = &mut self.state;
        let n = state.num_formants;
        let fs = self.projector.sample_rate();
        let nyquist = fs / 2.0;
        let lo = self.frequency_margin.min(nyquist);
        let hi = (nyquist - self.frequency_margin).max(lo);

        for i in 0..n {
            let mut f = state.mean[i];
            if f > nyquist {
                f = fs - f;
            }
            state.mean[i] = f.abs().clamp(lo, hi);
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| state.mean[a].total_cmp(&state.mean[b]));
        if order.iter().enumerate().all(|(k, &i)| k == i) {
            return;
        }

        let permutation: Vec<usize> = order.iter().copied().chain(order.iter().map(|&i| n + i)).collect();
        let mean = DVector::from_fn(2 * n, |k, _| state.mean[permutation[k]]);
        let covariance =
            DMatrix::from_fn(2 * n, 2 * n, |a, b| state.covariance[(permutation[a], permutation[b])]);
        state.mean = mean;
        state.covariance = covariance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const FS: f64 = 10000.0;

    fn observation(frequencies: &[f64], bandwidths: &[f64]) -> Vec<f64> {
        let state = DVector::from_iterator(
            2 * frequencies.len(),
            frequencies.iter().chain(bandwidths).copied(),
        );
        CepstralProjector::new(15, FS).project(&state).iter().copied().collect()
    }

    fn tracker() -> FormantKalmanTracker {
        FormantKalmanTracker::new(&KalmanConfig::default(), FS).unwrap()
    }

    #[test]
    fn test_converges_to_noiseless_observation() {
        let target = [540.0, 1580.0, 2580.0];
        let y = observation(&target, &[80.0, 120.0, 160.0]);
        let mut kf = tracker();

        let mut traces = Vec::new();
        for _ in 0..200 {
            assert_eq!(kf.step(&y, true), StepOutcome::Updated);
            traces.push(kf.covariance_trace());
        }

        for (estimate, truth) in kf.frequencies().iter().zip(target) {
            assert!(
                (estimate - truth).abs() <= 0.05 * truth,
                "estimate {estimate} for {truth}"
            );
        }

        // Once converged the covariance trace never grows
        for w in traces[100..].windows(2) {
            assert!(w[1] <= w[0] * (1.0 + 1e-9), "trace grew from {} to {}", w[0], w[1]);
        }
    }

    #[test]
    fn test_frequencies_stay_sorted() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut kf = tracker();

        for step in 0..300 {
            let frequencies: Vec<f64> = (0..3).map(|_| rng.gen_range(200.0..4800.0)).collect();
            let bandwidths: Vec<f64> = (0..3).map(|_| rng.gen_range(50.0..300.0)).collect();
            let voiced = step % 7 != 0;
            kf.step(&observation(&frequencies, &bandwidths), voiced);

            let state = kf.frequencies();
            assert!(
                state.windows(2).all(|w| w[0] <= w[1]),
                "unsorted state {state:?} at step {step}"
            );
            assert!(state.iter().all(|f| (60.0..=FS / 2.0 - 60.0).contains(f)));
        }
    }

    #[test]
    fn test_unvoiced_frame_only_predicts() {
        let mut kf = tracker();
        let before = kf.frequencies();
        let trace = kf.covariance_trace();

        let outcome = kf.step(&observation(&[700.0, 1200.0, 2600.0], &[80.0, 120.0, 160.0]), false);
        assert_eq!(outcome, StepOutcome::PredictionOnly(SkipReason::Unvoiced));
        assert_eq!(kf.frequencies(), before);

        let q = 3.0 * 320.0 * 320.0 + 3.0 * 100.0 * 100.0;
        assert_relative_eq!(kf.covariance_trace(), trace + q, max_relative = 1e-12);
    }

    #[test]
    fn test_prediction_reflects_bandwidth_above_nyquist() {
        let mut kf = tracker();
        kf.state.mean[3] = 6000.0;
        kf.state.mean[4] = -150.0;

        kf.step(&[], false);
        assert_eq!(kf.bandwidths(), vec![4000.0, 150.0, 160.0]);
    }

    #[test]
    fn test_degenerate_observation_skips_update() {
        let mut kf = tracker();
        assert_eq!(
            kf.step(&[f64::NAN; 15], true),
            StepOutcome::PredictionOnly(SkipReason::DegenerateObservation)
        );
        assert_eq!(
            kf.step_lpc(&LpcModel::empty(10), true),
            StepOutcome::PredictionOnly(SkipReason::DegenerateObservation)
        );
    }

    #[test]
    fn test_singular_innovation_covariance_skips_update() {
        let config = KalmanConfig {
            num_formants: 1,
            cepstral_order: 6,
            initial_frequencies: vec![1000.0],
            initial_bandwidths: vec![100.0],
            observation_noise_scale: 0.0,
            ..KalmanConfig::default()
        };
        let mut kf = FormantKalmanTracker::new(&config, FS).unwrap();
        let before = kf.frequencies();

        let outcome = kf.step(&[0.1, 0.05, 0.0, -0.02, 0.0, 0.01], true);
        assert_eq!(outcome, StepOutcome::PredictionOnly(SkipReason::IllConditionedGain));
        assert_eq!(kf.frequencies(), before);
    }

    #[test]
    fn test_reset_restores_seed() {
        let mut kf = tracker();
        let y = observation(&[600.0, 1700.0, 2400.0], &[80.0, 120.0, 160.0]);
        for _ in 0..5 {
            kf.step(&y, true);
        }
        kf.reset();
        assert_eq!(kf.frequencies(), vec![500.0, 1500.0, 2500.0]);
        assert_eq!(kf.bandwidths(), vec![80.0, 120.0, 160.0]);
    }

    #[test]
    fn test_step_lpc_uses_model_cepstrum() {
        use crate::utils::polynomial;
        use num_complex::Complex;
        use std::f64::consts::PI;

        let target = [560.0, 1560.0, 2560.0];
        let roots: Vec<Complex<f64>> = target
            .iter()
            .zip([80.0, 120.0, 160.0])
            .flat_map(|(&f, b)| {
                let z = Complex::from_polar((-PI * b / FS).exp(), 2.0 * PI * f / FS);
                [z, z.conj()]
            })
            .collect();
        let model = LpcModel::new(polynomial::from_roots(&roots)[1..].to_vec(), 1.0, 6);

        let mut kf = tracker();
        for _ in 0..200 {
            kf.step_lpc(&model, true);
        }
        for (estimate, truth) in kf.frequencies().iter().zip(target) {
            assert!((estimate - truth).abs() <= 0.05 * truth);
        }
    }
}
