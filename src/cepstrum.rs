//! Cepstral observation model
//!
//! A resonance with frequency `f` and bandwidth `b` is a pole pair at
//! `r·e^{±iθ}` with `r = exp(-π·b/fs)` and `θ = 2π·f/fs`. The cepstrum of the
//! all-pole filter built from N such pairs has the closed form
//!
//! ```text
//! c_i = Σ_p (2/i) · exp(-π·i·b_p/fs) · cos(2π·i·f_p/fs),   i = 1..C
//! ```
//!
//! which is what the formant Kalman filter observes. The same quantity is
//! measured from each frame's LPC coefficients with the standard recursion in
//! [`lpc_to_cepstrum`], so the filter compares like with like.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

/// Cepstral coefficients `c_1..c_count` of `1 / (1 + Σ a_k z^-k)`
///
/// Uses `c_n = -a_n - Σ_{k=1}^{n-1} (k/n)·c_k·a_{n-k}` with `a_n = 0` beyond
/// the model order, so the output is simply truncated or extended to `count`.
pub fn lpc_to_cepstrum(a: &[f64], count: usize) -> Vec<f64> {
    let p = a.len();
    let mut c = vec![0.0; count];

    for n in 1..=count {
        let mut value = if n <= p { -a[n - 1] } else { 0.0 };
        let first = if n > p { n - p } else { 1 };
        for k in first..n {
            value -= (k as f64 / n as f64) * c[k - 1] * a[n - k - 1];
        }
        c[n - 1] = value;
    }
    c
}

/// Maps a formant state `[f_1..f_N, b_1..b_N]` to cepstral coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CepstralProjector {
    order: usize,
    sample_rate: f64,
}

impl CepstralProjector {
    /// # Arguments
    /// * `order` - Number of cepstral coefficients `C`
    /// * `sample_rate` - Sample rate of the analysed signal in Hz
    pub fn new(order: usize, sample_rate: f64) -> Self {
        Self { order, sample_rate }
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Predicted cepstrum `h(m)` for a state vector of length 2N
    pub fn project(&self, state: &DVector<f64>) -> DVector<f64> {
        let n = state.len() / 2;
        let fs = self.sample_rate;

        DVector::from_fn(self.order, |row, _| {
            let i = (row + 1) as f64;
            (0..n)
                .map(|p| {
                    let decay = (-PI * i * state[n + p] / fs).exp();
                    (2.0 / i) * decay * (2.0 * PI * i * state[p] / fs).cos()
                })
                .sum()
        })
    }

    /// Analytic Jacobian `∂h/∂m`, a `C × 2N` matrix
    ///
    /// ```text
    /// ∂c_i/∂f_p = -(4π/fs) · exp(-π·i·b_p/fs) · sin(2π·i·f_p/fs)
    /// ∂c_i/∂b_p = -(2π/fs) · exp(-π·i·b_p/fs) · cos(2π·i·f_p/fs)
    /// ```
    pub fn jacobian(&self, state: &DVector<f64>) -> DMatrix<f64> {
        let n = state.len() / 2;
        let fs = self.sample_rate;
        let mut h = DMatrix::zeros(self.order, 2 * n);

        for row in 0..self.order {
            let i = (row + 1) as f64;
            for p in 0..n {
                let decay = (-PI * i * state[n + p] / fs).exp();
                let phase = 2.0 * PI * i * state[p] / fs;
                h[(row, p)] = -4.0 * PI / fs * decay * phase.sin();
                h[(row, n + p)] = -2.0 * PI / fs * decay * phase.cos();
            }
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::polynomial;
    use approx::assert_relative_eq;
    use num_complex::Complex;

    fn lpc_from_formants(frequencies: &[f64], bandwidths: &[f64], fs: f64) -> Vec<f64> {
        let roots: Vec<Complex<f64>> = frequencies
            .iter()
            .zip(bandwidths)
            .flat_map(|(&f, &b)| {
                let z = Complex::from_polar((-PI * b / fs).exp(), 2.0 * PI * f / fs);
                [z, z.conj()]
            })
            .collect();
        polynomial::from_roots(&roots)[1..].to_vec()
    }

    #[test]
    fn test_lpc_cepstrum_first_terms() {
        // c1 = -a1, c2 = -a2 + a1^2 / 2
        let c = lpc_to_cepstrum(&[0.4, -0.2], 3);
        assert_relative_eq!(c[0], -0.4);
        assert_relative_eq!(c[1], 0.2 + 0.08, epsilon = 1e-12);
    }

    #[test]
    fn test_projection_matches_lpc_cepstrum() {
        let fs = 10000.0;
        let frequencies = [550.0, 1650.0, 2450.0];
        let bandwidths = [80.0, 120.0, 160.0];
        let a = lpc_from_formants(&frequencies, &bandwidths, fs);

        let measured = lpc_to_cepstrum(&a, 15);
        let state = DVector::from_iterator(6, frequencies.iter().chain(&bandwidths).copied());
        let projected = CepstralProjector::new(15, fs).project(&state);

        for i in 0..15 {
            assert_relative_eq!(measured[i], projected[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let fs = 10000.0;
        let projector = CepstralProjector::new(12, fs);
        let state = DVector::from_vec(vec![620.0, 1480.0, 2700.0, 70.0, 110.0, 190.0]);
        let analytic = projector.jacobian(&state);

        let step = 1e-3;
        for col in 0..state.len() {
            let mut plus = state.clone();
            let mut minus = state.clone();
            plus[col] += step;
            minus[col] -= step;
            let numeric = (projector.project(&plus) - projector.project(&minus)) / (2.0 * step);
            for row in 0..12 {
                assert_relative_eq!(analytic[(row, col)], numeric[row], epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn test_cepstrum_pads_past_model_order() {
        let c = lpc_to_cepstrum(&[-0.9], 5);
        // Single real pole at 0.9: c_n = 0.9^n / n
        for (idx, &value) in c.iter().enumerate() {
            let n = (idx + 1) as f64;
            assert_relative_eq!(value, 0.9f64.powf(n) / n, epsilon = 1e-12);
        }
    }
}
