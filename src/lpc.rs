//! Linear predictive coding
//!
//! Fits an all-pole model `1 / (1 + a1·z^-1 + ... + ap·z^-p)` to one analysis
//! frame. Three estimators are available:
//!
//! - **Autocorrelation**: Levinson-Durbin recursion on the biased
//!   autocorrelation of the (already windowed) frame.
//! - **Covariance**: recursive elimination of the covariance normal equations.
//! - **Burg**: forward/backward prediction-error lattice, no windowing bias.
//!
//! None of them emit NaNs on degenerate input. When the recursion cannot
//! continue (silence, a non-positive pivot or error power) the model built so
//! far is returned at a reduced order; callers check [`LpcModel::order`] and
//! [`LpcModel::is_usable`] before using it.

use serde::{Deserialize, Serialize};

use crate::cepstrum;

/// Coefficient damping applied by the Burg estimator, `a_k *= BURG_DAMPING^k`
pub const BURG_DAMPING: f64 = 0.99;

/// LPC estimation method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LpcMethod {
    /// Levinson-Durbin on the autocorrelation sequence
    #[default]
    Autocorrelation,
    /// Covariance method
    Covariance,
    /// Burg's method
    Burg,
}

/// All-pole model of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct LpcModel {
    /// a[1..p] in the `1 + Σ a_i z^-i` convention
    coefficients: Vec<f64>,
    /// Prediction error power attained at the returned order
    gain: f64,
    requested_order: usize,
}

impl LpcModel {
    pub fn new(coefficients: Vec<f64>, gain: f64, requested_order: usize) -> Self {
        Self {
            coefficients,
            gain,
            requested_order,
        }
    }

    /// Model with no coefficients, used for silent or degenerate frames
    pub fn empty(requested_order: usize) -> Self {
        Self::new(Vec::new(), 0.0, requested_order)
    }

    /// Attained order (may be below the requested one)
    pub fn order(&self) -> usize {
        self.coefficients.len()
    }

    pub fn requested_order(&self) -> usize {
        self.requested_order
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    /// Whether the recursion stopped before the requested order
    pub fn is_reduced(&self) -> bool {
        self.order() < self.requested_order
    }

    /// A model is usable when it has at least one coefficient, a positive
    /// gain, and only finite values
    pub fn is_usable(&self) -> bool {
        self.order() > 0
            && self.gain > 0.0
            && self.gain.is_finite()
            && self.coefficients.iter().all(|c| c.is_finite())
    }

    /// Denominator polynomial `[1, a1, ..., ap]`, leading coefficient first
    pub fn polynomial(&self) -> Vec<f64> {
        let mut p = Vec::with_capacity(self.order() + 1);
        p.push(1.0);
        p.extend_from_slice(&self.coefficients);
        p
    }

    /// First `count` cepstral coefficients `c_1..c_count` of the model
    pub fn cepstrum(&self, count: usize) -> Vec<f64> {
        cepstrum::lpc_to_cepstrum(&self.coefficients, count)
    }

    /// Reflection coefficients by step-down recursion
    ///
    /// Returns `None` if the model is unstable (some `|k_i| >= 1`).
    pub fn reflection_coefficients(&self) -> Option<Vec<f64>> {
        let p = self.order();
        let mut a = self.coefficients.clone();
        let mut k = vec![0.0; p];

        for i in (1..=p).rev() {
            let ki = a[i - 1];
            if !ki.is_finite() || ki.abs() >= 1.0 {
                return None;
            }
            k[i - 1] = ki;
            let scale = 1.0 - ki * ki;
            let previous: Vec<f64> = (1..i)
                .map(|j| (a[j - 1] - ki * a[i - j - 1]) / scale)
                .collect();
            a.truncate(i - 1);
            a.copy_from_slice(&previous);
        }
        Some(k)
    }

    /// Normalized model autocorrelation `r_0..r_lags` with `r_0 = 1`
    ///
    /// Computed by the step-up recursion from the reflection coefficients and
    /// extended past the model order with the prediction recurrence.
    pub fn autocorrelation(&self, lags: usize) -> Option<Vec<f64>> {
        let k = self.reflection_coefficients()?;
        let p = k.len();
        let mut r = vec![0.0; lags.max(p) + 1];
        r[0] = 1.0;

        let mut a: Vec<f64> = Vec::with_capacity(p);
        let mut error = 1.0;
        for (i, &ki) in k.iter().enumerate() {
            let order = i + 1;
            let acc: f64 = (1..order).map(|j| a[j - 1] * r[order - j]).sum();
            r[order] = -ki * error - acc;

            let mut next: Vec<f64> = (1..order).map(|j| a[j - 1] + ki * a[order - j - 1]).collect();
            next.push(ki);
            a = next;
            error *= 1.0 - ki * ki;
        }

        for n in p + 1..r.len() {
            r[n] = -(1..=p).map(|j| a[j - 1] * r[n - j]).sum::<f64>();
        }
        r.truncate(lags + 1);
        Some(r)
    }

    /// Itakura distance from this model to `other`
    ///
    /// The ratio of the prediction error of `other`'s inverse filter to that
    /// of this model's own inverse filter, both measured on this model's
    /// spectrum. Equal models give 1; the value grows with spectral mismatch.
    pub fn itakura_distance(&self, other: &LpcModel) -> Option<f64> {
        let lags = self.order().max(other.order());
        let r = self.autocorrelation(lags)?;
        let own = toeplitz_quadratic_form(&self.polynomial(), &r);
        if own <= 0.0 {
            return None;
        }
        Some(toeplitz_quadratic_form(&other.polynomial(), &r) / own)
    }
}

/// `Σ_i Σ_j a_i a_j r_|i-j|`
fn toeplitz_quadratic_form(a: &[f64], r: &[f64]) -> f64 {
    let mut total = 0.0;
    for (i, &ai) in a.iter().enumerate() {
        for (j, &aj) in a.iter().enumerate() {
            total += ai * aj * r[i.abs_diff(j)];
        }
    }
    total
}

/// LPC estimator with reusable scratch buffers
///
/// One instance per stream; the buffers only grow when the frame length or
/// order changes.
#[derive(Debug, Clone)]
pub struct LinearPredictor {
    method: LpcMethod,
    burg_damping: f64,
    forward: Vec<f64>,
    backward: Vec<f64>,
    work: Vec<f64>,
}

impl LinearPredictor {
    pub fn new(method: LpcMethod) -> Self {
        Self {
            method,
            burg_damping: BURG_DAMPING,
            forward: Vec::new(),
            backward: Vec::new(),
            work: Vec::new(),
        }
    }

    /// Override the Burg coefficient damping (1.0 disables it)
    pub fn with_burg_damping(mut self, damping: f64) -> Self {
        self.burg_damping = damping;
        self
    }

    pub fn method(&self) -> LpcMethod {
        self.method
    }

    /// Fit an all-pole model of the given order to `samples`
    pub fn solve(&mut self, samples: &[f64], order: usize) -> LpcModel {
        let model = match self.method {
            LpcMethod::Autocorrelation => self.autocorrelation(samples, order),
            LpcMethod::Covariance => self.covariance(samples, order),
            LpcMethod::Burg => self.burg(samples, order),
        };

        if model.is_reduced() {
            tracing::debug!(
                method = ?self.method,
                requested = order,
                attained = model.order(),
                "LPC recursion stopped early"
            );
        }
        model
    }

    fn autocorrelation(&mut self, x: &[f64], order: usize) -> LpcModel {
        let n = x.len();
        let p = order.min(n.saturating_sub(1));
        if p == 0 {
            return LpcModel::empty(order);
        }

        resize_zeroed(&mut self.work, p + 1);
        let r = &mut self.work;
        for (lag, rk) in r.iter_mut().enumerate() {
            *rk = x[..n - lag].iter().zip(&x[lag..]).map(|(a, b)| a * b).sum();
        }
        if r[0] <= 0.0 || !r[0].is_finite() {
            return LpcModel::empty(order);
        }

        let mut a: Vec<f64> = Vec::with_capacity(p);
        let mut error = r[0];
        for i in 1..=p {
            let acc = r[i] + (1..i).map(|j| a[j - 1] * r[i - j]).sum::<f64>();
            let k = -acc / error;
            let next_error = error * (1.0 - k * k);
            if !(next_error > 0.0) || !k.is_finite() {
                break;
            }

            let mut next: Vec<f64> = (1..i).map(|j| a[j - 1] + k * a[i - j - 1]).collect();
            next.push(k);
            a = next;
            error = next_error;
        }

        LpcModel::new(a, error, order)
    }

    /// Covariance method; `x` is addressed 1-based through `s(i)` to keep the
    /// triangular `b` storage readable
    fn covariance(&mut self, x: &[f64], order: usize) -> LpcModel {
        let n = x.len();
        let m = order;
        if m == 0 || n <= m + 1 {
            return LpcModel::empty(order);
        }
        let s = |i: usize| x[i - 1];

        // b: row i occupies indices i(i-1)/2 + 1 ..= i(i+1)/2
        let mut b = vec![0.0; m * (m + 1) / 2 + 1];
        let mut beta = vec![0.0; m + 1];
        let mut cc = vec![0.0; m + 2];
        let mut a = vec![0.0; m + 2];

        let mut gain = 0.0;
        for i in m + 1..=n {
            gain += s(i) * s(i);
            cc[1] += s(i) * s(i - 1);
            cc[2] += s(i - 1) * s(i - 1);
        }
        if gain <= 0.0 || cc[2] <= 0.0 {
            return LpcModel::empty(order);
        }

        b[1] = 1.0;
        beta[1] = cc[2];
        a[1] = 1.0;
        a[2] = -cc[1] / cc[2];
        gain += a[2] * cc[1];
        if gain <= 0.0 {
            return LpcModel::empty(order);
        }

        let mut attained = 1;
        for i in 2..=m {
            for j in 1..=i {
                cc[i - j + 2] = cc[i - j + 1] + s(m - i + 1) * s(m - i + j) - s(n - i + 1) * s(n - i + j);
            }
            cc[1] = (m + 1..=n).map(|j| s(j - i) * s(j)).sum();

            let row = i * (i - 1) / 2;
            b[row + i] = 1.0;
            let mut pivot_failed = false;
            for j in 1..i {
                if beta[j] < 0.0 {
                    pivot_failed = true;
                    break;
                }
                if beta[j] == 0.0 {
                    continue;
                }
                let row_j = j * (j - 1) / 2;
                let gamma = (1..=j).map(|k| cc[k + 1] * b[row_j + k]).sum::<f64>() / beta[j];
                for k in 1..=j {
                    b[row + k] -= gamma * b[row_j + k];
                }
            }
            if pivot_failed {
                break;
            }

            beta[i] = (1..=i).map(|j| cc[j + 1] * b[row + j]).sum();
            if beta[i] <= 0.0 {
                break;
            }

            let sum: f64 = (1..=i).map(|j| cc[j] * a[j]).sum();
            let reflection = -sum / beta[i];
            let next_gain = gain - reflection * reflection * beta[i];
            if !(next_gain > 0.0) {
                break;
            }

            for j in 2..=i {
                a[j] += reflection * b[row + j - 1];
            }
            a[i + 1] = reflection;
            gain = next_gain;
            attained = i;
        }

        LpcModel::new(a[2..attained + 2].to_vec(), gain, order)
    }

    fn burg(&mut self, x: &[f64], order: usize) -> LpcModel {
        let n = x.len();
        if n < 3 || order == 0 {
            return LpcModel::empty(order);
        }
        let m = order.min(n - 1);

        let mut xms = x.iter().map(|v| v * v).sum::<f64>() / n as f64;
        if !(xms > 0.0) {
            return LpcModel::empty(order);
        }

        resize_zeroed(&mut self.forward, n);
        resize_zeroed(&mut self.backward, n);
        resize_zeroed(&mut self.work, m);
        let b1 = &mut self.forward;
        let b2 = &mut self.backward;
        let aa = &mut self.work;

        b1[0] = x[0];
        b2[n - 2] = x[n - 1];
        for j in 1..n - 1 {
            b1[j] = x[j];
            b2[j - 1] = x[j];
        }

        // Lattice in the positive convention A(z) = 1 - Σ a_i z^-i
        let mut a = vec![0.0; m];
        let mut attained = 0;
        for i in 0..m {
            let mut num = 0.0;
            let mut den = 0.0;
            for j in 0..n - i - 1 {
                num += b1[j] * b2[j];
                den += b1[j] * b1[j] + b2[j] * b2[j];
            }
            if !(den > 0.0) {
                break;
            }

            let k = 2.0 * num / den;
            let next_xms = xms * (1.0 - k * k);
            if !(next_xms > 0.0) {
                break;
            }

            a[i] = k;
            for j in 0..i {
                a[j] = aa[j] - k * aa[i - j - 1];
            }
            xms = next_xms;
            attained = i + 1;

            if i + 1 < m {
                aa[..=i].copy_from_slice(&a[..=i]);
                for j in 0..n - i - 2 {
                    b1[j] -= aa[i] * b2[j];
                    b2[j] = b2[j + 1] - aa[i] * b1[j + 1];
                }
            }
        }

        let mut damping = 1.0;
        let coefficients = a[..attained]
            .iter()
            .map(|&c| {
                damping *= self.burg_damping;
                -c * damping
            })
            .collect();
        LpcModel::new(coefficients, xms, order)
    }
}

fn resize_zeroed(buffer: &mut Vec<f64>, len: usize) {
    if buffer.len() != len {
        buffer.resize(len, 0.0);
    }
    buffer.fill(0.0);
}
