//! FFT wrapper used by resampling
//!
//! Plans are cached per instance by `rustfft`'s planner, so each stream
//! keeps its own `Fft` and nothing is shared between threads.

use num_complex::Complex;
use rustfft::FftPlanner;

/// FFT processor with cached plans
pub struct Fft {
    planner: FftPlanner<f64>,
}

impl Fft {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// Compute FFT of real-valued input
    ///
    /// # Arguments
    /// * `input` - Real-valued input samples
    /// * `output_size` - Size of the FFT (will be zero-padded if larger than input)
    ///
    /// # Returns
    /// Complex-valued FFT result of length `max(output_size, input.len())`
    pub fn real_fft(&mut self, input: &[f64], output_size: usize) -> Vec<Complex<f64>> {
        let fft_size = output_size.max(input.len());
        let fft = self.planner.plan_fft_forward(fft_size);

        let mut buffer: Vec<Complex<f64>> = input
            .iter()
            .map(|&x| Complex::new(x, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(fft_size)
            .collect();

        fft.process(&mut buffer);
        buffer
    }

    /// Compute inverse FFT, normalized by the transform size
    pub fn inverse_fft(&mut self, input: &[Complex<f64>]) -> Vec<Complex<f64>> {
        let fft_size = input.len();
        let fft = self.planner.plan_fft_inverse(fft_size);

        let mut buffer = input.to_vec();
        fft.process(&mut buffer);

        let scale = 1.0 / fft_size as f64;
        for c in &mut buffer {
            *c *= scale;
        }
        buffer
    }
}

impl Default for Fft {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_fft_sine() {
        let mut fft = Fft::new();

        // Pure sine wave at bin 1
        let n = 16;
        let input: Vec<f64> = (0..n)
            .map(|i| (2.0 * PI * i as f64 / n as f64).sin())
            .collect();

        let spectrum = fft.real_fft(&input, n);

        assert_relative_eq!(spectrum[1].norm(), n as f64 / 2.0, epsilon = 1e-10);
        assert_relative_eq!(spectrum[0].norm(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(spectrum[2].norm(), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_inverse_fft_of_padded_input() {
        let mut fft = Fft::new();

        let input = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let spectrum = fft.real_fft(&input, 8);
        assert_eq!(spectrum.len(), 8);

        let recovered = fft.inverse_fft(&spectrum);
        for (i, rec) in recovered.iter().enumerate() {
            let expected = input.get(i).copied().unwrap_or(0.0);
            assert_relative_eq!(rec.re, expected, epsilon = 1e-10);
            assert_relative_eq!(rec.im, 0.0, epsilon = 1e-10);
        }
    }
}
