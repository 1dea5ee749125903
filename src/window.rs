//! Window functions for frame analysis
//!
//! Windows taper each analysis frame before LPC estimation.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Edge attenuation of the Gaussian window, `exp(-12)`
const GAUSSIAN_EDGE: f64 = 6.14421235332821e-6;

/// Window shapes available for analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowShape {
    /// Rectangular window (no windowing)
    Rectangular,
    /// Hanning window (raised cosine)
    Hanning,
    /// Hamming window
    Hamming,
    /// Gaussian window, shifted and rescaled so the edges reach zero
    #[default]
    Gaussian,
}

impl WindowShape {
    /// Compute the window value at a normalized position
    ///
    /// # Arguments
    /// * `position` - Position in the window, normalized to [-0.5, 0.5]
    ///                where 0 is the center
    ///
    /// # Returns
    /// The window amplitude at the given position (0.0 to 1.0)
    pub fn value_at(self, position: f64) -> f64 {
        if position.abs() > 0.5 {
            return 0.0;
        }

        match self {
            WindowShape::Rectangular => 1.0,
            WindowShape::Hanning => 0.5 + 0.5 * (2.0 * PI * position).cos(),
            WindowShape::Hamming => 0.54 + 0.46 * (2.0 * PI * position).cos(),
            WindowShape::Gaussian => {
                // exp(-48 x²) over x in [-0.5, 0.5], edges pulled down to 0
                let gaussian = (-48.0 * position * position).exp();
                ((gaussian - GAUSSIAN_EDGE) / (1.0 - GAUSSIAN_EDGE)).max(0.0)
            }
        }
    }

    /// Generate a complete window of the given size
    pub fn generate(self, size: usize) -> Vec<f64> {
        (0..size)
            .map(|i| {
                // Map sample index to normalized position [-0.5, 0.5]
                let position = (i as f64 + 0.5) / size as f64 - 0.5;
                self.value_at(position)
            })
            .collect()
    }

    /// Multiply `samples` by the window into `out`, reusing its allocation
    pub fn apply_into(self, samples: &[f64], out: &mut Vec<f64>) {
        let n = samples.len();
        out.clear();
        out.extend(samples.iter().enumerate().map(|(i, &s)| {
            let position = (i as f64 + 0.5) / n as f64 - 0.5;
            s * self.value_at(position)
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rectangular_window() {
        let window = WindowShape::Rectangular.generate(10);
        assert_eq!(window.len(), 10);
        for &v in &window {
            assert_relative_eq!(v, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_symmetric_windows() {
        for shape in [WindowShape::Hanning, WindowShape::Hamming, WindowShape::Gaussian] {
            let window = shape.generate(100);
            for i in 0..50 {
                assert_relative_eq!(window[i], window[99 - i], epsilon = 1e-10);
            }
            assert!(window[49] > 0.99);
        }
    }

    #[test]
    fn test_window_edges() {
        assert_relative_eq!(WindowShape::Gaussian.value_at(0.5), 0.0, epsilon = 1e-12);
        assert_relative_eq!(WindowShape::Hanning.value_at(0.5), 0.0, epsilon = 1e-12);
        assert_relative_eq!(WindowShape::Hamming.value_at(0.5), 0.08, epsilon = 1e-12);
        assert_eq!(WindowShape::Hamming.value_at(0.6), 0.0);
    }

    #[test]
    fn test_apply_into_matches_generate() {
        let samples = vec![2.0; 16];
        let mut out = vec![0.0; 3];
        WindowShape::Gaussian.apply_into(&samples, &mut out);

        let window = WindowShape::Gaussian.generate(16);
        assert_eq!(out.len(), 16);
        for (o, w) in out.iter().zip(window) {
            assert_relative_eq!(*o, 2.0 * w);
        }
    }

    #[test]
    fn test_serde_names() {
        let shape: WindowShape = serde_json::from_str("\"hamming\"").unwrap();
        assert_eq!(shape, WindowShape::Hamming);
        assert_eq!(serde_json::to_string(&WindowShape::Gaussian).unwrap(), "\"gaussian\"");
    }
}
