//! End-to-end tests on a synthetic vowel
//!
//! The vowel is an impulse train at ~120 Hz filtered by a cascade of
//! second-order resonators, so the true pitch and formants are known.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use speechtrack_core::{AnalysisConfig, AnalysisResult, Analyzer, FormantTracking, Sound, Track};
use tracing_subscriber::EnvFilter;

const FS: f64 = 16000.0;
const PERIOD: usize = 133;
const FORMANTS: [(f64, f64); 3] = [(650.0, 80.0), (1200.0, 100.0), (2600.0, 140.0)];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn synthetic_vowel(duration: f64) -> Sound {
    let n = (duration * FS).round() as usize;
    let mut rng = StdRng::seed_from_u64(1234);
    let mut signal: Vec<f64> = (0..n)
        .map(|i| {
            let pulse = if i % PERIOD == 0 { 1.0 } else { 0.0 };
            pulse + 1e-4 * rng.gen_range(-1.0..1.0)
        })
        .collect();

    for (frequency, bandwidth) in FORMANTS {
        let r = (-PI * bandwidth / FS).exp();
        let a1 = 2.0 * r * (2.0 * PI * frequency / FS).cos();
        let a2 = -r * r;
        let (mut y1, mut y2) = (0.0, 0.0);
        for x in signal.iter_mut() {
            let y = *x + a1 * y1 + a2 * y2;
            y2 = y1;
            y1 = y;
            *x = y;
        }
    }

    let peak = signal.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
    Sound::from_samples_owned(signal.iter().map(|s| 0.5 * s / peak).collect(), FS)
}

/// Median of the values between 0.1 s and 0.5 s
fn steady_median(track: &Track) -> Option<f64> {
    let mut values: Vec<f64> = track
        .points()
        .iter()
        .filter(|p| p.time > 0.1 && p.time < 0.5)
        .filter_map(|p| p.value)
        .collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    Some(values[values.len() / 2])
}

fn analyze(config: AnalysisConfig) -> AnalysisResult {
    init_tracing();
    let mut analyzer = Analyzer::new(config).unwrap();
    analyzer.analyze(&synthetic_vowel(0.6)).unwrap()
}

fn assert_formants(result: &AnalysisResult, count: usize, tolerance: f64) {
    for (number, (expected, _)) in FORMANTS.iter().enumerate().take(count) {
        let track = result.formant(number + 1).unwrap();
        let median = steady_median(track).unwrap();
        assert!(
            (median - expected).abs() <= tolerance * expected,
            "F{} median {median} Hz, expected {expected} Hz",
            number + 1
        );
    }
}

#[test]
fn test_pitch_of_synthetic_vowel() {
    let result = analyze(AnalysisConfig::default());
    let expected = FS / PERIOD as f64;

    let median = steady_median(&result.pitch).unwrap();
    assert!((median - expected).abs() < 0.05 * expected, "median F0 {median} Hz");
    assert!(result.pitch.voiced_count() > result.pitch.len() / 2);
}

#[test]
fn test_kalman_tracks_synthetic_vowel() {
    let result = analyze(AnalysisConfig::default());

    assert_eq!(result.formants.len(), 3);
    assert_formants(&result, 3, 0.1);

    // Slots stay ordered on every voiced frame
    for i in 0..result.pitch.len() {
        let values: Vec<Option<f64>> = result.formants.iter().map(|t| t.value_at_frame(i)).collect();
        if let [Some(f1), Some(f2), Some(f3)] = values[..] {
            assert!(f1 <= f2 && f2 <= f3);
        }
    }
}

#[test]
fn test_raw_candidates_of_synthetic_vowel() {
    let result = analyze(AnalysisConfig {
        tracking: FormantTracking::Raw,
        ..AnalysisConfig::default()
    });
    assert_formants(&result, 2, 0.1);

    // Raw mode reports every frame with a usable model, voiced or not
    let f1 = result.formant(1).unwrap();
    assert!(f1.voiced_count() >= result.pitch.voiced_count());
}

#[test]
fn test_viterbi_tracks_synthetic_vowel() {
    let result = analyze(AnalysisConfig {
        tracking: FormantTracking::Viterbi,
        ..AnalysisConfig::default()
    });
    assert_formants(&result, 3, 0.1);

    // Tracks are only reported where the pitch tracker found voicing
    for (i, point) in result.pitch.points().iter().enumerate() {
        if point.value.is_none() {
            assert!(result.formants.iter().all(|t| t.value_at_frame(i).is_none()));
        }
    }
}

#[test]
fn test_configuration_document() {
    let config: AnalysisConfig = serde_json::from_str(
        r#"{
            "tracking": "viterbi",
            "lpc": { "method": "burg", "order": 10 },
            "formant": { "solver": "filtered_lp" },
            "pitch": { "f0_min": 75.0, "f0_max": 300.0, "frame_length": 0.03 }
        }"#,
    )
    .unwrap();
    let result = analyze(config);

    assert_formants(&result, 2, 0.1);
    let median = steady_median(&result.pitch).unwrap();
    assert!((median - FS / PERIOD as f64).abs() < 6.0);
}
