//! Formant candidates from LPC roots
//!
//! Each root `z = r·e^{iφ}` of the LPC polynomial in the upper half plane is
//! a resonance with
//!
//! ```text
//! frequency = |φ| · fs / 2π
//! bandwidth = -ln(r) · fs / π
//! ```
//!
//! Three solvers turn a root set into a [`FormantFrame`]:
//!
//! - [`FormantSolver::SimpleLp`] keeps every upper-half root inside the unit circle.
//! - [`FormantSolver::FilteredLp`] also requires `0.7 < r < 1` and a frequency
//!   at least 50 Hz away from DC and Nyquist.
//! - [`FormantSolver::PeakMerger`] additionally looks for two resonances that
//!   merged into one spectral peak. A candidate followed by a wide gap is
//!   suspected merged; the poles inside a sector around it are counted with
//!   the argument principle, and if there are two the pair is re-rooted
//!   locally. The sector never reaches past the midpoint to a neighbouring
//!   candidate, so a neighbour is not counted (or emitted) twice. Without
//!   this step closely spaced F1/F2 are under-counted.

use std::f64::consts::PI;

use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::config::FormantConfig;
use crate::lpc::LpcModel;
use crate::roots::{self, BairstowOptions, RootMethod};

/// Margin from DC and Nyquist applied by the filtered solver (Hz)
const FILTERED_MARGIN_HZ: f64 = 50.0;

/// A resonance with frequency and bandwidth
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormantCandidate {
    /// Frequency in Hz
    pub frequency: f64,
    /// Bandwidth in Hz
    pub bandwidth: f64,
}

impl FormantCandidate {
    pub fn new(frequency: f64, bandwidth: f64) -> Self {
        Self {
            frequency,
            bandwidth,
        }
    }

    /// Resonance described by a root of the LPC polynomial
    pub fn from_root(root: Complex<f64>, sample_rate: f64) -> Self {
        Self::from_polar(root.norm(), root.arg(), sample_rate)
    }

    fn from_polar(magnitude: f64, phase: f64, sample_rate: f64) -> Self {
        let bandwidth = if magnitude > 0.0 {
            -magnitude.ln() * sample_rate / PI
        } else {
            sample_rate / 2.0
        };
        Self {
            frequency: phase.abs() * sample_rate / (2.0 * PI),
            bandwidth,
        }
    }
}

/// Formant candidates of one frame, ascending by frequency
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormantFrame {
    formants: Vec<FormantCandidate>,
    intensity: f64,
}

impl FormantFrame {
    /// Create a frame; candidates are sorted by frequency
    pub fn new(mut formants: Vec<FormantCandidate>, intensity: f64) -> Self {
        sort_by_frequency(&mut formants);
        Self {
            formants,
            intensity,
        }
    }

    /// Frame without any formant
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get a specific formant (1-indexed: F1, F2, F3, ...)
    pub fn get_formant(&self, formant_number: usize) -> Option<&FormantCandidate> {
        if formant_number == 0 {
            return None;
        }
        self.formants.get(formant_number - 1)
    }

    /// Get the number of formants in this frame
    pub fn num_formants(&self) -> usize {
        self.formants.len()
    }

    pub fn formants(&self) -> &[FormantCandidate] {
        &self.formants
    }

    /// Energy measure of the frame (the LPC gain when built from a model)
    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn frequencies(&self) -> Vec<f64> {
        self.formants.iter().map(|f| f.frequency).collect()
    }

    /// Replace the candidates, keeping them sorted
    pub fn set_formants(&mut self, mut formants: Vec<FormantCandidate>) {
        sort_by_frequency(&mut formants);
        self.formants = formants;
    }
}

fn sort_by_frequency(formants: &mut [FormantCandidate]) {
    formants.sort_by(|a, b| {
        a.frequency
            .total_cmp(&b.frequency)
            .then(a.bandwidth.total_cmp(&b.bandwidth))
    });
}

/// Root-to-formant strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormantSolver {
    /// All upper-half roots inside the unit circle
    SimpleLp,
    /// Roots with `0.7 < r < 1`, away from DC and Nyquist
    FilteredLp,
    /// Filtered roots plus merged-peak resolution
    #[default]
    PeakMerger,
}

/// Method used to re-root a merged peak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergerRefinement {
    /// Two quadratic factors by Bairstow's method
    #[default]
    Bairstow,
    /// Two roots by Laguerre iteration with deflation
    Laguerre,
}

/// Converts LPC roots into a [`FormantFrame`]
#[derive(Debug, Clone)]
pub struct FormantExtractor {
    config: FormantConfig,
    bairstow: BairstowOptions,
}

impl FormantExtractor {
    pub fn new(config: FormantConfig) -> Self {
        Self {
            config,
            bairstow: BairstowOptions::default(),
        }
    }

    pub fn config(&self) -> &FormantConfig {
        &self.config
    }

    /// Find the roots of an LPC model and extract its formants
    ///
    /// Unusable models yield an empty frame. Roots are polished and reflected
    /// into the unit circle before extraction.
    pub fn extract_lpc(
        &self,
        model: &LpcModel,
        sample_rate: f64,
        method: RootMethod,
    ) -> FormantFrame {
        if !model.is_usable() {
            return FormantFrame::new(Vec::new(), model.gain().max(0.0));
        }
        let polynomial = model.polynomial();
        let mut roots = method.solve(&polynomial);
        roots::fix_into_unit_circle(&mut roots);
        self.extract(&polynomial, &roots, sample_rate, model.gain())
    }

    /// Extract formant candidates from the roots of `polynomial`
    ///
    /// # Arguments
    /// * `polynomial` - LPC polynomial, leading coefficient first; needed to
    ///   count and re-root merged peaks
    /// * `roots` - Its roots
    /// * `sample_rate` - Sample rate in Hz
    /// * `intensity` - Stored on the resulting frame
    pub fn extract(
        &self,
        polynomial: &[f64],
        roots: &[Complex<f64>],
        sample_rate: f64,
        intensity: f64,
    ) -> FormantFrame {
        let formants = match self.config.solver {
            FormantSolver::SimpleLp => roots
                .iter()
                .filter(|z| z.im >= 0.0 && z.norm() <= 1.0)
                .map(|&z| FormantCandidate::from_root(z, sample_rate))
                .filter(|f| f.frequency > 0.0)
                .collect(),
            FormantSolver::FilteredLp => {
                let nyquist = sample_rate / 2.0;
                roots
                    .iter()
                    .filter(|z| z.im >= 0.0)
                    .filter(|z| z.norm() > self.config.min_magnitude && z.norm() < 1.0)
                    .map(|&z| FormantCandidate::from_root(z, sample_rate))
                    .filter(|f| {
                        f.frequency > FILTERED_MARGIN_HZ && f.frequency < nyquist - FILTERED_MARGIN_HZ
                    })
                    .collect()
            }
            FormantSolver::PeakMerger => self.resolve_mergers(polynomial, roots, sample_rate),
        };
        FormantFrame::new(formants, intensity)
    }

    fn accepts(&self, z: Complex<f64>) -> bool {
        let r = z.norm();
        z.im >= 0.0 && r >= self.config.min_magnitude && r < 1.0 && z.arg() > 0.0
    }

    fn resolve_mergers(
        &self,
        polynomial: &[f64],
        roots: &[Complex<f64>],
        sample_rate: f64,
    ) -> Vec<FormantCandidate> {
        let mut peaks: Vec<Complex<f64>> = roots.iter().copied().filter(|&z| self.accepts(z)).collect();
        peaks.sort_by(|a, b| a.arg().total_cmp(&b.arg()));

        let hz_to_phase = 2.0 * PI / sample_rate;
        let half_width = 0.5 * self.config.merger_gap_hz * hz_to_phase;
        let min_phase = self.config.min_sector_hz * hz_to_phase;

        let mut formants = Vec::with_capacity(peaks.len() + 2);
        for (i, &peak) in peaks.iter().enumerate() {
            let candidate = FormantCandidate::from_root(peak, sample_rate);
            let suspected = peaks.get(i + 1).is_some_and(|next| {
                let next_frequency = next.arg() / hz_to_phase;
                next_frequency - candidate.frequency > self.config.merger_gap_hz
                    || (i == 0 && next_frequency > self.config.first_formant_ceiling_hz)
            });
            if !suspected {
                formants.push(candidate);
                continue;
            }

            let phase = peak.arg();
            let mut lo = (phase - half_width).max(min_phase);
            let mut hi = (phase + half_width).min(PI);
            if let Some(previous) = i.checked_sub(1).map(|j| peaks[j]) {
                lo = lo.max(0.5 * (previous.arg() + phase));
            }
            if let Some(next) = peaks.get(i + 1) {
                hi = hi.min(0.5 * (phase + next.arg()));
            }
            let count = roots::count_roots_in_sector(
                polynomial,
                lo,
                hi,
                self.config.sector_radius,
                self.config.max_count_depth,
            );

            if count != 2 {
                formants.push(candidate);
                continue;
            }

            let pair: Vec<Complex<f64>> = self
                .reroot(polynomial, phase)
                .into_iter()
                .map(|z| if z.im < 0.0 { z.conj() } else { z })
                .filter(|&z| self.accepts(z) && z.arg() >= lo && z.arg() <= hi)
                .collect();

            if pair.len() == 2 {
                tracing::trace!(
                    frequency = candidate.frequency,
                    "merged peak resolved into two formants"
                );
                formants.extend(pair.iter().map(|&z| FormantCandidate::from_root(z, sample_rate)));
            } else {
                tracing::debug!(
                    frequency = candidate.frequency,
                    resolved = pair.len(),
                    "could not separate merged peak, keeping single estimate"
                );
                formants.push(candidate);
            }
        }

        formants
    }

    /// Two roots near `magnitude = seed, phase`, upper half plane first
    fn reroot(&self, polynomial: &[f64], phase: f64) -> Vec<Complex<f64>> {
        let seed = self.config.seed_magnitude;
        match self.config.refinement {
            MergerRefinement::Bairstow => {
                let mut found = roots::bairstow(polynomial, seed, phase, 2, &self.bairstow);
                roots::polish_roots(polynomial, &mut found);
                // One representative per conjugate pair
                let mut upper: Vec<Complex<f64>> = found.into_iter().filter(|z| z.im > 0.0).collect();
                upper.sort_by(|a, b| (a.arg() - phase).abs().total_cmp(&(b.arg() - phase).abs()));
                upper.truncate(2);
                upper
            }
            MergerRefinement::Laguerre => roots::laguerre_pair_near(polynomial, seed, phase),
        }
    }
}

impl Default for FormantExtractor {
    fn default() -> Self {
        Self::new(FormantConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::polynomial;
    use approx::assert_relative_eq;

    const FS: f64 = 11000.0;

    fn pole(frequency: f64, bandwidth: f64) -> Complex<f64> {
        Complex::from_polar((-PI * bandwidth / FS).exp(), 2.0 * PI * frequency / FS)
    }

    fn conjugate_closed(upper: &[Complex<f64>]) -> Vec<Complex<f64>> {
        upper.iter().flat_map(|&z| [z, z.conj()]).collect()
    }

    fn extractor(solver: FormantSolver, refinement: MergerRefinement) -> FormantExtractor {
        FormantExtractor::new(FormantConfig {
            solver,
            refinement,
            ..FormantConfig::default()
        })
    }

    #[test]
    fn test_candidate_from_root() {
        let f = FormantCandidate::from_root(pole(1000.0, 80.0), FS);
        assert_relative_eq!(f.frequency, 1000.0, epsilon = 1e-9);
        assert_relative_eq!(f.bandwidth, 80.0, epsilon = 1e-9);
    }

    #[test]
    fn test_well_separated_formants_pass_through() {
        let true_roots = conjugate_closed(&[pole(500.0, 80.0), pole(1500.0, 100.0), pole(2500.0, 120.0)]);
        let p = polynomial::from_roots(&true_roots);
        let found = roots::roots(&p);

        for solver in [FormantSolver::SimpleLp, FormantSolver::FilteredLp, FormantSolver::PeakMerger] {
            let frame = extractor(solver, MergerRefinement::Bairstow).extract(&p, &found, FS, 1.0);
            assert_eq!(frame.num_formants(), 3, "{solver:?}");
            for (formant, expected) in frame.formants().iter().zip([500.0, 1500.0, 2500.0]) {
                assert_relative_eq!(formant.frequency, expected, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_filtered_solver_drops_wide_and_edge_roots() {
        let true_roots = conjugate_closed(&[
            pole(30.0, 50.0),
            pole(800.0, 80.0),
            pole(2000.0, 1500.0),
        ]);
        let p = polynomial::from_roots(&true_roots);
        let found = roots::roots(&p);

        let simple = extractor(FormantSolver::SimpleLp, MergerRefinement::Bairstow).extract(&p, &found, FS, 1.0);
        assert_eq!(simple.num_formants(), 3);

        let filtered = extractor(FormantSolver::FilteredLp, MergerRefinement::Bairstow).extract(&p, &found, FS, 1.0);
        assert_eq!(filtered.num_formants(), 1);
        assert_relative_eq!(filtered.get_formant(1).unwrap().frequency, 800.0, epsilon = 1e-3);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let true_roots = conjugate_closed(&[
            pole(450.0, 60.0),
            pole(900.0, 90.0),
            pole(2400.0, 150.0),
            pole(3500.0, 200.0),
        ]);
        let p = polynomial::from_roots(&true_roots);
        let found = roots::roots(&p);
        let extractor = FormantExtractor::default();

        let first = extractor.extract(&p, &found, FS, 0.5);
        let second = extractor.extract(&p, &found, FS, 0.5);
        assert_eq!(first, second);
        assert!(first
            .formants()
            .windows(2)
            .all(|w| w[0].frequency <= w[1].frequency));
    }

    #[test]
    fn test_merged_peak_is_split() {
        // Two close resonances; the supplied root set only holds a single
        // estimate between them, as a coarse solver would report.
        let a = pole(1000.0, 60.0);
        let b = pole(1150.0, 60.0);
        let c = pole(2800.0, 150.0);
        let p = polynomial::from_roots(&conjugate_closed(&[a, b, c]));
        let merged = pole(1075.0, 90.0);
        let reported = conjugate_closed(&[merged, c]);

        let frame = extractor(FormantSolver::PeakMerger, MergerRefinement::Laguerre)
            .extract(&p, &reported, FS, 1.0);
        let frequencies = frame.frequencies();
        assert_eq!(frequencies.len(), 3, "got {frequencies:?}");
        assert_relative_eq!(frequencies[0], 1000.0, epsilon = 1.0);
        assert_relative_eq!(frequencies[1], 1150.0, epsilon = 1.0);
        assert_relative_eq!(frequencies[2], 2800.0, epsilon = 1e-3);
    }

    #[test]
    fn test_unresolved_merger_keeps_estimate() {
        // The sector around the lone estimate holds a single pole, so the
        // estimate is kept as is.
        let a = pole(1000.0, 60.0);
        let c = pole(2800.0, 150.0);
        let p = polynomial::from_roots(&conjugate_closed(&[a, c]));
        let found = roots::roots(&p);

        for refinement in [MergerRefinement::Bairstow, MergerRefinement::Laguerre] {
            let frame = extractor(FormantSolver::PeakMerger, refinement).extract(&p, &found, FS, 1.0);
            assert_eq!(frame.num_formants(), 2);
            assert_relative_eq!(frame.get_formant(1).unwrap().frequency, 1000.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_bairstow_merger_yields_candidate_near_peak() {
        let a = pole(1000.0, 60.0);
        let b = pole(1150.0, 60.0);
        let c = pole(2800.0, 150.0);
        let p = polynomial::from_roots(&conjugate_closed(&[a, b, c]));
        let reported = conjugate_closed(&[pole(1075.0, 90.0), c]);

        let frame = extractor(FormantSolver::PeakMerger, MergerRefinement::Bairstow)
            .extract(&p, &reported, FS, 1.0);
        let frequencies = frame.frequencies();
        assert_eq!(frequencies.len(), 3, "got {frequencies:?}");
        assert_relative_eq!(frequencies[0], 1000.0, epsilon = 1.0);
        assert_relative_eq!(frequencies[1], 1150.0, epsilon = 1.0);
        assert_relative_eq!(frequencies[2], 2800.0, epsilon = 1e-3);
    }

    #[test]
    fn test_close_neighbour_is_not_counted_twice() {
        // F2 is suspected merged because of the wide gap to F3, and F1 lies
        // within half a merger gap of it
        let true_roots = conjugate_closed(&[pole(500.0, 80.0), pole(800.0, 90.0), pole(2500.0, 150.0)]);
        let p = polynomial::from_roots(&true_roots);
        let found = roots::roots(&p);

        for refinement in [MergerRefinement::Bairstow, MergerRefinement::Laguerre] {
            let frame = extractor(FormantSolver::PeakMerger, refinement).extract(&p, &found, FS, 1.0);
            let frequencies = frame.frequencies();
            assert_eq!(frequencies.len(), 3, "{refinement:?}: {frequencies:?}");
            for (f, expected) in frequencies.iter().zip([500.0, 800.0, 2500.0]) {
                assert_relative_eq!(*f, expected, epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn test_extract_lpc_skips_unusable_model() {
        let frame = FormantExtractor::default().extract_lpc(&LpcModel::empty(10), FS, RootMethod::Eigen);
        assert_eq!(frame.num_formants(), 0);
    }

    #[test]
    fn test_get_formant_is_one_based() {
        let frame = FormantFrame::new(
            vec![FormantCandidate::new(1500.0, 90.0), FormantCandidate::new(500.0, 60.0)],
            1.0,
        );
        assert!(frame.get_formant(0).is_none());
        assert_relative_eq!(frame.get_formant(1).unwrap().frequency, 500.0);
        assert_relative_eq!(frame.get_formant(2).unwrap().frequency, 1500.0);
        assert!(frame.get_formant(3).is_none());
    }
}
