//! Polynomial root finding
//!
//! Three ways to obtain the complex roots of a real polynomial:
//!
//! - **Eigen**: eigenvalues of the companion matrix via a real Schur
//!   decomposition. This is the default per-frame path.
//! - **Laguerre**: cubically convergent single-root iteration with deflation,
//!   also used to re-root a small neighbourhood of the unit disc.
//! - **Bairstow**: extraction of real quadratic factors seeded near a known
//!   (magnitude, phase), used when two resonances merged into one peak.
//!
//! Roots from any method can be polished with bounded Newton-Raphson steps and
//! reflected into the unit circle. [`count_roots_in_sector`] counts roots in an
//! angular sector with the argument principle.
//!
//! Coefficients are stored highest power first (see [`crate::utils::polynomial`]).

use std::f64::consts::PI;

use nalgebra::DMatrix;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::utils::polynomial;

/// Maximum Newton-Raphson steps when polishing a root
pub const MAX_POLISH_ITERATIONS: usize = 80;

/// Relative residual improvement below which polishing stops
const POLISH_TOLERANCE: f64 = 1e-6;

/// Schur iterations allowed per eigenvalue of the companion matrix
const EIGEN_ITERATIONS_PER_ROOT: usize = 40;

/// Iteration cap for a single Laguerre root
pub const LAGUERRE_MAX_ITERATIONS: usize = 5000;

/// Root-finding strategy for full polynomials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootMethod {
    /// Companion-matrix eigenvalues
    #[default]
    Eigen,
    /// Laguerre iteration with deflation
    Laguerre,
}

impl RootMethod {
    /// Find all roots of `p`, polished against the original polynomial
    ///
    /// The eigen path falls back to Laguerre when the Schur iteration does
    /// not converge within its budget.
    pub fn solve(self, p: &[f64]) -> Vec<Complex<f64>> {
        let p = strip_leading_zeros(p);
        if p.len() < 2 {
            return Vec::new();
        }

        let mut roots = match self {
            RootMethod::Eigen => match eigen_roots(p) {
                Some(roots) => roots,
                None => {
                    tracing::warn!(
                        degree = p.len() - 1,
                        "companion matrix eigenvalues did not converge, using Laguerre"
                    );
                    laguerre_roots(p)
                }
            },
            RootMethod::Laguerre => laguerre_roots(p),
        };

        polish_roots(p, &mut roots);
        roots
    }
}

/// Roots of `p` (with `p[0]` the leading coefficient) by the default method
pub fn roots(p: &[f64]) -> Vec<Complex<f64>> {
    RootMethod::Eigen.solve(p)
}

fn strip_leading_zeros(p: &[f64]) -> &[f64] {
    let start = p.iter().position(|&c| c != 0.0).unwrap_or(p.len());
    &p[start..]
}

/// Companion-matrix eigenvalues
///
/// Returns `None` if the Schur decomposition exceeds its iteration budget.
pub fn eigen_roots(p: &[f64]) -> Option<Vec<Complex<f64>>> {
    let p = strip_leading_zeros(p);
    if p.len() < 2 {
        return Some(Vec::new());
    }

    let n = p.len() - 1;
    let leading = p[0];

    match n {
        1 => return Some(vec![Complex::new(-p[1] / leading, 0.0)]),
        2 => return Some(quadratic_roots(p[1] / leading, p[2] / leading)),
        _ => {}
    }

    // Companion matrix of z^n + c[n-1] z^(n-1) + ... + c[0]: ones on the
    // subdiagonal, -c[i] down the last column, c[i] = p[n - i] / p[0].
    let mut companion = DMatrix::<f64>::zeros(n, n);
    for i in 1..n {
        companion[(i, i - 1)] = 1.0;
    }
    for i in 0..n {
        companion[(i, n - 1)] = -p[n - i] / leading;
    }

    let schur = nalgebra::linalg::Schur::try_new(
        companion,
        f64::EPSILON,
        EIGEN_ITERATIONS_PER_ROOT * n,
    )?;

    Some(
        schur
            .complex_eigenvalues()
            .iter()
            .map(|c| Complex::new(c.re, c.im))
            .collect(),
    )
}

/// Roots of the monic quadratic `z^2 + u·z + v`
fn quadratic_roots(u: f64, v: f64) -> Vec<Complex<f64>> {
    let discriminant = u * u - 4.0 * v;
    if discriminant >= 0.0 {
        let sqrt_d = discriminant.sqrt();
        vec![
            Complex::new((-u + sqrt_d) / 2.0, 0.0),
            Complex::new((-u - sqrt_d) / 2.0, 0.0),
        ]
    } else {
        let sqrt_d = (-discriminant).sqrt();
        vec![
            Complex::new(-u / 2.0, sqrt_d / 2.0),
            Complex::new(-u / 2.0, -sqrt_d / 2.0),
        ]
    }
}

/// Polish a complex root with Newton-Raphson steps
///
/// A step is taken only while the residual `|p(z)|` strictly decreases by
/// more than the relative tolerance; the best root seen is returned.
pub fn polish_complex_root(p: &[f64], root: Complex<f64>, max_iter: usize) -> Complex<f64> {
    let mut z = root;
    let mut best = root;
    let mut min_residual = f64::INFINITY;

    for _ in 0..max_iter {
        let (y, dy) = polynomial::evaluate_with_derivative(p, z);
        let residual = y.norm();
        if residual.is_nan() || residual >= min_residual {
            break;
        }
        let converged =
            min_residual.is_finite() && min_residual - residual <= POLISH_TOLERANCE * min_residual;

        best = z;
        min_residual = residual;
        if converged || residual == 0.0 || dy.norm() == 0.0 {
            break;
        }
        z -= y / dy;
    }

    best
}

/// Polish a real root with Newton-Raphson steps
pub fn polish_real_root(p: &[f64], root: f64, max_iter: usize) -> f64 {
    let mut x = root;
    let mut best = root;
    let mut min_residual = f64::INFINITY;

    for _ in 0..max_iter {
        let (y, dy) = polynomial::evaluate_real_with_derivative(p, x);
        let residual = y.abs();
        if residual.is_nan() || residual >= min_residual {
            break;
        }
        let converged =
            min_residual.is_finite() && min_residual - residual <= POLISH_TOLERANCE * min_residual;

        best = x;
        min_residual = residual;
        if converged || residual == 0.0 || dy == 0.0 {
            break;
        }
        x -= y / dy;
    }

    best
}

/// Polish every root against `p`
///
/// Complex roots are polished once and the result mirrored onto their
/// conjugate partner so the set stays closed under conjugation.
pub fn polish_roots(p: &[f64], roots: &mut [Complex<f64>]) {
    let mut done = vec![false; roots.len()];

    for i in 0..roots.len() {
        if done[i] {
            continue;
        }
        done[i] = true;
        let original = roots[i];

        if original.im == 0.0 {
            roots[i] = Complex::new(polish_real_root(p, original.re, MAX_POLISH_ITERATIONS), 0.0);
            continue;
        }

        let polished = polish_complex_root(p, original, MAX_POLISH_ITERATIONS);
        roots[i] = polished;

        let target = original.conj();
        let tolerance = 1e-8 * original.norm().max(1.0);
        let partner = (i + 1..roots.len())
            .filter(|&j| !done[j])
            .find(|&j| (roots[j] - target).norm() < tolerance);
        if let Some(j) = partner {
            roots[j] = polished.conj();
            done[j] = true;
        }
    }
}

/// Reflect roots outside the unit circle to `1 / conj(z)`
///
/// `1 / conj(z) = z / |z|^2`, which keeps the sign of the imaginary part.
pub fn fix_into_unit_circle(roots: &mut [Complex<f64>]) {
    for root in roots.iter_mut() {
        let magnitude = root.norm();
        if magnitude > 1.0 {
            *root /= magnitude * magnitude;
        }
    }
}

/// Iteration limits for [`bairstow`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BairstowOptions {
    /// Newton updates before restarting from the coefficient ratio guess
    pub max_iterations: usize,
    /// Newton updates across all restarts for one factor
    pub max_total_iterations: usize,
    /// Relative convergence tolerance on the quadratic coefficients
    pub tolerance: f64,
}

impl Default for BairstowOptions {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_total_iterations: 200,
            tolerance: 1e-12,
        }
    }
}

/// Extract real quadratic factors with Bairstow's method
///
/// Each factor `z^2 + u·z + v` is refined by Newton updates on the remainder
/// of synthetic division, starting from the quadratic whose roots are
/// `magnitude·e^{±i·phase}`. After a factor converges the polynomial is
/// deflated and the next one starts from the same seed.
///
/// # Arguments
/// * `p` - Polynomial, leading coefficient first
/// * `magnitude`, `phase` - Seed root in polar form
/// * `factors` - Number of quadratic factors to extract
///
/// # Returns
/// Up to `2 * factors` roots. Fewer are returned if the Newton denominator
/// vanishes or a factor fails to converge.
pub fn bairstow(
    p: &[f64],
    magnitude: f64,
    phase: f64,
    factors: usize,
    options: &BairstowOptions,
) -> Vec<Complex<f64>> {
    let p = strip_leading_zeros(p);
    if p.is_empty() {
        return Vec::new();
    }
    let lead = p[0];
    let mut a: Vec<f64> = p.iter().map(|&c| c / lead).collect();
    let mut roots = Vec::with_capacity(2 * factors);

    for _ in 0..factors {
        let n = a.len() - 1;
        if n < 3 {
            // Nothing left to iterate on; the remainder factors directly
            if n == 2 {
                roots.extend(quadratic_roots(a[1], a[2]));
            }
            break;
        }

        let mut u = -2.0 * magnitude * phase.cos();
        let mut v = magnitude * magnitude;
        let mut b = vec![0.0; n + 1];
        let mut c = vec![0.0; n];
        let mut iterations = 0;
        let mut total = 0;
        let mut converged = false;

        while total < options.max_total_iterations {
            synthetic_division(&a, u, v, &mut b);
            synthetic_division(&b[..n], u, v, &mut c);

            let denominator = c[n - 1] * c[n - 3] - c[n - 2] * c[n - 2];
            if denominator == 0.0 {
                tracing::debug!(found = roots.len(), "bairstow: zero update denominator");
                return roots;
            }
            let du = (b[n] * c[n - 3] - b[n - 1] * c[n - 2]) / denominator;
            let dv = (c[n - 1] * b[n - 1] - c[n - 2] * b[n]) / denominator;
            u += du;
            v += dv;
            iterations += 1;
            total += 1;

            if du.abs() <= options.tolerance * u.abs().max(1.0)
                && dv.abs() <= options.tolerance * v.abs().max(1.0)
            {
                converged = true;
                break;
            }

            if iterations >= options.max_iterations && a[n - 2] != 0.0 {
                iterations = 0;
                u = a[n - 1] / a[n - 2];
                v = a[n] / a[n - 2];
            }
        }

        if !converged {
            tracing::debug!(
                found = roots.len(),
                iterations = total,
                "bairstow: quadratic factor did not converge"
            );
            return roots;
        }

        roots.extend(quadratic_roots(u, v));
        synthetic_division(&a, u, v, &mut b);
        a = b[..n - 1].to_vec();
    }

    roots
}

/// Divide a monic polynomial by `z^2 + u·z + v`, writing the recurrence
/// terms into `out`. `out[..len - 2]` is the quotient and the last two
/// entries carry the remainder.
fn synthetic_division(a: &[f64], u: f64, v: f64, out: &mut [f64]) {
    for i in 0..a.len() {
        let mut value = a[i];
        if i >= 1 {
            value -= u * out[i - 1];
        }
        if i >= 2 {
            value -= v * out[i - 2];
        }
        out[i] = value;
    }
}

/// Refine one root of a complex polynomial with Laguerre's method
///
/// # Arguments
/// * `p` - Polynomial, leading coefficient first
/// * `start` - Initial guess
/// * `accuracy` - Relative step size at which iteration stops
pub fn laguerre_root(p: &[Complex<f64>], start: Complex<f64>, accuracy: f64) -> Complex<f64> {
    let n = p.len().saturating_sub(1);
    if n == 0 {
        return start;
    }
    let degree = n as f64;
    let mut x = start;

    for iteration in 1..=LAGUERRE_MAX_ITERATIONS {
        let d = polynomial::evaluate_derivatives(p, x, 2);
        if d[0].norm() == 0.0 {
            return x;
        }

        let g = d[1] / d[0];
        let h = g * g - d[2] / d[0];
        let sq = ((degree - 1.0) * (degree * h - g * g)).sqrt();
        let plus = g + sq;
        let minus = g - sq;
        let denominator = if plus.norm() >= minus.norm() { plus } else { minus };

        let mut dx = if denominator.norm() > 0.0 {
            Complex::new(degree, 0.0) / denominator
        } else {
            Complex::from_polar(1.0 + x.norm(), iteration as f64)
        };
        // Occasional fractional step breaks limit cycles
        if iteration % 10 == 0 {
            dx *= 0.5;
        }

        let next = x - dx;
        if (next - x).norm() <= accuracy * next.norm().max(1.0) {
            return next;
        }
        x = next;
    }

    tracing::debug!(re = x.re, im = x.im, "laguerre: iteration limit reached");
    x
}

/// All roots of a real polynomial by Laguerre iteration with deflation
///
/// Each root is found on the deflated polynomial at a coarse accuracy, then
/// re-polished on the full polynomial.
pub fn laguerre_roots(p: &[f64]) -> Vec<Complex<f64>> {
    let p = strip_leading_zeros(p);
    if p.len() < 2 {
        return Vec::new();
    }

    let full = polynomial::to_complex(p);
    let mut working = full.clone();
    let mut roots = Vec::with_capacity(p.len() - 1);

    while working.len() > 1 {
        let root = laguerre_root(&working, Complex::new(0.0, 0.0), 1e-6);
        roots.push(root);
        working = polynomial::deflate(&working, root);
    }

    for root in roots.iter_mut() {
        *root = laguerre_root(&full, *root, 1e-12);
    }
    roots
}

/// Find the two roots of `p` nearest a seed with Laguerre iteration
///
/// The first root is found from `magnitude·e^{i·phase}`; its conjugate pair
/// is deflated and the second root is found from the same seed, then
/// re-polished on the full polynomial. Roots are returned in the upper half
/// plane.
pub fn laguerre_pair_near(p: &[f64], magnitude: f64, phase: f64) -> Vec<Complex<f64>> {
    let p = strip_leading_zeros(p);
    if p.len() < 3 {
        return Vec::new();
    }

    let seed = Complex::from_polar(magnitude, phase);
    let full = polynomial::to_complex(p);
    let first = laguerre_root(&full, seed, 1e-12);

    let mut deflated = polynomial::deflate(&full, first);
    if first.im.abs() > 1e-10 * first.norm().max(1.0) && deflated.len() > 1 {
        deflated = polynomial::deflate(&deflated, first.conj());
    }
    if deflated.len() < 2 {
        return vec![upper(first)];
    }

    let second = laguerre_root(&deflated, seed, 1e-6);
    let second = laguerre_root(&full, second, 1e-12);
    vec![upper(first), upper(second)]
}

fn upper(z: Complex<f64>) -> Complex<f64> {
    if z.im < 0.0 {
        z.conj()
    } else {
        z
    }
}

/// Initial samples per contour edge before adaptive refinement
const CONTOUR_SAMPLES: usize = 32;

/// Count the roots of `p` inside the sector `phi_lo < arg z < phi_hi`, `|z| < radius`
///
/// The phase of `p` is followed around the closed sector boundary (ray out
/// along `phi_lo`, arc to `phi_hi`, ray back to the origin). Neighbouring
/// samples whose phases fall more than one octant apart are bisected until
/// they agree or `max_depth` is reached; the winding number is the total
/// phase change over `2π`.
///
/// `max_depth` bounds the work; a contour passing very close to a root may
/// need more depth than allowed, in which case the count can be off.
pub fn count_roots_in_sector(
    p: &[f64],
    phi_lo: f64,
    phi_hi: f64,
    radius: f64,
    max_depth: usize,
) -> usize {
    let (phi_lo, phi_hi) = if phi_lo <= phi_hi {
        (phi_lo, phi_hi)
    } else {
        (phi_hi, phi_lo)
    };
    if p.len() < 2 || phi_hi - phi_lo <= 0.0 || radius <= 0.0 {
        return 0;
    }

    let outward = |t: f64| Complex::from_polar(t * radius, phi_lo);
    let arc = |t: f64| Complex::from_polar(radius, phi_lo + t * (phi_hi - phi_lo));
    let inward = |t: f64| Complex::from_polar((1.0 - t) * radius, phi_hi);

    let total = phase_change(p, &outward, max_depth)
        + phase_change(p, &arc, max_depth)
        + phase_change(p, &inward, max_depth);

    let winding = (total / (2.0 * PI)).round();
    if winding > 0.0 {
        winding as usize
    } else {
        0
    }
}

/// Phase change of `p` along `path(t)`, `t` in `[0, 1]`
fn phase_change<F>(p: &[f64], path: &F, max_depth: usize) -> f64
where
    F: Fn(f64) -> Complex<f64>,
{
    let mut total = 0.0;
    let mut t0 = 0.0;
    let mut arg0 = polynomial::evaluate(p, path(t0)).arg();

    for k in 1..=CONTOUR_SAMPLES {
        let t1 = k as f64 / CONTOUR_SAMPLES as f64;
        let arg1 = polynomial::evaluate(p, path(t1)).arg();
        total += refine_phase(p, path, (t0, arg0), (t1, arg1), max_depth);
        t0 = t1;
        arg0 = arg1;
    }
    total
}

fn refine_phase<F>(p: &[f64], path: &F, start: (f64, f64), end: (f64, f64), depth: usize) -> f64
where
    F: Fn(f64) -> Complex<f64>,
{
    if depth == 0 || octant_distance(start.1, end.1) <= 1 {
        return wrap_phase(end.1 - start.1);
    }
    let tm = 0.5 * (start.0 + end.0);
    let mid = (tm, polynomial::evaluate(p, path(tm)).arg());
    refine_phase(p, path, start, mid, depth - 1) + refine_phase(p, path, mid, end, depth - 1)
}

fn octant(angle: f64) -> i32 {
    ((angle.rem_euclid(2.0 * PI) / (PI / 4.0)).floor() as i32).rem_euclid(8)
}

fn octant_distance(a: f64, b: f64) -> i32 {
    let d = (octant(a) - octant(b)).rem_euclid(8);
    d.min(8 - d)
}

fn wrap_phase(d: f64) -> f64 {
    (d + PI).rem_euclid(2.0 * PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pole(frequency: f64, bandwidth: f64, fs: f64) -> Complex<f64> {
        Complex::from_polar((-PI * bandwidth / fs).exp(), 2.0 * PI * frequency / fs)
    }

    fn with_conjugates(upper: &[Complex<f64>]) -> Vec<Complex<f64>> {
        upper.iter().flat_map(|&z| [z, z.conj()]).collect()
    }

    fn assert_recovered(expected: &[Complex<f64>], found: &[Complex<f64>]) {
        assert_eq!(expected.len(), found.len());
        for e in expected {
            let nearest = found
                .iter()
                .map(|f| (f - e).norm())
                .fold(f64::INFINITY, f64::min);
            assert!(
                nearest <= 1e-4 * e.norm(),
                "root {e} not recovered (closest distance {nearest})"
            );
        }
    }

    #[test]
    fn test_quadratic_roots() {
        // z^2 - 5z + 6
        let mut r: Vec<f64> = roots(&[1.0, -5.0, 6.0]).iter().map(|z| z.re).collect();
        r.sort_by(|a, b| a.total_cmp(b));
        assert_relative_eq!(r[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(r[1], 3.0, epsilon = 1e-10);
    }

    #[test]
    fn test_roots_recover_synthesized_polynomial() {
        let fs = 10000.0;
        let expected = with_conjugates(&[
            pole(500.0, 60.0, fs),
            pole(1500.0, 90.0, fs),
            pole(2500.0, 120.0, fs),
            pole(3500.0, 200.0, fs),
        ]);
        let p = polynomial::from_roots(&expected);

        assert_recovered(&expected, &roots(&p));
        assert_recovered(&expected, &RootMethod::Laguerre.solve(&p));
    }

    #[test]
    fn test_roots_include_real_factor() {
        let expected = vec![
            Complex::new(0.5, 0.0),
            Complex::new(-0.3, 0.0),
            Complex::new(0.2, 0.7),
            Complex::new(0.2, -0.7),
        ];
        let p = polynomial::from_roots(&expected);
        assert_recovered(&expected, &roots(&p));
    }

    #[test]
    fn test_fix_into_unit_circle() {
        let mut r = vec![
            Complex::new(2.0, 0.0),
            Complex::new(0.0, -1.5),
            Complex::new(0.3, 0.4),
        ];
        fix_into_unit_circle(&mut r);
        for z in &r {
            assert!(z.norm() <= 1.0 + 1e-12);
        }
        assert_relative_eq!(r[0].re, 0.5, epsilon = 1e-12);
        // imaginary sign preserved
        assert!(r[1].im < 0.0);
        assert_relative_eq!(r[2].re, 0.3);
    }

    #[test]
    fn test_polish_improves_perturbed_root() {
        let target = pole(1000.0, 80.0, 10000.0);
        let p = polynomial::from_roots(&[target, target.conj()]);
        let start = target + Complex::new(1e-3, -1e-3);
        let polished = polish_complex_root(&p, start, MAX_POLISH_ITERATIONS);
        assert!((polished - target).norm() < (start - target).norm());
        assert!((polished - target).norm() < 1e-9);
    }

    #[test]
    fn test_polish_keeps_conjugates_paired() {
        let fs = 10000.0;
        let expected = with_conjugates(&[pole(700.0, 80.0, fs), pole(2100.0, 150.0, fs)]);
        let p = polynomial::from_roots(&expected);
        let mut r: Vec<Complex<f64>> = expected
            .iter()
            .map(|z| z + Complex::new(1e-5, 1e-5 * z.im.signum()))
            .collect();
        polish_roots(&p, &mut r);
        assert_relative_eq!(r[0].re, r[1].re);
        assert_relative_eq!(r[0].im, -r[1].im);
    }

    #[test]
    fn test_bairstow_extracts_seeded_pair() {
        let fs = 10000.0;
        let a = pole(1000.0, 60.0, fs);
        let b = pole(1200.0, 60.0, fs);
        let far = pole(3000.0, 150.0, fs);
        let p = polynomial::from_roots(&with_conjugates(&[a, b, far]));

        let phase = 2.0 * PI * 1050.0 / fs;
        let found = bairstow(&p, 0.9, phase, 1, &BairstowOptions::default());
        assert_eq!(found.len(), 2);
        // a single factor yields one conjugate pair
        assert_relative_eq!(found[0].re, found[1].re, epsilon = 1e-9);
        assert_relative_eq!(found[0].im, -found[1].im, epsilon = 1e-9);

        let residual = polynomial::evaluate(&p, found[0]).norm();
        assert!(residual < 1e-8);
    }

    #[test]
    fn test_laguerre_pair_near_finds_both_merged_roots() {
        let fs = 10000.0;
        let a = pole(1000.0, 60.0, fs);
        let b = pole(1200.0, 60.0, fs);
        let far = pole(3000.0, 150.0, fs);
        let p = polynomial::from_roots(&with_conjugates(&[a, b, far]));

        let pair = laguerre_pair_near(&p, 0.9, 2.0 * PI * 1100.0 / fs);
        assert_eq!(pair.len(), 2);
        assert_recovered(&[a, b], &pair);
    }

    #[test]
    fn test_count_roots_in_sector() {
        let fs = 10000.0;
        let p = polynomial::from_roots(&with_conjugates(&[
            pole(1000.0, 60.0, fs),
            pole(1200.0, 60.0, fs),
            pole(3000.0, 150.0, fs),
        ]));
        let phi = |f: f64| 2.0 * PI * f / fs;

        assert_eq!(count_roots_in_sector(&p, phi(800.0), phi(1400.0), 2.0, 10), 2);
        assert_eq!(count_roots_in_sector(&p, phi(1100.0), phi(1400.0), 2.0, 10), 1);
        assert_eq!(count_roots_in_sector(&p, phi(1500.0), phi(2500.0), 2.0, 10), 0);
        assert_eq!(count_roots_in_sector(&p, phi(2700.0), phi(3300.0), 2.0, 10), 1);
    }
}
