//! Polynomial evaluation, deflation and synthesis
//!
//! Coefficients are stored highest power first:
//!
//! ```text
//! p(z) = p[0]·z^n + p[1]·z^(n-1) + ... + p[n]
//! ```
//!
//! For an LPC model `1 + a1·z^-1 + ... + ap·z^-p` the polynomial
//! `[1, a1, ..., ap]` has the model poles as its roots.

use num_complex::Complex;

/// Evaluate a real polynomial at a complex point using Horner's method
pub fn evaluate(p: &[f64], z: Complex<f64>) -> Complex<f64> {
    let mut acc = Complex::new(0.0, 0.0);
    for &c in p {
        acc = acc * z + c;
    }
    acc
}

/// Evaluate a real polynomial and its first derivative at a complex point
///
/// Real and imaginary parts are carried separately, which avoids building
/// a complex number per coefficient in the inner loop.
///
/// # Returns
/// `(p(z), p'(z))`
pub fn evaluate_with_derivative(p: &[f64], z: Complex<f64>) -> (Complex<f64>, Complex<f64>) {
    if p.is_empty() {
        return (Complex::new(0.0, 0.0), Complex::new(0.0, 0.0));
    }

    let (x, y) = (z.re, z.im);
    let mut pr = p[0];
    let mut pi = 0.0;
    let mut dpr = 0.0;
    let mut dpi = 0.0;

    for &c in &p[1..] {
        // dp = dp * z + p
        let tr = dpr;
        dpr = dpr * x - dpi * y + pr;
        dpi = tr * y + dpi * x + pi;

        // p = p * z + c
        let tr = pr;
        pr = pr * x - pi * y + c;
        pi = tr * y + pi * x;
    }

    (Complex::new(pr, pi), Complex::new(dpr, dpi))
}

/// Evaluate a real polynomial and its first derivative at a real point
pub fn evaluate_real_with_derivative(p: &[f64], x: f64) -> (f64, f64) {
    if p.is_empty() {
        return (0.0, 0.0);
    }
    let mut value = p[0];
    let mut derivative = 0.0;
    for &c in &p[1..] {
        derivative = derivative * x + value;
        value = value * x + c;
    }
    (value, derivative)
}

/// Evaluate a complex polynomial and its first `count` derivatives
///
/// Element `k` of the result is the k-th derivative at `z` (element 0 is
/// the value itself).
pub fn evaluate_derivatives(
    p: &[Complex<f64>],
    z: Complex<f64>,
    count: usize,
) -> Vec<Complex<f64>> {
    let mut d = vec![Complex::new(0.0, 0.0); count + 1];
    let Some((&lead, rest)) = p.split_first() else {
        return d;
    };
    d[0] = lead;

    for &c in rest {
        for k in (1..=count).rev() {
            d[k] = d[k] * z + d[k - 1];
        }
        d[0] = d[0] * z + c;
    }

    // d[k] holds the k-th Taylor coefficient; scale to derivatives
    let mut factorial = 1.0;
    for (k, dk) in d.iter_mut().enumerate().skip(1) {
        factorial *= k as f64;
        *dk *= factorial;
    }
    d
}

/// Divide a complex polynomial by `(z - root)`, dropping the remainder
pub fn deflate(p: &[Complex<f64>], root: Complex<f64>) -> Vec<Complex<f64>> {
    if p.len() <= 1 {
        return Vec::new();
    }
    let mut quotient = Vec::with_capacity(p.len() - 1);
    let mut acc = Complex::new(0.0, 0.0);
    for &c in &p[..p.len() - 1] {
        acc = acc * root + c;
        quotient.push(acc);
    }
    quotient
}

/// Build the monic real polynomial whose roots are `roots`
///
/// The root set should be closed under conjugation; imaginary residue of
/// the expanded product is discarded.
pub fn from_roots(roots: &[Complex<f64>]) -> Vec<f64> {
    let mut acc = vec![Complex::new(1.0, 0.0)];
    for &r in roots {
        acc.push(Complex::new(0.0, 0.0));
        for i in (1..acc.len()).rev() {
            let prev = acc[i - 1];
            acc[i] -= r * prev;
        }
    }
    acc.into_iter().map(|c| c.re).collect()
}

/// Promote real coefficients to complex ones
pub fn to_complex(p: &[f64]) -> Vec<Complex<f64>> {
    p.iter().map(|&c| Complex::new(c, 0.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_evaluate_quadratic() {
        // z^2 - 5z + 6
        let p = [1.0, -5.0, 6.0];
        let v = evaluate(&p, Complex::new(2.0, 0.0));
        assert_relative_eq!(v.re, 0.0, epsilon = 1e-12);

        let (v, dv) = evaluate_with_derivative(&p, Complex::new(1.0, 1.0));
        // (1+i)^2 - 5(1+i) + 6 = 2i - 5 - 5i + 6 = 1 - 3i
        assert_relative_eq!(v.re, 1.0, epsilon = 1e-12);
        assert_relative_eq!(v.im, -3.0, epsilon = 1e-12);
        // 2(1+i) - 5 = -3 + 2i
        assert_relative_eq!(dv.re, -3.0, epsilon = 1e-12);
        assert_relative_eq!(dv.im, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_real_evaluation_matches_complex() {
        let p = [2.0, -1.0, 0.5, 3.0];
        let (v, dv) = evaluate_real_with_derivative(&p, 0.7);
        let (cv, cdv) = evaluate_with_derivative(&p, Complex::new(0.7, 0.0));
        assert_relative_eq!(v, cv.re, epsilon = 1e-12);
        assert_relative_eq!(dv, cdv.re, epsilon = 1e-12);
    }

    #[test]
    fn test_derivatives_of_cubic() {
        // z^3 at z = 2: 8, 12, 12, 6
        let p = to_complex(&[1.0, 0.0, 0.0, 0.0]);
        let d = evaluate_derivatives(&p, Complex::new(2.0, 0.0), 3);
        assert_relative_eq!(d[0].re, 8.0, epsilon = 1e-12);
        assert_relative_eq!(d[1].re, 12.0, epsilon = 1e-12);
        assert_relative_eq!(d[2].re, 12.0, epsilon = 1e-12);
        assert_relative_eq!(d[3].re, 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_deflate_removes_root() {
        // (z - 2)(z - 3) / (z - 2) = z - 3
        let p = to_complex(&[1.0, -5.0, 6.0]);
        let q = deflate(&p, Complex::new(2.0, 0.0));
        assert_eq!(q.len(), 2);
        assert_relative_eq!(q[0].re, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q[1].re, -3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_from_roots_conjugate_pair() {
        // (z - i)(z + i) = z^2 + 1
        let p = from_roots(&[Complex::new(0.0, 1.0), Complex::new(0.0, -1.0)]);
        assert_eq!(p.len(), 3);
        assert_relative_eq!(p[0], 1.0);
        assert_relative_eq!(p[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(p[2], 1.0, epsilon = 1e-12);
    }
}
