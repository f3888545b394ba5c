// Vigil - Windowed anomaly detection pipeline
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Histogram and divergence math.
//!
//! Pure functions used by the Jensen–Shannon fingerprint:
//! - [`build_histogram`]: normalized histogram (probability mass function)
//! - [`shannon_entropy`]: entropy in bits
//! - [`js_divergence`]: Jensen–Shannon divergence in bits
//! - [`regularized_lower_gamma`]: `P(a, x) = γ(a, x) / Γ(a)`
//! - [`js_significance`]: divergence passed through `P`

use crate::error::FingerprintError;
use statrs::function::gamma::checked_gamma_lr;
use std::f64::consts::LN_2;

/// Tolerance used when checking that a histogram sums to one.
pub const PMF_TOLERANCE: f64 = 1e-9;

/// Check that `[min, max)` is a non-empty range of finite width.
pub fn validate_range(min: f64, max: f64) -> Result<(), FingerprintError> {
    if !min.is_finite() || !max.is_finite() || max <= min || !(max - min).is_finite() {
        return Err(FingerprintError::InvalidRange { min, max });
    }
    Ok(())
}

/// Build a normalized histogram of `samples` over `[min, max)`.
///
/// Bins have equal width `(max - min) / bin_count`. A sample equal to `max`
/// lands in the last bin. Every sample carries weight `1 / n`, so the result
/// sums to one for any non-empty input. An empty input yields an all-zero
/// histogram and a count of zero.
///
/// # Errors
///
/// - [`FingerprintError::InvalidBinCount`] if `bin_count == 0`
/// - [`FingerprintError::InvalidRange`] if the range is empty or not finite
/// - [`FingerprintError::SampleOutOfRange`] if a sample is outside `[min, max]` or NaN
///
/// # Example
///
/// ```rust
/// use vigil::fingerprint::histogram::build_histogram;
///
/// let (hist, count) = build_histogram(&[0.1, 0.1, 0.6, 0.9], 0.0, 1.0, 4).unwrap();
/// assert_eq!(count, 4);
/// assert_eq!(hist, vec![0.5, 0.0, 0.25, 0.25]);
/// ```
pub fn build_histogram(
    samples: &[f64],
    min: f64,
    max: f64,
    bin_count: usize,
) -> Result<(Vec<f64>, usize), FingerprintError> {
    if bin_count == 0 {
        return Err(FingerprintError::InvalidBinCount(bin_count));
    }
    validate_range(min, max)?;

    let count = samples.len();
    let mut hist = vec![0.0; bin_count];
    if count == 0 {
        return Ok((hist, 0));
    }

    let weight = 1.0 / count as f64;
    let width = (max - min) / bin_count as f64;

    for &x in samples {
        // NaN fails both comparisons, so check it explicitly
        if x.is_nan() || x < min || x > max {
            return Err(FingerprintError::SampleOutOfRange { value: x, min, max });
        }
        let index = (((x - min) / width).floor() as usize).min(bin_count - 1);
        hist[index] += weight;
    }

    Ok((hist, count))
}

/// Shannon entropy of a histogram in bits. Zero bins contribute nothing.
pub fn shannon_entropy(hist: &[f64]) -> f64 {
    -hist
        .iter()
        .filter(|&&v| v > 0.0)
        .map(|&v| v * v.log2())
        .sum::<f64>()
}

/// Jensen–Shannon divergence between two distributions, in bits.
///
/// `D = H(m) - (H(p) + H(q)) / 2` with `m = (p + q) / 2`. Small negative
/// values from rounding are clamped to zero.
pub fn js_divergence(p: &[f64], q: &[f64]) -> Result<f64, FingerprintError> {
    if p.len() != q.len() {
        return Err(FingerprintError::LengthMismatch {
            left: p.len(),
            right: q.len(),
        });
    }

    let m: Vec<f64> = p.iter().zip(q).map(|(a, b)| 0.5 * (a + b)).collect();
    let d = shannon_entropy(&m) - 0.5 * (shannon_entropy(p) + shannon_entropy(q));
    Ok(d.max(0.0))
}

/// Regularized lower incomplete gamma function `P(shape, x)`.
///
/// The edges `x == 0` and `x == inf` are handled here; the interior is
/// evaluated by `statrs`.
///
/// # Errors
///
/// - [`FingerprintError::InvalidGammaArgument`] if `shape <= 0`, `x < 0` or either is NaN
/// - [`FingerprintError::NumericInstability`] if the evaluation is not a finite probability
pub fn regularized_lower_gamma(shape: f64, x: f64) -> Result<f64, FingerprintError> {
    if shape.is_nan() || x.is_nan() || shape <= 0.0 || !shape.is_finite() || x < 0.0 {
        return Err(FingerprintError::InvalidGammaArgument { shape, x });
    }
    if x == 0.0 {
        return Ok(0.0);
    }
    if x.is_infinite() {
        return Ok(1.0);
    }

    let value = checked_gamma_lr(shape, x)
        .map_err(|_| FingerprintError::InvalidGammaArgument { shape, x })?;
    if !value.is_finite() {
        return Err(FingerprintError::NumericInstability { shape, x });
    }

    Ok(value.clamp(0.0, 1.0))
}

/// Significance of the divergence between two histograms of equal length.
///
/// Returns `P(0.5 * (n - 1), n * ln2 * D)` where `n` is the bin count. Small
/// values mean the distributions are indistinguishable. A single bin carries
/// no information, so its significance is zero.
pub fn js_significance(p: &[f64], q: &[f64]) -> Result<f64, FingerprintError> {
    let d = js_divergence(p, q)?;
    let n = p.len();
    if n < 2 {
        return Ok(0.0);
    }

    let shape = 0.5 * (n as f64 - 1.0);
    let x = n as f64 * LN_2 * d;
    regularized_lower_gamma(shape, x)
}

/// Check that `hist` is a probability mass function within [`PMF_TOLERANCE`].
pub fn is_pmf(hist: &[f64]) -> bool {
    hist.iter().all(|&v| v >= 0.0) && (hist.iter().sum::<f64>() - 1.0).abs() <= PMF_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_histogram_example() {
        let (hist, count) = build_histogram(&[0.1, 0.1, 0.6, 0.9], 0.0, 1.0, 4).unwrap();
        assert_eq!(count, 4);
        assert_relative_eq!(hist[0], 0.5);
        assert_relative_eq!(hist[1], 0.0);
        assert_relative_eq!(hist[2], 0.25);
        assert_relative_eq!(hist[3], 0.25);
    }

    #[test]
    fn test_max_lands_in_last_bin() {
        let (hist, _) = build_histogram(&[1.0, 0.0], 0.0, 1.0, 10).unwrap();
        assert_relative_eq!(hist[9], 0.5);
        assert_relative_eq!(hist[0], 0.5);
    }

    #[test]
    fn test_rounding_overflow_folds() {
        // (x - min) / width rounds up to bin_count for values just below max
        let max = 0.3;
        let x = 0.3 - f64::EPSILON / 4.0;
        let (hist, _) = build_histogram(&[x], 0.0, max, 3).unwrap();
        assert_eq!(hist.len(), 3);
        assert!(is_pmf(&hist));
    }

    #[test]
    fn test_out_of_range_sample() {
        let err = build_histogram(&[0.5, 1.5], 0.0, 1.0, 4).unwrap_err();
        assert!(matches!(err, FingerprintError::SampleOutOfRange { value, .. } if value == 1.5));

        let err = build_histogram(&[-0.1], 0.0, 1.0, 4).unwrap_err();
        assert!(matches!(err, FingerprintError::SampleOutOfRange { .. }));

        let err = build_histogram(&[f64::NAN], 0.0, 1.0, 4).unwrap_err();
        assert!(matches!(err, FingerprintError::SampleOutOfRange { .. }));
    }

    #[test]
    fn test_invalid_config() {
        assert_eq!(
            build_histogram(&[0.5], 0.0, 1.0, 0).unwrap_err(),
            FingerprintError::InvalidBinCount(0)
        );
        assert!(matches!(
            build_histogram(&[0.5], 1.0, 1.0, 4).unwrap_err(),
            FingerprintError::InvalidRange { .. }
        ));
        assert!(matches!(
            build_histogram(&[0.5], 0.0, f64::INFINITY, 4).unwrap_err(),
            FingerprintError::InvalidRange { .. }
        ));
    }

    #[test]
    fn test_overflowing_width_rejected() {
        // Both bounds are finite but max - min is not
        assert!(matches!(
            build_histogram(&[0.0, 1e308], -1e308, 1e308, 4).unwrap_err(),
            FingerprintError::InvalidRange { .. }
        ));
        assert!(validate_range(-1e307, 1e307).is_ok());
    }

    #[test]
    fn test_empty_samples() {
        let (hist, count) = build_histogram(&[], 0.0, 1.0, 5).unwrap();
        assert_eq!(count, 0);
        assert_eq!(hist, vec![0.0; 5]);
    }

    #[test]
    fn test_entropy_uniform_and_one_hot() {
        let uniform = vec![0.125; 8];
        assert_relative_eq!(shannon_entropy(&uniform), 3.0, epsilon = 1e-12);

        let one_hot = vec![0.0, 1.0, 0.0, 0.0];
        assert_eq!(shannon_entropy(&one_hot), 0.0);
        assert!(!shannon_entropy(&[0.0, 0.0]).is_nan());
    }

    #[test]
    fn test_js_divergence_identity_and_bounds() {
        let p = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(js_divergence(&p, &p).unwrap(), 0.0);

        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert_relative_eq!(js_divergence(&a, &b).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_js_divergence_symmetric() {
        let p = vec![0.7, 0.2, 0.1];
        let q = vec![0.1, 0.3, 0.6];
        assert_relative_eq!(
            js_divergence(&p, &q).unwrap(),
            js_divergence(&q, &p).unwrap(),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_js_divergence_length_mismatch() {
        let err = js_divergence(&[1.0], &[0.5, 0.5]).unwrap_err();
        assert_eq!(err, FingerprintError::LengthMismatch { left: 1, right: 2 });
    }

    #[test]
    fn test_regularized_gamma_exponential_case() {
        // P(1, x) = 1 - e^-x
        for &x in &[0.1, 1.0, 2.5, 10.0] {
            let expected = 1.0 - (-x as f64).exp();
            assert_relative_eq!(
                regularized_lower_gamma(1.0, x).unwrap(),
                expected,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_regularized_gamma_half_shape() {
        // P(0.5, 1) = erf(1)
        assert_relative_eq!(
            regularized_lower_gamma(0.5, 1.0).unwrap(),
            0.842_700_792_949_714_9,
            epsilon = 1e-12
        );
        // P(3, 2) = 1 - 5e^-2
        assert_relative_eq!(
            regularized_lower_gamma(3.0, 2.0).unwrap(),
            1.0 - 5.0 * (-2.0_f64).exp(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_regularized_gamma_large_arguments() {
        // The old 20-term series overflowed here
        let p = regularized_lower_gamma(500.0, 1000.0).unwrap();
        assert!(p.is_finite());
        assert_relative_eq!(p, 1.0, epsilon = 1e-9);

        let p = regularized_lower_gamma(500.0, 10.0).unwrap();
        assert!(p >= 0.0 && p < 1e-100);
    }

    #[test]
    fn test_regularized_gamma_domain() {
        assert_eq!(regularized_lower_gamma(2.0, 0.0).unwrap(), 0.0);
        assert_eq!(regularized_lower_gamma(2.0, f64::INFINITY).unwrap(), 1.0);
        assert!(matches!(
            regularized_lower_gamma(0.0, 1.0),
            Err(FingerprintError::InvalidGammaArgument { .. })
        ));
        assert!(matches!(
            regularized_lower_gamma(1.0, -1.0),
            Err(FingerprintError::InvalidGammaArgument { .. })
        ));
        assert!(matches!(
            regularized_lower_gamma(f64::NAN, 1.0),
            Err(FingerprintError::InvalidGammaArgument { .. })
        ));
    }

    #[test]
    fn test_significance_identical_is_zero() {
        let p = vec![0.25, 0.25, 0.25, 0.25];
        assert_eq!(js_significance(&p, &p).unwrap(), 0.0);
    }

    #[test]
    fn test_significance_disjoint_is_high() {
        let mut p = vec![0.0; 10];
        let mut q = vec![0.0; 10];
        p[0] = 1.0;
        q[9] = 1.0;
        let s = js_significance(&p, &q).unwrap();
        assert!(s > 0.5, "significance was {}", s);
    }

    #[test]
    fn test_significance_single_bin() {
        assert_eq!(js_significance(&[1.0], &[1.0]).unwrap(), 0.0);
    }
}
