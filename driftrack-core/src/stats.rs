//! Chi-square goodness-of-fit probabilities.

use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Probability that a chi-square variable with `ndf` degrees of freedom
/// exceeds `chi2`. Always within `[0, 1]`; NaN input and `ndf == 0`
/// give `0`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn chi2_survival(chi2: f64, ndf: usize) -> f64 {
    if ndf == 0 || chi2.is_nan() {
        return 0.0;
    }
    if chi2 <= 0.0 {
        return 1.0;
    }
    if chi2.is_infinite() {
        return 0.0;
    }
    ChiSquared::new(ndf as f64)
        .map_or(0.0, |distribution| distribution.sf(chi2).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_two_degrees_of_freedom_is_exponential() {
        for chi2 in [0.5, 2.0, 7.0, 20.0] {
            assert_abs_diff_eq!(chi2_survival(chi2, 2), (-chi2 / 2.0).exp(), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_critical_values() {
        assert_abs_diff_eq!(chi2_survival(3.841_459, 1), 0.05, epsilon = 1e-5);
        assert_abs_diff_eq!(chi2_survival(18.307_038, 10), 0.05, epsilon = 1e-5);
        assert_abs_diff_eq!(chi2_survival(43.772_972, 30), 0.05, epsilon = 1e-5);
    }

    #[test]
    fn test_edge_cases() {
        assert_abs_diff_eq!(chi2_survival(0.0, 5), 1.0);
        assert_abs_diff_eq!(chi2_survival(f64::NAN, 5), 0.0);
        assert_abs_diff_eq!(chi2_survival(1.0, 0), 0.0);
        assert_abs_diff_eq!(chi2_survival(f64::INFINITY, 3), 0.0);
        assert!(chi2_survival(1e6, 3) >= 0.0);
    }
}
