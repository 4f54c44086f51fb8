//! Geometric fit collaborator.
//!
//! The merger only needs two things from a fitter: circle parameters with a
//! chi-square for a hit list, and a charge hypothesis for a fitted list.
//! [`FastCircleFitter`] provides both with a weighted algebraic circle fit.
#![allow(clippy::cast_precision_loss, clippy::similar_names)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::f64::consts::FRAC_PI_2;

use crate::candidate::{ChargeSign, TrackParameters};
use crate::error::{Error, Result};
use crate::geometry::{from_angle, normalize_angle, phi, Vector2};
use crate::registry::{HitId, HitRegistry};

/// Result of a circle fit.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitResult {
    /// Fitted circle parameters relative to `reference`.
    pub params: TrackParameters,
    /// Point of closest approach of the circle to the origin.
    pub reference: Vector2,
    /// Chi-square of the fit.
    pub chi2: f64,
}

impl FitResult {
    /// Result for hit lists too small to define a circle.
    #[must_use]
    pub fn degenerate() -> Self {
        Self {
            params: TrackParameters::default(),
            reference: Vector2::zeros(),
            chi2: f64::INFINITY,
        }
    }

    /// Whether the fit produced finite parameters and chi-square.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.params.angle.is_finite()
            && self.params.curvature.is_finite()
            && self.params.curvature != 0.0
            && self.chi2.is_finite()
    }

    /// Fitted circle center.
    #[must_use]
    pub fn center(&self) -> Vector2 {
        self.reference + from_angle(self.params.angle) / self.params.curvature
    }
}

/// Trait for geometric track fitters.
pub trait TrackFitter {
    /// Fits a circle through the wire positions of `hits`.
    fn fit(&self, hits: &[HitId], registry: &HitRegistry) -> FitResult;

    /// Determines the charge hypothesis of `hits` given a fit.
    fn charge_sign(&self, fit: &FitResult, hits: &[HitId], registry: &HitRegistry) -> ChargeSign;

    /// Returns the name of the fitter.
    fn name(&self) -> &'static str;
}

/// Weighted algebraic circle fit (Karimaki parametrization).
///
/// Each hit is weighted with the inverse of its drift distance; hits with
/// zero drift get weight 1. The fit is exact for hits on a circle.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FastCircleFitter {
    /// Minimum share of hits on the minority side of the circle center that
    /// makes the charge ambiguous.
    pub ambiguity_fraction: f64,
}

impl Default for FastCircleFitter {
    fn default() -> Self {
        Self {
            ambiguity_fraction: 0.2,
        }
    }
}

impl FastCircleFitter {
    /// Creates a fitter with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ambiguity fraction of the charge classifier.
    #[must_use]
    pub fn with_ambiguity_fraction(mut self, fraction: f64) -> Self {
        self.ambiguity_fraction = fraction;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=0.5).contains(&self.ambiguity_fraction) {
            return Err(Error::config(format!(
                "ambiguity fraction must be within [0, 0.5], got {}",
                self.ambiguity_fraction
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct WeightedMoments {
    sum_weights: f64,
    x: f64,
    y: f64,
    xx: f64,
    xy: f64,
    yy: f64,
    x_r2: f64,
    y_r2: f64,
    r2: f64,
    r2_r2: f64,
}

impl WeightedMoments {
    fn accumulate(&mut self, position: Vector2, weight: f64) {
        let r2 = position.norm_squared();
        self.sum_weights += weight;
        self.x += weight * position.x;
        self.y += weight * position.y;
        self.xx += weight * position.x * position.x;
        self.xy += weight * position.x * position.y;
        self.yy += weight * position.y * position.y;
        self.x_r2 += weight * position.x * r2;
        self.y_r2 += weight * position.y * r2;
        self.r2 += weight * r2;
        self.r2_r2 += weight * r2 * r2;
    }
}

impl TrackFitter for FastCircleFitter {
    fn fit(&self, hits: &[HitId], registry: &HitRegistry) -> FitResult {
        if hits.len() < 3 {
            return FitResult::degenerate();
        }

        let mut moments = WeightedMoments::default();
        for &id in hits {
            let hit = registry.get(id);
            let drift = hit.drift_length();
            let weight = if drift == 0.0 { 1.0 } else { 1.0 / drift };
            moments.accumulate(hit.wire_position().xy(), weight);
        }

        let w = moments.sum_weights;
        let mean_x = moments.x / w;
        let mean_y = moments.y / w;
        let mean_r2 = moments.r2 / w;

        let cov_xx = moments.xx / w - mean_x * mean_x;
        let cov_xy = moments.xy / w - mean_x * mean_y;
        let cov_yy = moments.yy / w - mean_y * mean_y;
        let cov_x_r2 = moments.x_r2 / w - mean_x * mean_r2;
        let cov_y_r2 = moments.y_r2 / w - mean_y * mean_r2;
        let cov_r2_r2 = moments.r2_r2 / w - mean_r2 * mean_r2;

        let q1 = cov_r2_r2 * cov_xy - cov_x_r2 * cov_y_r2;
        let q2 = cov_r2_r2 * (cov_xx - cov_yy) - cov_x_r2 * cov_x_r2 + cov_y_r2 * cov_y_r2;

        let phi = 0.5 * (2.0 * q1).atan2(q2);
        let (sin_phi, cos_phi) = phi.sin_cos();

        let kappa = (sin_phi * cov_x_r2 - cos_phi * cov_y_r2) / cov_r2_r2;
        let delta = -kappa * mean_r2 + sin_phi * mean_x - cos_phi * mean_y;

        let root = (1.0 - 4.0 * delta * kappa).sqrt();
        let rho = 2.0 * kappa / root;
        let d = 2.0 * delta / (1.0 + root);

        let chi2 = w
            * (1.0 + rho * d).powi(2)
            * (sin_phi * sin_phi * cov_xx - 2.0 * sin_phi * cos_phi * cov_xy
                + cos_phi * cos_phi * cov_yy
                - kappa * kappa * cov_r2_r2);

        FitResult {
            params: TrackParameters::new(phi - FRAC_PI_2, rho),
            reference: Vector2::new(d * sin_phi, -d * cos_phi),
            chi2: chi2.max(0.0),
        }
    }

    fn charge_sign(&self, fit: &FitResult, hits: &[HitId], registry: &HitRegistry) -> ChargeSign {
        let center_direction = phi(&(fit.center() - fit.reference));

        let mut positive = 0_usize;
        let mut negative = 0_usize;
        for &id in hits {
            let offset = registry.get(id).wire_position().xy() - fit.reference;
            let delta = normalize_angle(phi(&offset) - center_direction);
            if delta > 0.0 {
                positive += 1;
            } else if delta < 0.0 {
                negative += 1;
            }
        }

        let total = positive + negative;
        if total == 0 {
            return ChargeSign::Positive;
        }
        let minority = positive.min(negative) as f64;
        if minority > 0.0 && minority >= self.ambiguity_fraction * total as f64 {
            ChargeSign::TwoTracks
        } else if positive >= negative {
            ChargeSign::Positive
        } else {
            ChargeSign::Negative
        }
    }

    fn name(&self) -> &'static str {
        "fast-circle"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hit::{DriftMeasurement, HitRecord, WireGeometry, WireId};
    use approx::assert_abs_diff_eq;

    fn circle_registry(cx: f64, cy: f64, radius: f64, from: f64, to: f64, n: usize) -> HitRegistry {
        (0..n)
            .map(|i| {
                let a = from + (to - from) * i as f64 / (n - 1) as f64;
                let x = cx + radius * a.cos();
                let y = cy + radius * a.sin();
                HitRecord::new(
                    i,
                    WireId::new(i as u16, 0),
                    WireGeometry::axial(x, y, -50.0, 50.0, 2.0, 0),
                    DriftMeasurement::new(0.0, 0.01),
                )
            })
            .collect()
    }

    #[test]
    fn test_fit_circle_through_origin() {
        let registry = circle_registry(0.0, 50.0, 50.0, -1.4, -0.2, 20);
        let hits = registry.ids().collect::<Vec<_>>();
        let fitter = FastCircleFitter::new();
        let fit = fitter.fit(&hits, &registry);

        assert!(fit.is_valid());
        assert_abs_diff_eq!(fit.params.curvature.abs(), 0.02, epsilon = 1e-9);
        let center = fit.center();
        assert_abs_diff_eq!(center.x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(center.y, 50.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.reference.norm(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.chi2, 0.0, epsilon = 1e-6);

        // Hits lie clockwise of the center direction: counter-clockwise motion.
        assert_eq!(fitter.charge_sign(&fit, &hits, &registry), ChargeSign::Negative);
    }

    #[test]
    fn test_fit_displaced_circle() {
        let registry = circle_registry(30.0, -40.0, 55.0, 0.3, 1.2, 15);
        let hits = registry.ids().collect::<Vec<_>>();
        let fit = FastCircleFitter::new().fit(&hits, &registry);

        let center = fit.center();
        assert_abs_diff_eq!(center.x, 30.0, epsilon = 1e-6);
        assert_abs_diff_eq!(center.y, -40.0, epsilon = 1e-6);
        assert_abs_diff_eq!(1.0 / fit.params.curvature.abs(), 55.0, epsilon = 1e-6);
        // Closest approach to the origin: 55 - |(30, -40)| = 5.
        assert_abs_diff_eq!(fit.reference.norm(), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn test_charge_two_tracks() {
        // Both halves of the circle around the center direction.
        let registry = circle_registry(0.0, 50.0, 50.0, -1.4, 4.5, 30);
        let hits = registry.ids().collect::<Vec<_>>();
        let fitter = FastCircleFitter::new();
        let fit = fitter.fit(&hits, &registry);
        assert_eq!(fitter.charge_sign(&fit, &hits, &registry), ChargeSign::TwoTracks);
    }

    #[test]
    fn test_degenerate_fit() {
        let registry = circle_registry(0.0, 50.0, 50.0, -1.0, -0.5, 2);
        let hits = registry.ids().collect::<Vec<_>>();
        let fit = FastCircleFitter::new().fit(&hits, &registry);
        assert!(!fit.is_valid());
        assert!(fit.chi2.is_infinite());
    }

    #[test]
    fn test_validate() {
        assert!(FastCircleFitter::new().validate().is_ok());
        assert!(FastCircleFitter::new().with_ambiguity_fraction(0.7).validate().is_err());
    }
}
