//! Hit records for drift-chamber measurements.
//!
//! A [`HitRecord`] holds one calibrated wire measurement together with its
//! position in conformal space. The conformal mapping
//! `(x, y) -> (2x, 2y) / (x^2 + y^2 - d^2)` turns circles through the
//! origin into straight lines, so drift circles of a track become two
//! sinusoid-like curves in the Legendre (angle, curvature) plane.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::geometry::{Vector2, Vector3};

/// Number of parametrization steps (inclusive) used by the scanning wire refinement.
pub const WIRE_SCAN_STEPS: usize = 100;

/// Fraction of the half cell width an axial drift length may reach.
pub const AXIAL_DRIFT_FRACTION: f64 = 0.8;

/// Fraction of the half cell width a stereo drift length may reach.
pub const STEREO_DRIFT_FRACTION: f64 = 0.9;

/// Wire identifier: continuous layer number and wire number inside the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WireId {
    /// Continuous layer id.
    pub layer: u16,
    /// Wire number inside the layer.
    pub wire: u16,
}

impl WireId {
    /// Creates a new wire identifier.
    #[inline]
    #[must_use]
    pub const fn new(layer: u16, wire: u16) -> Self {
        Self { layer, wire }
    }
}

/// Geometry of a sense wire as supplied by the geometry collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WireGeometry {
    /// Forward end point of the wire.
    pub forward: Vector3,
    /// Backward end point of the wire.
    pub backward: Vector3,
    /// Distance to the neighboring wire in the same layer.
    pub neighbor_spacing: f64,
    /// Super-layer the wire belongs to.
    pub super_layer: u16,
}

impl WireGeometry {
    /// Creates an axial wire at `(x, y)` spanning `[z_backward, z_forward]`.
    #[must_use]
    pub fn axial(
        x: f64,
        y: f64,
        z_backward: f64,
        z_forward: f64,
        neighbor_spacing: f64,
        super_layer: u16,
    ) -> Self {
        Self {
            forward: Vector3::new(x, y, z_forward),
            backward: Vector3::new(x, y, z_backward),
            neighbor_spacing,
            super_layer,
        }
    }

    /// Creates a wire from its two end points.
    #[must_use]
    pub fn stereo(
        backward: Vector3,
        forward: Vector3,
        neighbor_spacing: f64,
        super_layer: u16,
    ) -> Self {
        Self {
            forward,
            backward,
            neighbor_spacing,
            super_layer,
        }
    }

    /// True when both end points share the same transverse position.
    #[must_use]
    pub fn is_axial(&self) -> bool {
        (self.forward.xy() - self.backward.xy()).norm() < 1e-9
    }

    /// Fraction along the wire (0 = backward, 1 = forward) at longitudinal `z`.
    #[must_use]
    pub fn fraction_at_z(&self, z: f64) -> f64 {
        let length = self.forward.z - self.backward.z;
        if length.abs() < f64::EPSILON {
            return 0.5;
        }
        (z - self.backward.z) / length
    }

    /// Point on the wire at parametrization fraction `t`.
    #[inline]
    #[must_use]
    pub fn position_at_fraction(&self, t: f64) -> Vector3 {
        self.backward.lerp(&self.forward, t)
    }

    /// Point on the wire at longitudinal coordinate `z`.
    #[inline]
    #[must_use]
    pub fn position_at_z(&self, z: f64) -> Vector3 {
        self.position_at_fraction(self.fraction_at_z(z))
    }
}

/// Calibrated drift distance and its uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DriftMeasurement {
    /// Drift distance.
    pub length: f64,
    /// Uncertainty of the drift distance.
    pub sigma: f64,
}

impl DriftMeasurement {
    /// Creates a new drift measurement.
    #[inline]
    #[must_use]
    pub const fn new(length: f64, sigma: f64) -> Self {
        Self { length, sigma }
    }
}

/// Position of a hit in conformal space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConformalPosition {
    /// Conformal x.
    pub x: f64,
    /// Conformal y.
    pub y: f64,
    /// Conformal drift distance.
    pub drift: f64,
}

impl ConformalPosition {
    /// Maps a transverse position and drift distance into conformal space.
    ///
    /// The denominator `x^2 + y^2 - d^2` is not guarded: a vanishing
    /// denominator yields infinite or NaN coordinates.
    #[must_use]
    pub fn from_position(position: Vector2, drift: f64) -> Self {
        let denominator = position.norm_squared() - drift * drift;
        Self {
            x: 2.0 * position.x / denominator,
            y: 2.0 * position.y / denominator,
            drift: 2.0 * drift / denominator,
        }
    }

    /// Legendre distance `x cos(theta) + y sin(theta)` for precomputed trig values.
    #[inline]
    #[must_use]
    pub fn legendre_r(&self, cos_theta: f64, sin_theta: f64) -> f64 {
        self.x * cos_theta + self.y * sin_theta
    }
}

/// Usage state of a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HitUsage {
    /// Available for track finding.
    #[default]
    Unused,
    /// Claimed by a candidate.
    UsedInTrack,
    /// Implausible measurement, never used.
    Background,
    /// Rejected as an outlier during refitting.
    Bad,
}

/// One calibrated drift-chamber measurement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitRecord {
    index: usize,
    wire_id: WireId,
    geometry: WireGeometry,
    drift: DriftMeasurement,
    z_reference: f64,
    wire_position: Vector3,
    original_wire_position: Vector3,
    conformal: ConformalPosition,
    usage: HitUsage,
}

impl HitRecord {
    /// Builds a hit at reference `z = 0` and computes its conformal position.
    #[must_use]
    pub fn new(index: usize, wire_id: WireId, geometry: WireGeometry, drift: DriftMeasurement) -> Self {
        let wire_position = geometry.position_at_z(0.0);
        let conformal = ConformalPosition::from_position(wire_position.xy(), drift.length);
        Self {
            index,
            wire_id,
            geometry,
            drift,
            z_reference: 0.0,
            wire_position,
            original_wire_position: wire_position,
            conformal,
            usage: HitUsage::Unused,
        }
    }

    /// Index of the raw measurement this hit was built from.
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Wire identifier.
    #[inline]
    #[must_use]
    pub fn wire_id(&self) -> WireId {
        self.wire_id
    }

    /// Continuous layer id.
    #[inline]
    #[must_use]
    pub fn layer(&self) -> u16 {
        self.wire_id.layer
    }

    /// Super-layer id.
    #[inline]
    #[must_use]
    pub fn super_layer(&self) -> u16 {
        self.geometry.super_layer
    }

    /// Wire geometry.
    #[inline]
    #[must_use]
    pub fn geometry(&self) -> &WireGeometry {
        &self.geometry
    }

    /// Calibrated drift distance.
    #[inline]
    #[must_use]
    pub fn drift_length(&self) -> f64 {
        self.drift.length
    }

    /// Uncertainty of the drift distance.
    #[inline]
    #[must_use]
    pub fn drift_sigma(&self) -> f64 {
        self.drift.sigma
    }

    /// Whether the wire is parallel to the detector axis.
    #[inline]
    #[must_use]
    pub fn is_axial(&self) -> bool {
        self.geometry.is_axial()
    }

    /// Current longitudinal reference.
    #[inline]
    #[must_use]
    pub fn z_reference(&self) -> f64 {
        self.z_reference
    }

    /// Wire position at the current z reference.
    #[inline]
    #[must_use]
    pub fn wire_position(&self) -> Vector3 {
        self.wire_position
    }

    /// Wire position at construction time (z = 0).
    #[inline]
    #[must_use]
    pub fn original_wire_position(&self) -> Vector3 {
        self.original_wire_position
    }

    /// Conformal position derived from the current wire position.
    #[inline]
    #[must_use]
    pub fn conformal(&self) -> ConformalPosition {
        self.conformal
    }

    /// Usage state.
    #[inline]
    #[must_use]
    pub fn usage(&self) -> HitUsage {
        self.usage
    }

    pub(crate) fn set_usage(&mut self, usage: HitUsage) {
        self.usage = usage;
    }

    /// Tags the hit as background when the drift distance is too large
    /// for its cell. Returns `false` for implausible hits.
    pub fn check_plausibility(&mut self) -> bool {
        let fraction = if self.is_axial() {
            AXIAL_DRIFT_FRACTION
        } else {
            STEREO_DRIFT_FRACTION
        };
        let half_spacing = self.geometry.neighbor_spacing / 2.0;

        if self.drift.length > fraction * half_spacing {
            log::trace!(
                "hit {} on wire {:?} tagged as background (drift {:.3}, half spacing {:.3})",
                self.index,
                self.wire_id,
                self.drift.length,
                half_spacing
            );
            self.usage = HitUsage::Background;
            false
        } else {
            true
        }
    }

    /// Moves the reference to longitudinal coordinate `z` and re-derives the
    /// conformal position.
    pub fn set_z_reference(&mut self, z: f64) {
        self.z_reference = z;
        self.wire_position = self.geometry.position_at_z(z);
        self.conformal =
            ConformalPosition::from_position(self.wire_position.xy(), self.drift.length);
    }

    /// Conformal position computed relative to `pivot` instead of the origin.
    #[must_use]
    pub fn reproject_around(&self, pivot: Vector2) -> ConformalPosition {
        ConformalPosition::from_position(self.wire_position.xy() - pivot, self.drift.length)
    }

    /// Distance between the drift circle around the current wire position
    /// and the circle of `center` and `radius`.
    #[must_use]
    pub fn distance_to_circle(&self, center: Vector2, radius: f64) -> f64 {
        Self::circle_residual(self.wire_position.xy(), self.drift.length, center, radius)
    }

    /// Distance of the drift circle to a candidate circle.
    #[inline]
    fn circle_residual(position: Vector2, drift: f64, center: Vector2, radius: f64) -> f64 {
        (((position - center).norm() - radius).abs() - drift).abs()
    }

    /// Stereo refinement by scanning the wire in fixed steps. Keeps the
    /// step closest to the candidate circle and returns `true`; axial hits
    /// return `false` and are left untouched.
    pub fn refine_along_wire_scan(&mut self, center: Vector2, radius: f64) -> bool {
        if self.is_axial() {
            return false;
        }

        let mut best_fraction = 0.0;
        let mut best_residual = f64::INFINITY;
        for step in 0..=WIRE_SCAN_STEPS {
            let fraction = step as f64 / WIRE_SCAN_STEPS as f64;
            let position = self.geometry.position_at_fraction(fraction).xy();
            let residual = Self::circle_residual(position, self.drift.length, center, radius);
            if residual < best_residual {
                best_residual = residual;
                best_fraction = fraction;
            }
        }

        let z = self.geometry.position_at_fraction(best_fraction).z;
        self.set_z_reference(z);
        true
    }

    /// Stereo refinement by solving for the wire fraction where the drift
    /// circle touches the candidate circle.
    ///
    /// The root closer to the wire middle is kept and clamped into `[0, 1]`.
    /// Returns `false` without moving the hit when no root exists or the
    /// wire is axial.
    pub fn refine_along_wire_closed(&mut self, center: Vector2, radius: f64) -> bool {
        if self.is_axial() {
            return false;
        }

        let backward = self.geometry.backward.xy();
        let direction = self.geometry.forward.xy() - backward;
        let offset = backward - center;

        let current = (self.wire_position.xy() - center).norm();
        let target = if current > radius {
            radius + self.drift.length
        } else {
            radius - self.drift.length
        };

        let a = direction.norm_squared();
        let b = 2.0 * direction.dot(&offset);
        let c = offset.norm_squared() - target * target;
        let root_term = (b * b - 4.0 * a * c).sqrt();
        let first = (-b + root_term) / (2.0 * a);
        let second = (-b - root_term) / (2.0 * a);

        let fraction = match (first.is_nan(), second.is_nan()) {
            (true, true) => return false,
            (false, true) => first,
            (true, false) => second,
            (false, false) => {
                if (first - 0.5).abs() <= (second - 0.5).abs() {
                    first
                } else {
                    second
                }
            }
        };

        let z = self.geometry.position_at_fraction(fraction.clamp(0.0, 1.0)).z;
        self.set_z_reference(z);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn stereo_wire() -> WireGeometry {
        // Wire running from (-5, 30, -50) to (5, 30, 50).
        WireGeometry::stereo(
            Vector3::new(-5.0, 30.0, -50.0),
            Vector3::new(5.0, 30.0, 50.0),
            1.8,
            1,
        )
    }

    #[test]
    fn test_conformal_mapping() {
        let hit = HitRecord::new(
            0,
            WireId::new(0, 0),
            WireGeometry::axial(10.0, 0.0, -50.0, 50.0, 1.0, 0),
            DriftMeasurement::new(0.0, 0.01),
        );
        let conformal = hit.conformal();
        assert_relative_eq!(conformal.x, 0.2);
        assert_abs_diff_eq!(conformal.y, 0.0);
        assert_abs_diff_eq!(conformal.drift, 0.0);

        let drifted = ConformalPosition::from_position(Vector2::new(10.0, 0.0), 1.0);
        assert_relative_eq!(drifted.x, 20.0 / 99.0);
        assert_relative_eq!(drifted.drift, 2.0 / 99.0);
    }

    #[test]
    fn test_conformal_denominator_is_unguarded() {
        let degenerate = ConformalPosition::from_position(Vector2::new(3.0, 4.0), 5.0);
        assert!(!degenerate.x.is_finite());
        assert!(degenerate.drift.is_infinite());
    }

    #[test]
    fn test_plausibility_axial_and_stereo() {
        let mut good = HitRecord::new(
            0,
            WireId::new(0, 0),
            WireGeometry::axial(20.0, 0.0, -50.0, 50.0, 2.0, 0),
            DriftMeasurement::new(0.79, 0.01),
        );
        assert!(good.check_plausibility());
        assert_eq!(good.usage(), HitUsage::Unused);

        let mut bad = HitRecord::new(
            1,
            WireId::new(0, 1),
            WireGeometry::axial(20.0, 2.0, -50.0, 50.0, 2.0, 0),
            DriftMeasurement::new(0.81, 0.01),
        );
        assert!(!bad.check_plausibility());
        assert_eq!(bad.usage(), HitUsage::Background);

        // Half spacing 0.9, stereo limit 0.81.
        let mut stereo = HitRecord::new(
            2,
            WireId::new(8, 0),
            stereo_wire(),
            DriftMeasurement::new(0.8, 0.01),
        );
        assert!(stereo.check_plausibility());
        let mut stereo_bad = HitRecord::new(
            3,
            WireId::new(8, 1),
            stereo_wire(),
            DriftMeasurement::new(0.85, 0.01),
        );
        assert!(!stereo_bad.check_plausibility());
    }

    #[test]
    fn test_set_z_reference_moves_wire_and_conformal() {
        let mut hit = HitRecord::new(0, WireId::new(8, 0), stereo_wire(), DriftMeasurement::new(0.2, 0.01));
        assert_abs_diff_eq!(hit.wire_position().x, 0.0, epsilon = 1e-12);

        hit.set_z_reference(25.0);
        assert_abs_diff_eq!(hit.wire_position().x, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(hit.wire_position().z, 25.0, epsilon = 1e-12);

        let expected = ConformalPosition::from_position(Vector2::new(2.5, 30.0), 0.2);
        assert_relative_eq!(hit.conformal().x, expected.x);
        assert_relative_eq!(hit.conformal().y, expected.y);

        // The original position is not affected.
        assert_abs_diff_eq!(hit.original_wire_position().x, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_reproject_around_pivot() {
        let hit = HitRecord::new(
            0,
            WireId::new(0, 0),
            WireGeometry::axial(12.0, 0.0, -50.0, 50.0, 1.0, 0),
            DriftMeasurement::new(0.0, 0.01),
        );
        let around = hit.reproject_around(Vector2::new(2.0, 0.0));
        assert_relative_eq!(around.x, 0.2);
        assert_abs_diff_eq!(around.y, 0.0);
    }

    #[test]
    fn test_refine_axial_is_rejected() {
        let mut hit = HitRecord::new(
            0,
            WireId::new(0, 0),
            WireGeometry::axial(12.0, 0.0, -50.0, 50.0, 1.0, 0),
            DriftMeasurement::new(0.1, 0.01),
        );
        assert!(!hit.refine_along_wire_scan(Vector2::new(0.0, 0.0), 12.0));
        assert!(!hit.refine_along_wire_closed(Vector2::new(0.0, 0.0), 12.0));
        assert_abs_diff_eq!(hit.z_reference(), 0.0);
    }

    #[test]
    fn test_refine_scan_and_closed_agree() {
        // Candidate circle centered at the origin; radius chosen so that the
        // wire point at x = 2.5 (z = 25) lies exactly on the circle.
        let radius = (2.5_f64 * 2.5 + 30.0 * 30.0).sqrt();
        let center = Vector2::new(0.0, 0.0);

        let mut scanned =
            HitRecord::new(0, WireId::new(8, 0), stereo_wire(), DriftMeasurement::new(0.0, 0.01));
        assert!(scanned.refine_along_wire_scan(center, radius));
        // 101 steps over 100 units of z: step width is 1.
        assert_abs_diff_eq!(scanned.z_reference().abs(), 25.0, epsilon = 1.0);

        let mut solved =
            HitRecord::new(1, WireId::new(8, 1), stereo_wire(), DriftMeasurement::new(0.0, 0.01));
        assert!(solved.refine_along_wire_closed(center, radius));
        assert_abs_diff_eq!(solved.z_reference().abs(), 25.0, epsilon = 1e-6);
    }

    #[test]
    fn test_distance_to_circle_includes_drift() {
        let hit = HitRecord::new(
            0,
            WireId::new(0, 0),
            WireGeometry::axial(10.5, 0.0, -50.0, 50.0, 1.0, 0),
            DriftMeasurement::new(0.5, 0.01),
        );
        let center = Vector2::new(0.0, 0.0);
        // The drift circle touches a radius-10 circle from outside.
        assert_abs_diff_eq!(hit.distance_to_circle(center, 10.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(hit.distance_to_circle(center, 12.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(hit.distance_to_circle(center, 11.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_refine_closed_without_solution_keeps_position() {
        let mut hit =
            HitRecord::new(0, WireId::new(8, 0), stereo_wire(), DriftMeasurement::new(0.1, 0.01));
        // Circle far away from the wire: the quadratic has no real root.
        assert!(!hit.refine_along_wire_closed(Vector2::new(500.0, 500.0), 1.0));
        assert_abs_diff_eq!(hit.z_reference(), 0.0);
        assert_abs_diff_eq!(hit.wire_position().x, 0.0, epsilon = 1e-12);
    }
}
