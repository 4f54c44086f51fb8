//! Planar and spatial vectors used across the finder.
//!
//! Both are `nalgebra` column vectors; this module adds the few
//! azimuthal helpers the finder needs on top.

use std::f64::consts::{PI, TAU};

/// Point or direction in the transverse (x, y) plane.
pub type Vector2 = nalgebra::Vector2<f64>;

/// Point in detector space; `z` runs along the detector axis.
pub type Vector3 = nalgebra::Vector3<f64>;

/// Unit vector pointing at `angle` (radians).
#[inline]
#[must_use]
pub fn from_angle(angle: f64) -> Vector2 {
    let (sin, cos) = angle.sin_cos();
    Vector2::new(cos, sin)
}

/// Azimuthal angle of `v` in (-pi, pi].
#[inline]
#[must_use]
pub fn phi(v: &Vector2) -> f64 {
    v.y.atan2(v.x)
}

/// Normalizes an angle difference into [-pi, pi].
#[inline]
#[must_use]
pub fn normalize_angle(mut angle: f64) -> f64 {
    angle %= TAU;
    if angle > PI {
        angle -= TAU;
    } else if angle < -PI {
        angle += TAU;
    }
    angle
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_phi_of_unit_vector() {
        for angle in [-2.5, -0.3, 0.0, 1.2, 3.0] {
            assert_abs_diff_eq!(phi(&from_angle(angle)), angle, epsilon = 1e-12);
            assert_abs_diff_eq!(from_angle(angle).norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_vector3_lerp_projects_to_plane() {
        let backward = Vector3::new(0.0, 0.0, -10.0);
        let forward = Vector3::new(2.0, 4.0, 10.0);
        let mid = backward.lerp(&forward, 0.5);
        assert_abs_diff_eq!(mid.z, 0.0);
        assert_abs_diff_eq!((mid.xy() - Vector2::new(1.0, 2.0)).norm(), 0.0);
    }

    #[test]
    fn test_normalize_angle() {
        assert_abs_diff_eq!(normalize_angle(3.0 * PI / 2.0), -PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(-3.0 * PI / 2.0), PI / 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_angle(0.25), 0.25);
    }
}
