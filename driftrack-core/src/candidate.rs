//! Track candidates: groups of hits with fitted circle parameters.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::f64::consts::FRAC_PI_2;

use crate::fit::FitResult;
use crate::geometry::{from_angle, phi, Vector2};
use crate::registry::HitId;

/// Speed of light factor converting `T * length` into transverse momentum.
pub const MOMENTUM_FACTOR: f64 = 0.002_997_924_58;

/// Default magnetic field strength (T) along the detector axis.
pub const DEFAULT_MAGNETIC_FIELD: f64 = 1.5;

/// Circle parameters in the Legendre plane.
///
/// The circle center lies at `reference + (cos(angle), sin(angle)) / curvature`.
/// For a reference point at the origin these are exactly the (angle, curvature)
/// coordinates of the parameter-space index.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrackParameters {
    /// Angle of the curvature direction (radians).
    pub angle: f64,
    /// Signed curvature.
    pub curvature: f64,
}

impl TrackParameters {
    /// Creates a new parameter pair.
    #[inline]
    #[must_use]
    pub const fn new(angle: f64, curvature: f64) -> Self {
        Self { angle, curvature }
    }
}

/// Charge hypothesis of a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ChargeSign {
    /// Clockwise bending in a field along +z.
    #[default]
    Positive,
    /// Counter-clockwise bending.
    Negative,
    /// Hits are spread on both sides of the circle center: two tracks
    /// (or one track crossing the origin) were combined.
    TwoTracks,
}

impl ChargeSign {
    /// Numeric sign, `0` for the ambiguous case.
    #[must_use]
    pub fn signum(self) -> i8 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
            Self::TwoTracks => 0,
        }
    }
}

/// A track candidate.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Candidate {
    /// Hits assigned to the candidate, without duplicates.
    pub hits: Vec<HitId>,
    /// Fitted circle parameters.
    pub params: TrackParameters,
    /// Reference point the parameters refer to.
    pub reference: Vector2,
    /// Charge hypothesis.
    pub charge: ChargeSign,
    /// Chi-square of the last fit.
    pub chi2: f64,
}

impl Candidate {
    /// Creates a candidate seeded with parameters relative to the origin,
    /// e.g. the center of a parameter-space leaf.
    #[must_use]
    pub fn new(hits: Vec<HitId>, params: TrackParameters) -> Self {
        let mut candidate = Self {
            hits,
            params,
            ..Self::default()
        };
        candidate.normalize_hits();
        candidate
    }

    /// Creates a candidate from a fit result.
    #[must_use]
    pub fn from_fit(hits: Vec<HitId>, fit: &FitResult, charge: ChargeSign) -> Self {
        let mut candidate = Self::new(hits, fit.params);
        candidate.reference = fit.reference;
        candidate.chi2 = fit.chi2;
        candidate.charge = charge;
        candidate
    }

    /// Number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if the candidate holds no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Sorts the hit list and removes duplicates.
    pub fn normalize_hits(&mut self) {
        self.hits.sort_unstable();
        self.hits.dedup();
    }

    /// Copies fitted parameters, reference point and chi-square.
    pub fn apply_fit(&mut self, fit: &FitResult) {
        self.params = fit.params;
        self.reference = fit.reference;
        self.chi2 = fit.chi2;
    }

    /// Circle radius.
    #[inline]
    #[must_use]
    pub fn radius(&self) -> f64 {
        1.0 / self.params.curvature.abs()
    }

    /// Circle center.
    #[must_use]
    pub fn center(&self) -> Vector2 {
        self.reference + from_angle(self.params.angle) / self.params.curvature
    }

    /// Azimuth of the circle center as seen from the reference point.
    #[must_use]
    pub fn center_direction(&self) -> f64 {
        phi(&(self.center() - self.reference))
    }

    /// Transverse momentum estimate for a field of `field` tesla.
    #[must_use]
    pub fn transverse_momentum(&self, field: f64) -> f64 {
        MOMENTUM_FACTOR * field * self.radius()
    }

    /// Unit momentum direction at the reference point.
    ///
    /// The tangent is rotated from the center direction by +90 degrees for
    /// positive and -90 degrees for negative charge. Ambiguous candidates
    /// use the positive convention.
    #[must_use]
    pub fn momentum_direction(&self) -> Vector2 {
        let rotation = match self.charge {
            ChargeSign::Negative => -FRAC_PI_2,
            ChargeSign::Positive | ChargeSign::TwoTracks => FRAC_PI_2,
        };
        from_angle(self.center_direction() + rotation)
    }
}
