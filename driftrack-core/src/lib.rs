//! driftrack-core: Core types for drift-chamber track finding.
//!
//! This crate provides hit records with their conformal-space mapping,
//! the event-wide hit registry, track candidates, the geometric fit
//! interface and the chi-square statistics used to accept merges.
//!

pub mod calibration;
pub mod candidate;
pub mod error;
pub mod fit;
pub mod geometry;
pub mod hit;
pub mod registry;
pub mod stats;

pub use calibration::{RawHit, WireCalibration, WireTable};
pub use candidate::{Candidate, ChargeSign, TrackParameters, DEFAULT_MAGNETIC_FIELD};
pub use error::{Error, Result};
pub use fit::{FastCircleFitter, FitResult, TrackFitter};
pub use geometry::{from_angle, normalize_angle, phi, Vector2, Vector3};
pub use hit::{ConformalPosition, DriftMeasurement, HitRecord, HitUsage, WireGeometry, WireId};
pub use registry::{HitId, HitRegistry};
pub use stats::chi2_survival;
