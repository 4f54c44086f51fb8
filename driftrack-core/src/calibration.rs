//! Wire geometry and drift calibration interfaces.
//!
//! Geometry construction and the timing-to-distance calibration belong to
//! the surrounding reconstruction; the finder only consumes their results
//! through [`WireCalibration`].

use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hit::{DriftMeasurement, HitRecord, WireGeometry, WireId};

/// Raw measurement as delivered by the readout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawHit {
    /// Index of the measurement in the event.
    pub index: usize,
    /// Wire that fired.
    pub wire: WireId,
    /// Raw TDC count.
    pub tdc_count: u16,
    /// Raw ADC count.
    pub adc_count: u16,
}

impl RawHit {
    /// Creates a new raw hit.
    #[inline]
    #[must_use]
    pub const fn new(index: usize, wire: WireId, tdc_count: u16, adc_count: u16) -> Self {
        Self {
            index,
            wire,
            tdc_count,
            adc_count,
        }
    }
}

/// Source of wire geometry and calibrated drift distances.
pub trait WireCalibration {
    /// Geometry of the wire a raw hit was recorded on.
    fn wire_geometry(&self, hit: &RawHit) -> Result<WireGeometry>;

    /// Calibrated drift distance and uncertainty of a raw hit.
    fn drift(&self, hit: &RawHit) -> Result<DriftMeasurement>;

    /// Builds the hit record for a raw measurement.
    fn build_hit(&self, hit: &RawHit) -> Result<HitRecord> {
        let geometry = self.wire_geometry(hit)?;
        let drift = self.drift(hit)?;
        Ok(HitRecord::new(hit.index, hit.wire, geometry, drift))
    }
}

/// Lookup-table calibration: geometry per wire, drift per raw hit index.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WireTable {
    wires: HashMap<WireId, WireGeometry>,
    drifts: HashMap<usize, DriftMeasurement>,
}

impl WireTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the geometry of a wire.
    pub fn insert_wire(&mut self, id: WireId, geometry: WireGeometry) {
        self.wires.insert(id, geometry);
    }

    /// Registers the calibrated drift of a raw hit.
    pub fn insert_drift(&mut self, index: usize, drift: DriftMeasurement) {
        self.drifts.insert(index, drift);
    }

    /// Number of known wires.
    #[must_use]
    pub fn wire_count(&self) -> usize {
        self.wires.len()
    }
}

impl WireCalibration for WireTable {
    fn wire_geometry(&self, hit: &RawHit) -> Result<WireGeometry> {
        self.wires
            .get(&hit.wire)
            .copied()
            .ok_or(Error::UnknownWire {
                layer: hit.wire.layer,
                wire: hit.wire.wire,
            })
    }

    fn drift(&self, hit: &RawHit) -> Result<DriftMeasurement> {
        self.drifts
            .get(&hit.index)
            .copied()
            .ok_or(Error::MissingDrift(hit.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_wire_table_builds_hit() {
        let mut table = WireTable::new();
        let id = WireId::new(3, 17);
        table.insert_wire(id, WireGeometry::axial(25.0, 0.0, -60.0, 90.0, 1.5, 0));
        table.insert_drift(4, DriftMeasurement::new(0.3, 0.02));

        let hit = table.build_hit(&RawHit::new(4, id, 1200, 80)).unwrap();
        assert_eq!(hit.index(), 4);
        assert_eq!(hit.wire_id(), id);
        assert!(hit.is_axial());
        assert_relative_eq!(hit.drift_length(), 0.3);
        assert_eq!(table.wire_count(), 1);
    }

    #[test]
    fn test_wire_table_missing_entries() {
        let mut table = WireTable::new();
        let id = WireId::new(1, 2);

        let err = table.build_hit(&RawHit::new(0, id, 0, 0)).unwrap_err();
        assert_eq!(err, Error::UnknownWire { layer: 1, wire: 2 });

        table.insert_wire(id, WireGeometry::axial(10.0, 0.0, -1.0, 1.0, 1.0, 0));
        let err = table.build_hit(&RawHit::new(9, id, 0, 0)).unwrap_err();
        assert_eq!(err, Error::MissingDrift(9));
    }
}
