#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::unreadable_literal
)]
use std::collections::HashSet;
use std::f64::consts::PI;

use driftrack_algorithms::{FinderConfig, FindingResult, MergeStrategy, TrackFinder};
use driftrack_core::{
    DriftMeasurement, Error, HitUsage, RawHit, WireGeometry, WireId, WireTable,
};

struct SyntheticEvent {
    raw_hits: Vec<RawHit>,
    table: WireTable,
    /// Raw hit indices of every generated track.
    tracks: Vec<Vec<usize>>,
}

impl SyntheticEvent {
    fn new() -> Self {
        Self {
            raw_hits: Vec::new(),
            table: WireTable::new(),
            tracks: Vec::new(),
        }
    }

    fn push(&mut self, x: f64, y: f64, drift: f64) -> usize {
        let index = self.raw_hits.len();
        let id = WireId::new((index / 64) as u16, (index % 64) as u16);
        self.table
            .insert_wire(id, WireGeometry::axial(x, y, -80.0, 120.0, 2.0, 0));
        self.table
            .insert_drift(index, DriftMeasurement::new(drift, 0.02));
        self.raw_hits.push(RawHit::new(index, id, 0, 0));
        index
    }
}

/// Circles through the origin sampled between 20 and 100 units from it.
///
/// Every wire sits one drift distance off the circle, on a random side, so
/// its drift circle touches the track.
fn generate_event(radii: &[f64], hits_per_track: usize, noise: usize) -> SyntheticEvent {
    let mut rng_seed: u64 = 987654;
    let mut rand = || {
        rng_seed = (rng_seed.wrapping_mul(1103515245).wrapping_add(12345)) & 0x7fffffff;
        rng_seed as f64 / f64::from(0x7fffffff_u32)
    };

    let mut event = SyntheticEvent::new();
    for (n, &radius) in radii.iter().enumerate() {
        let phi = 0.4 + 2.1 * n as f64;
        let (cx, cy) = (radius * phi.cos(), radius * phi.sin());
        let mut track = Vec::with_capacity(hits_per_track);
        for k in 0..hits_per_track {
            let distance = 20.0 + 80.0 * k as f64 / (hits_per_track - 1) as f64;
            let a = phi + PI + 2.0 * (distance / (2.0 * radius)).asin();
            let (cos_a, sin_a) = (a.cos(), a.sin());
            let drift = 0.05 + 0.45 * rand();
            let side = if rand() < 0.5 { -1.0 } else { 1.0 };
            let wire_radius = radius + side * drift;
            track.push(event.push(cx + wire_radius * cos_a, cy + wire_radius * sin_a, drift));
        }
        event.tracks.push(track);
    }
    for _ in 0..noise {
        let r = 20.0 + 80.0 * rand();
        let angle = 2.0 * PI * rand();
        let drift = 0.05 + 0.45 * rand();
        event.push(r * angle.cos(), r * angle.sin(), drift);
    }
    event
}

/// Every generated track is matched by a candidate holding most of its hits
/// with a radius close to the true one.
fn assert_tracks_found(event: &SyntheticEvent, result: &FindingResult, radii: &[f64]) {
    for (track, &radius) in event.tracks.iter().zip(radii) {
        let track: HashSet<usize> = track.iter().copied().collect();
        let best = result
            .candidates
            .iter()
            .max_by_key(|candidate| {
                candidate
                    .hits
                    .iter()
                    .filter(|&&id| track.contains(&result.registry.get(id).index()))
                    .count()
            })
            .expect("at least one candidate");
        let matched = best
            .hits
            .iter()
            .filter(|&&id| track.contains(&result.registry.get(id).index()))
            .count();
        assert!(
            matched >= 30,
            "track with radius {} matched only {} hits",
            radius,
            matched
        );
        let relative = (best.radius() - radius).abs() / radius;
        assert!(relative < 0.2, "radius {} fitted as {}", radius, best.radius());
    }
}

/// Candidates are disjoint, their hits are claimed, and nothing else is.
fn assert_disjoint_claims(result: &FindingResult) {
    let mut seen = HashSet::new();
    for candidate in &result.candidates {
        assert!(candidate.len() >= 3);
        for &id in &candidate.hits {
            assert!(seen.insert(id), "hit {:?} in two candidates", id);
            assert_eq!(result.registry.usage(id), HitUsage::UsedInTrack);
        }
    }
    assert_eq!(result.registry.count(HitUsage::UsedInTrack), seen.len());
    assert_eq!(result.statistics.hits_used, seen.len());
}

#[test]
fn test_finds_every_track() {
    let radii = [60.0, 120.0, 250.0];
    let event = generate_event(&radii, 45, 20);
    let finder = TrackFinder::new(FinderConfig::default());

    let result = finder.find(&event.raw_hits, &event.table).unwrap();
    let stats = &result.statistics;
    assert_eq!(stats.hits_processed, 155);
    assert_eq!(stats.axial_hits, 155);
    assert_eq!(stats.background_hits, 0);
    assert!(stats.passes >= 3);
    assert_eq!(stats.final_candidates, result.candidates.len());
    assert_eq!(stats.hits_appended, 0);

    assert_tracks_found(&event, &result, &radii);
}

#[test]
fn test_growing_merge_finds_every_track() {
    let radii = [60.0, 120.0, 250.0];
    let event = generate_event(&radii, 45, 20);
    let config = FinderConfig::default().with_merge_strategy(MergeStrategy::GrowEach);
    let result = TrackFinder::new(config)
        .find(&event.raw_hits, &event.table)
        .unwrap();

    assert_disjoint_claims(&result);
    assert_tracks_found(&event, &result, &radii);
}

#[test]
fn test_appending_keeps_claims_consistent() {
    let radii = [80.0, 150.0];
    let event = generate_event(&radii, 40, 30);
    let config = FinderConfig::default().with_hit_appending(Some(0.8));
    let result = TrackFinder::new(config)
        .find(&event.raw_hits, &event.table)
        .unwrap();

    assert_disjoint_claims(&result);
    let unused = result.registry.count(HitUsage::Unused);
    assert_eq!(unused + result.statistics.hits_used, result.statistics.axial_hits);
}

#[test]
fn test_candidates_are_disjoint_and_sorted() {
    let event = generate_event(&[80.0, 150.0], 40, 30);
    let finder = TrackFinder::default();
    let result = finder.find(&event.raw_hits, &event.table).unwrap();

    assert_disjoint_claims(&result);

    for pair in result.candidates.windows(2) {
        assert!(pair[0].radius() >= pair[1].radius());
    }
}

#[test]
fn test_background_hits_are_never_used() {
    let mut event = generate_event(&[100.0], 30, 0);
    // Drift beyond 80% of the half cell width.
    let background = event.push(30.0, -10.0, 0.9);

    let result = TrackFinder::default()
        .find(&event.raw_hits, &event.table)
        .unwrap();
    assert_eq!(result.statistics.background_hits, 1);
    for candidate in &result.candidates {
        assert!(candidate
            .hits
            .iter()
            .all(|&id| result.registry.get(id).index() != background));
    }
}

#[test]
fn test_final_pruning_marks_outliers_bad() {
    let event = generate_event(&[90.0], 40, 0);
    let config = FinderConfig::default().with_final_prune_factor(Some(3.0));
    let result = TrackFinder::new(config)
        .find(&event.raw_hits, &event.table)
        .unwrap();

    assert_eq!(
        result.registry.count(HitUsage::Bad),
        result.statistics.hits_pruned
    );
    assert_eq!(
        result.registry.count(HitUsage::UsedInTrack),
        result.statistics.hits_used
    );
}

#[test]
fn test_unknown_wire_is_reported() {
    let mut event = generate_event(&[100.0], 10, 0);
    event
        .raw_hits
        .push(RawHit::new(10, WireId::new(999, 1), 0, 0));

    let err = TrackFinder::default()
        .find(&event.raw_hits, &event.table)
        .unwrap_err();
    assert_eq!(
        err,
        Error::UnknownWire {
            layer: 999,
            wire: 1
        }
    );
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let event = generate_event(&[100.0], 10, 0);
    for config in [
        FinderConfig::default().with_thresholds(40.0, 0.75, 50.0),
        FinderConfig::default().with_hit_appending(Some(-0.5)),
    ] {
        let err = TrackFinder::new(config)
            .find(&event.raw_hits, &event.table)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
