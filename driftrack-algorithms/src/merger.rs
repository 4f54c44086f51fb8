//! Candidate merging, outlier pruning and splitting.
//!
//! The merger decides whether two candidates belong to the same particle by
//! fitting their union, pruning outliers with shrinking tolerance and
//! turning the final chi-square into a probability. Evaluating a pair never
//! changes hit usage; only committed merges, prunes and drops touch the
//! registry.
#![allow(clippy::cast_precision_loss)]

use std::f64::consts::FRAC_PI_2;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use driftrack_core::{
    chi2_survival, normalize_angle, phi, Candidate, ChargeSign, Error, FitResult, HitId,
    HitRegistry, Result, TrackFitter, Vector2, DEFAULT_MAGNETIC_FIELD,
};

/// Merger configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MergerConfig {
    /// Pairs must score strictly above this probability to be merged.
    pub min_merge_probability: f64,
    /// Fast accept: maximum relative transverse-momentum difference.
    pub momentum_tolerance: f64,
    /// Fast accept: maximum angle between momentum directions (degrees).
    pub direction_tolerance_deg: f64,
    /// Fast accept: maximum distance between reference points.
    pub reference_distance: f64,
    /// Merged hit lists smaller than this are rejected.
    pub min_merged_hits: usize,
    /// Candidates smaller than this are dropped.
    pub min_candidate_hits: usize,
    /// Drift-distance multiples used by the successive pruning passes.
    pub prune_factors: Vec<f64>,
    /// Magnetic field (T) for the transverse-momentum estimate.
    pub magnetic_field: f64,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            min_merge_probability: 0.85,
            momentum_tolerance: 0.1,
            direction_tolerance_deg: 18.0,
            reference_distance: 5.0,
            min_merged_hits: 15,
            min_candidate_hits: 3,
            prune_factors: vec![5.0, 3.0, 1.0, 1.0],
            magnetic_field: DEFAULT_MAGNETIC_FIELD,
        }
    }
}

impl MergerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum merge probability.
    #[must_use]
    pub fn with_min_merge_probability(mut self, probability: f64) -> Self {
        self.min_merge_probability = probability;
        self
    }

    /// Sets the fast-accept tolerances.
    #[must_use]
    pub fn with_fast_accept(mut self, momentum: f64, direction_deg: f64, distance: f64) -> Self {
        self.momentum_tolerance = momentum;
        self.direction_tolerance_deg = direction_deg;
        self.reference_distance = distance;
        self
    }

    /// Sets the absolute floor on merged hit counts.
    #[must_use]
    pub fn with_min_merged_hits(mut self, hits: usize) -> Self {
        self.min_merged_hits = hits;
        self
    }

    /// Sets the minimum candidate size.
    #[must_use]
    pub fn with_min_candidate_hits(mut self, hits: usize) -> Self {
        self.min_candidate_hits = hits;
        self
    }

    /// Sets the pruning schedule.
    #[must_use]
    pub fn with_prune_factors(mut self, factors: Vec<f64>) -> Self {
        self.prune_factors = factors;
        self
    }

    /// Sets the magnetic field.
    #[must_use]
    pub fn with_magnetic_field(mut self, field: f64) -> Self {
        self.magnetic_field = field;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_merge_probability) {
            return Err(Error::config(format!(
                "min merge probability must be within [0, 1], got {}",
                self.min_merge_probability
            )));
        }
        if self.prune_factors.iter().any(|&f| f.is_nan() || f <= 0.0) {
            return Err(Error::config("prune factors must be positive"));
        }
        if self.magnetic_field.is_nan() || self.magnetic_field <= 0.0 {
            return Err(Error::config("magnetic field must be positive"));
        }
        if self.min_merged_hits < 5 {
            return Err(Error::config("merged candidates need at least 5 hits"));
        }
        Ok(())
    }
}

/// Moves all hits of `source` into `target`, leaving `source` empty.
/// The merged list is sorted and free of duplicates.
pub fn merge_hit_sets(target: &mut Candidate, source: &mut Candidate) {
    target.hits.append(&mut source.hits);
    target.normalize_hits();
}

/// Removes hits far from the fitted circle and returns them.
///
/// A hit is an outlier when `|radius - distance(center, wire)|` exceeds its
/// drift distance times `factor`. The wire position at construction time is
/// used.
pub fn prune_outliers(
    factor: f64,
    hits: &mut Vec<HitId>,
    fit: &FitResult,
    registry: &HitRegistry,
) -> Vec<HitId> {
    let center = fit.center();
    let radius = 1.0 / fit.params.curvature.abs();
    let mut removed = Vec::new();
    hits.retain(|&id| {
        let hit = registry.get(id);
        let distance = (center - hit.original_wire_position().xy()).norm();
        let keep = (radius - distance).abs() <= hit.drift_length() * factor;
        if !keep {
            removed.push(id);
        }
        keep
    });
    removed
}

/// Candidate merger.
pub struct CandidateMerger<'a, F: TrackFitter + ?Sized> {
    config: MergerConfig,
    fitter: &'a F,
}

impl<'a, F: TrackFitter + ?Sized> CandidateMerger<'a, F> {
    /// Creates a merger.
    pub fn new(config: MergerConfig, fitter: &'a F) -> Self {
        Self { config, fitter }
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// Fits a candidate and re-derives its charge.
    pub fn refit(&self, candidate: &mut Candidate, registry: &HitRegistry) {
        let fit = self.fitter.fit(&candidate.hits, registry);
        candidate.apply_fit(&fit);
        if fit.is_valid() {
            candidate.charge = self.fitter.charge_sign(&fit, &candidate.hits, registry);
        }
    }

    /// Refits every candidate.
    pub fn refit_all(&self, candidates: &mut [Candidate], registry: &HitRegistry) {
        for candidate in candidates {
            self.refit(candidate, registry);
        }
    }

    fn fast_accept(&self, a: &Candidate, b: &Candidate) -> bool {
        if a.charge != b.charge || a.charge == ChargeSign::TwoTracks {
            return false;
        }
        let field = self.config.magnetic_field;
        let momentum_a = a.transverse_momentum(field);
        let momentum_b = b.transverse_momentum(field);
        let relative = (momentum_a - momentum_b).abs() / momentum_a;

        let cos_angle = a.momentum_direction().dot(&b.momentum_direction()).clamp(-1.0, 1.0);
        let angle_deg = cos_angle.acos().to_degrees();

        let separation = (a.reference - b.reference).norm();

        relative < self.config.momentum_tolerance
            && angle_deg < self.config.direction_tolerance_deg
            && separation < self.config.reference_distance
    }

    /// Probability in `[0, 1]` that two candidates belong to one track.
    ///
    /// Similar candidates are accepted without fitting. Otherwise the union
    /// is fitted and pruned with the configured schedule; ambiguous charge,
    /// a union that did not grow beyond the larger input, or a union below
    /// the absolute floor score `0`. The score is the chi-square survival
    /// probability of `chi2 * ndf` with `ndf = hits - 4`.
    pub fn evaluate_compatibility(
        &self,
        a: &Candidate,
        b: &Candidate,
        registry: &HitRegistry,
    ) -> f64 {
        if self.fast_accept(a, b) {
            return 1.0;
        }

        let mut hits = Vec::with_capacity(a.len() + b.len());
        hits.extend_from_slice(&a.hits);
        hits.extend_from_slice(&b.hits);
        hits.sort_unstable();
        hits.dedup();

        let mut fit = self.fitter.fit(&hits, registry);
        for &factor in &self.config.prune_factors {
            if !fit.is_valid() {
                break;
            }
            prune_outliers(factor, &mut hits, &fit, registry);
            fit = self.fitter.fit(&hits, registry);
        }
        if !fit.is_valid() {
            return 0.0;
        }

        if self.fitter.charge_sign(&fit, &hits, registry) == ChargeSign::TwoTracks {
            return 0.0;
        }

        let merged = hits.len();
        if merged <= a.len().max(b.len()) || merged < self.config.min_merged_hits {
            return 0.0;
        }

        // Four circle parameters; the fit chi-square is taken per degree of freedom.
        match merged.checked_sub(4) {
            Some(ndf) if ndf > 0 => chi2_survival(fit.chi2 * ndf as f64, ndf),
            _ => 0.0,
        }
    }

    /// One greedy pass over all pairs.
    ///
    /// Each candidate is merged into the best-scoring later candidate above
    /// the threshold, which is then refitted. Emptied candidates are dropped
    /// and all survivors refitted. Returns the number of merges.
    pub fn merge_all_pairs(&self, candidates: &mut Vec<Candidate>, registry: &HitRegistry) -> usize {
        let mut merges = 0;
        for i in 0..candidates.len() {
            if candidates[i].is_empty() {
                continue;
            }
            let mut best: Option<(usize, f64)> = None;
            for j in (i + 1)..candidates.len() {
                let probability = self.evaluate_compatibility(&candidates[i], &candidates[j], registry);
                if best.map_or(true, |(_, p)| probability > p) {
                    best = Some((j, probability));
                }
            }

            if let Some((j, probability)) = best {
                if probability > self.config.min_merge_probability {
                    let (head, tail) = candidates.split_at_mut(j);
                    let target = &mut tail[0];
                    merge_hit_sets(target, &mut head[i]);
                    self.refit(target, registry);
                    merges += 1;
                    log::debug!("merged candidate {i} into {j} (p = {probability:.3})");
                }
            }
        }

        candidates.retain(|candidate| !candidate.is_empty());
        self.refit_all(candidates, registry);
        merges
    }

    /// Grows one candidate until no remaining candidate is compatible.
    ///
    /// Candidates of `others` that fall below the minimum size are removed
    /// and their hits released. Returns the number of merges.
    pub fn grow_candidate(
        &self,
        seed: &mut Candidate,
        others: &mut Vec<Candidate>,
        registry: &mut HitRegistry,
    ) -> usize {
        let mut merges = 0;
        loop {
            let mut best: Option<(usize, f64)> = None;
            for (j, other) in others.iter().enumerate() {
                if other.len() < self.config.min_candidate_hits {
                    continue;
                }
                let probability = self.evaluate_compatibility(seed, other, registry);
                if best.map_or(true, |(_, p)| probability > p) {
                    best = Some((j, probability));
                }
            }

            let merged = match best {
                Some((j, probability)) if probability > self.config.min_merge_probability => {
                    merge_hit_sets(seed, &mut others[j]);
                    self.refit(seed, registry);
                    merges += 1;
                    true
                }
                _ => false,
            };

            let min_hits = self.config.min_candidate_hits;
            others.retain(|candidate| {
                if candidate.len() < min_hits {
                    for &id in &candidate.hits {
                        registry.release(id);
                    }
                    false
                } else {
                    true
                }
            });

            if !merged {
                break;
            }
        }
        merges
    }

    /// Removes outliers from a candidate, marks them bad and refits.
    /// Returns the number of removed hits.
    pub fn prune_candidate(
        &self,
        candidate: &mut Candidate,
        factor: f64,
        registry: &mut HitRegistry,
    ) -> usize {
        let fit = self.fitter.fit(&candidate.hits, registry);
        if !fit.is_valid() {
            return 0;
        }
        let removed = prune_outliers(factor, &mut candidate.hits, &fit, registry);
        for &id in &removed {
            registry.mark_bad(id);
        }
        self.refit(candidate, registry);
        removed.len()
    }

    /// Offers every still-available hit of `pool` to the candidate whose
    /// circle passes closest to its drift circle.
    ///
    /// A hit is claimed when that distance is at most `max_distance`.
    /// Candidates that received hits are refitted. Returns the number of
    /// appended hits.
    pub fn append_unused_hits(
        &self,
        candidates: &mut [Candidate],
        pool: &[HitId],
        max_distance: f64,
        registry: &mut HitRegistry,
    ) -> usize {
        let circles: Vec<Option<(Vector2, f64)>> = candidates
            .iter()
            .map(|candidate| {
                let curvature = candidate.params.curvature;
                (curvature.is_finite() && curvature != 0.0)
                    .then(|| (candidate.center(), candidate.radius()))
            })
            .collect();

        let mut grown = vec![false; candidates.len()];
        let mut appended = 0;
        for &id in pool {
            if !registry.is_available(id) {
                continue;
            }
            let hit = registry.get(id);
            let nearest = circles
                .iter()
                .enumerate()
                .filter_map(|(k, circle)| {
                    circle.map(|(center, radius)| (k, hit.distance_to_circle(center, radius)))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1));

            if let Some((k, distance)) = nearest {
                if distance <= max_distance && registry.claim(id) {
                    candidates[k].hits.push(id);
                    grown[k] = true;
                    appended += 1;
                }
            }
        }

        for (candidate, _) in candidates.iter_mut().zip(grown).filter(|(_, touched)| *touched) {
            candidate.normalize_hits();
            self.refit(candidate, registry);
        }
        if appended > 0 {
            log::debug!("appended {appended} unused hits");
        }
        appended
    }

    /// Releases the hits of a candidate whose drift circles lie farther
    /// than `max_distance` from its fitted circle, then refits.
    /// Returns the number of released hits.
    pub fn remove_distant_hits(
        &self,
        candidate: &mut Candidate,
        max_distance: f64,
        registry: &mut HitRegistry,
    ) -> usize {
        let fit = self.fitter.fit(&candidate.hits, registry);
        if !fit.is_valid() {
            return 0;
        }
        let center = fit.center();
        let radius = 1.0 / fit.params.curvature.abs();
        let mut removed = Vec::new();
        candidate.hits.retain(|&id| {
            let keep = registry.get(id).distance_to_circle(center, radius) <= max_distance;
            if !keep {
                removed.push(id);
            }
            keep
        });
        for &id in &removed {
            registry.release(id);
        }
        if !removed.is_empty() {
            self.refit(candidate, registry);
        }
        removed.len()
    }

    /// Splits a candidate whose hits lie on both sides of its momentum
    /// direction.
    ///
    /// Only candidates with [`ChargeSign::TwoTracks`] are considered. Hits
    /// within 90 degrees of the momentum direction (seen from the reference
    /// point) stay; the rest form the returned candidate. Nothing happens
    /// unless both halves are non-empty.
    pub fn split_ambiguous_candidate(
        &self,
        candidate: &mut Candidate,
        registry: &HitRegistry,
    ) -> Option<Candidate> {
        if candidate.charge != ChargeSign::TwoTracks {
            return None;
        }

        let direction = phi(&candidate.momentum_direction());
        let (forward, backward): (Vec<HitId>, Vec<HitId>) =
            candidate.hits.iter().partition(|&&id| {
                let offset = registry.get(id).wire_position().xy() - candidate.reference;
                normalize_angle(phi(&offset) - direction).abs() <= FRAC_PI_2
            });

        if forward.is_empty() || backward.is_empty() {
            return None;
        }

        log::debug!(
            "split ambiguous candidate into {} and {} hits",
            forward.len(),
            backward.len()
        );
        candidate.hits = forward;
        self.refit(candidate, registry);

        let mut second = Candidate::new(backward, candidate.params);
        self.refit(&mut second, registry);
        Some(second)
    }
}
