//! Event-level track finding: hit preparation, the multi-pass descent
//! schedule and candidate post-processing.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use driftrack_core::{
    Candidate, Error, FastCircleFitter, HitId, HitRegistry, HitUsage, RawHit, Result, TrackFitter,
    WireCalibration,
};

use crate::collector::CandidateCollector;
use crate::merger::{CandidateMerger, MergerConfig};
use crate::quadtree::{IndexConfig, NodeId, ParameterSpaceIndex, SearchLimits};

/// How compatible candidates are combined after finding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MergeStrategy {
    /// One greedy pass over all pairs.
    #[default]
    AllPairs,
    /// Every candidate in turn absorbs the remaining candidates it is
    /// compatible with.
    GrowEach,
}

/// Track-finder configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FinderConfig {
    /// Parameter-space index layout.
    pub index: IndexConfig,
    /// Merger settings.
    pub merger: MergerConfig,
    /// Hit threshold of the first stepped pass.
    pub initial_threshold: f64,
    /// Factor applied to the threshold after every pass.
    pub step_scale: f64,
    /// Passes stop once the threshold or the number of available hits
    /// drops below this value.
    pub final_threshold: f64,
    /// Pole-exclusion radius of the stepped passes.
    pub stepped_pole_exclusion: f64,
    /// Hit threshold of the first final pass.
    pub final_pass_threshold: f64,
    /// Initial pole-exclusion radius of the final passes; doubled each step.
    pub final_pass_pole_exclusion: f64,
    /// Upper bound of the final-pass pole-exclusion radius.
    pub max_pole_exclusion: f64,
    /// Number of final passes, each over a fresh index.
    pub final_passes: usize,
    /// Leaves also claim hits of neighboring leaves.
    pub borrow_from_neighbors: bool,
    /// Merge compatible candidates after finding.
    pub merge_candidates: bool,
    /// Merge procedure used when merging is enabled.
    pub merge_strategy: MergeStrategy,
    /// Offer leftover axial hits to the closest candidate when their drift
    /// circle lies within this distance of it, then release candidate hits
    /// farther away than the same distance.
    pub append_distance: Option<f64>,
    /// Split candidates with ambiguous charge.
    pub split_candidates: bool,
    /// Prune outliers of every candidate with this drift multiple at the end.
    pub final_prune_factor: Option<f64>,
    /// Minimum share of hits on the minority side that makes a charge
    /// ambiguous. Only used by [`TrackFinder::new`]; a fitter handed to
    /// [`TrackFinder::with_fitter`] keeps its own setting.
    pub ambiguity_fraction: f64,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            merger: MergerConfig::default(),
            initial_threshold: 40.0,
            step_scale: 0.75,
            final_threshold: 10.0,
            stepped_pole_exclusion: 0.07,
            final_pass_threshold: 20.0,
            final_pass_pole_exclusion: 0.15,
            max_pole_exclusion: 0.15,
            final_passes: 2,
            borrow_from_neighbors: false,
            merge_candidates: true,
            merge_strategy: MergeStrategy::AllPairs,
            append_distance: None,
            split_candidates: true,
            final_prune_factor: None,
            ambiguity_fraction: 0.2,
        }
    }
}

impl FinderConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the index configuration.
    #[must_use]
    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.index = index;
        self
    }

    /// Sets the merger configuration.
    #[must_use]
    pub fn with_merger(mut self, merger: MergerConfig) -> Self {
        self.merger = merger;
        self
    }

    /// Sets the stepped schedule.
    #[must_use]
    pub fn with_thresholds(mut self, initial: f64, step_scale: f64, final_threshold: f64) -> Self {
        self.initial_threshold = initial;
        self.step_scale = step_scale;
        self.final_threshold = final_threshold;
        self
    }

    /// Sets the final-pass threshold.
    #[must_use]
    pub fn with_final_pass_threshold(mut self, threshold: f64) -> Self {
        self.final_pass_threshold = threshold;
        self
    }

    /// Sets the number of final passes.
    #[must_use]
    pub fn with_final_passes(mut self, passes: usize) -> Self {
        self.final_passes = passes;
        self
    }

    /// Enables or disables neighbor borrowing.
    #[must_use]
    pub fn with_neighbor_borrowing(mut self, enabled: bool) -> Self {
        self.borrow_from_neighbors = enabled;
        self
    }

    /// Enables or disables merging.
    #[must_use]
    pub fn with_merging(mut self, enabled: bool) -> Self {
        self.merge_candidates = enabled;
        self
    }

    /// Sets the merge procedure.
    #[must_use]
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    /// Enables appending leftover hits within `distance` of a candidate.
    #[must_use]
    pub fn with_hit_appending(mut self, distance: Option<f64>) -> Self {
        self.append_distance = distance;
        self
    }

    /// Enables or disables splitting.
    #[must_use]
    pub fn with_splitting(mut self, enabled: bool) -> Self {
        self.split_candidates = enabled;
        self
    }

    /// Sets the final pruning factor.
    #[must_use]
    pub fn with_final_prune_factor(mut self, factor: Option<f64>) -> Self {
        self.final_prune_factor = factor;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.index.validate()?;
        self.merger.validate()?;
        if !(self.step_scale > 0.0 && self.step_scale < 1.0) {
            return Err(Error::config(format!(
                "step scale must be within (0, 1), got {}",
                self.step_scale
            )));
        }
        if !(self.final_threshold >= 1.0) {
            return Err(Error::config("final threshold must be at least 1"));
        }
        if self.initial_threshold < self.final_threshold
            || self.final_pass_threshold < self.final_threshold
        {
            return Err(Error::config(
                "pass thresholds must not be below the final threshold",
            ));
        }
        if self.stepped_pole_exclusion < 0.0
            || self.final_pass_pole_exclusion < 0.0
            || self.max_pole_exclusion < self.final_pass_pole_exclusion
        {
            return Err(Error::config("invalid pole exclusion radii"));
        }
        if let Some(distance) = self.append_distance {
            if !(distance > 0.0 && distance.is_finite()) {
                return Err(Error::config(format!(
                    "append distance must be positive, got {distance}"
                )));
            }
        }
        if !(0.0..=0.5).contains(&self.ambiguity_fraction) {
            return Err(Error::config("ambiguity fraction must be within [0, 0.5]"));
        }
        Ok(())
    }
}

/// Event statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FindingStatistics {
    /// Hits in the event.
    pub hits_processed: usize,
    /// Hits tagged as background.
    pub background_hits: usize,
    /// Axial hits offered to the index.
    pub axial_hits: usize,
    /// Descents run over all passes.
    pub passes: usize,
    /// Leaves handed to the collector.
    pub leaves: usize,
    /// Candidates created by the collector.
    pub candidates_found: usize,
    /// Leftover hits appended to candidates.
    pub hits_appended: usize,
    /// Hits released for lying too far from their candidate after appending.
    pub hits_released: usize,
    /// Merges performed.
    pub merges: usize,
    /// Splits performed.
    pub splits: usize,
    /// Hits removed as outliers at the end.
    pub hits_pruned: usize,
    /// Candidates dropped for being too small.
    pub candidates_dropped: usize,
    /// Candidates returned.
    pub final_candidates: usize,
    /// Hits assigned to returned candidates.
    pub hits_used: usize,
}

/// Candidates of one event.
#[derive(Debug, Clone, Default)]
pub struct FindingResult {
    /// Candidates, sorted by decreasing radius.
    pub candidates: Vec<Candidate>,
    /// Hits of the event with their final usage.
    pub registry: HitRegistry,
    /// Statistics.
    pub statistics: FindingStatistics,
}

/// Legendre track finder.
pub struct TrackFinder<F: TrackFitter = FastCircleFitter> {
    config: FinderConfig,
    fitter: F,
}

impl TrackFinder<FastCircleFitter> {
    /// Creates a finder with the fast circle fitter.
    #[must_use]
    pub fn new(config: FinderConfig) -> Self {
        let fitter = FastCircleFitter::new().with_ambiguity_fraction(config.ambiguity_fraction);
        Self { config, fitter }
    }
}

impl Default for TrackFinder<FastCircleFitter> {
    fn default() -> Self {
        Self::new(FinderConfig::default())
    }
}

impl<F: TrackFitter> TrackFinder<F> {
    /// Creates a finder with a custom fitter.
    ///
    /// The fitter is used as given: [`FinderConfig::ambiguity_fraction`] does
    /// not reach it, and `find` validates only the configuration.
    pub fn with_fitter(config: FinderConfig, fitter: F) -> Self {
        Self { config, fitter }
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    /// Builds hit records for raw measurements and finds tracks among them.
    pub fn find<C: WireCalibration + ?Sized>(
        &self,
        raw_hits: &[RawHit],
        calibration: &C,
    ) -> Result<FindingResult> {
        self.config.validate()?;
        if raw_hits.is_empty() {
            log::warn!("empty event");
            return Ok(FindingResult::default());
        }

        let mut registry = HitRegistry::with_capacity(raw_hits.len());
        for raw in raw_hits {
            let mut hit = calibration.build_hit(raw)?;
            hit.check_plausibility();
            registry.insert(hit);
        }
        self.find_in_registry(registry)
    }

    /// Finds tracks among the available axial hits of a registry.
    pub fn find_in_registry(&self, mut registry: HitRegistry) -> Result<FindingResult> {
        self.config.validate()?;

        let mut statistics = FindingStatistics {
            hits_processed: registry.len(),
            background_hits: registry.count(HitUsage::Background),
            ..FindingStatistics::default()
        };
        let axial: Vec<HitId> = registry
            .iter()
            .filter(|(_, hit)| hit.is_axial())
            .map(|(id, _)| id)
            .collect();
        statistics.axial_hits = axial.len();

        let mut candidates = Vec::new();
        self.stepped_passes(&axial, &mut registry, &mut candidates, &mut statistics);
        for _ in 0..self.config.final_passes {
            self.final_pass(&axial, &mut registry, &mut candidates, &mut statistics);
        }
        statistics.candidates_found = candidates.len();

        self.postprocess(&axial, &mut candidates, &mut registry, &mut statistics);

        statistics.final_candidates = candidates.len();
        statistics.hits_used = candidates.iter().map(Candidate::len).sum();
        let claimed = registry.count(HitUsage::UsedInTrack);
        if claimed != statistics.hits_used {
            log::warn!(
                "lost hits: {claimed} hits claimed, {} assigned to candidates",
                statistics.hits_used
            );
        }
        log::info!(
            "found {} candidates using {} of {} hits ({} background, {} passes, {} merges, {} splits)",
            statistics.final_candidates,
            statistics.hits_used,
            statistics.hits_processed,
            statistics.background_hits,
            statistics.passes,
            statistics.merges,
            statistics.splits
        );

        Ok(FindingResult {
            candidates,
            registry,
            statistics,
        })
    }

    fn available(pool: &[HitId], registry: &HitRegistry) -> usize {
        pool.iter().filter(|&&id| registry.is_available(id)).count()
    }

    fn run_descent(
        &self,
        index: &mut ParameterSpaceIndex,
        limits: &SearchLimits,
        registry: &mut HitRegistry,
        candidates: &mut Vec<Candidate>,
        statistics: &mut FindingStatistics,
    ) {
        let mut collector = CandidateCollector::new(&self.fitter)
            .with_neighbor_borrowing(self.config.borrow_from_neighbors);
        let leaves = index.descend(
            limits,
            registry,
            &mut |index: &mut ParameterSpaceIndex, leaf: NodeId, registry: &mut HitRegistry| {
                collector.collect(index, leaf, registry, limits);
            },
        );
        let rejected = collector.leaves_rejected();
        let found = collector.into_candidates();
        log::debug!(
            "pass {} (threshold {}, pole exclusion {:.3}): {} leaves, {} rejected, {} candidates",
            statistics.passes,
            limits.hits_threshold,
            limits.pole_exclusion_radius,
            leaves,
            rejected,
            found.len()
        );
        statistics.passes += 1;
        statistics.leaves += leaves;
        candidates.extend(found);
    }

    /// Repeated descents over one tree with a shrinking threshold.
    fn stepped_passes(
        &self,
        pool: &[HitId],
        registry: &mut HitRegistry,
        candidates: &mut Vec<Candidate>,
        statistics: &mut FindingStatistics,
    ) {
        let mut index = ParameterSpaceIndex::new(self.config.index.clone());
        index.provide_hit_set(pool, registry);

        let mut limit = self.config.initial_threshold;
        loop {
            let limits = SearchLimits::new(limit.ceil() as usize, self.config.stepped_pole_exclusion);
            self.run_descent(&mut index, &limits, registry, candidates, statistics);

            limit *= self.config.step_scale;
            if limit < self.config.final_threshold
                || (Self::available(pool, registry) as f64) < self.config.final_threshold
            {
                break;
            }
        }
        sort_by_radius(candidates);
    }

    /// Descents over a fresh tree built from the hits still available.
    fn final_pass(
        &self,
        pool: &[HitId],
        registry: &mut HitRegistry,
        candidates: &mut Vec<Candidate>,
        statistics: &mut FindingStatistics,
    ) {
        let mut index = ParameterSpaceIndex::new(self.config.index.clone());
        index.provide_hit_set(pool, registry);

        let mut limit = self.config.final_pass_threshold;
        let mut pole_exclusion = self.config.final_pass_pole_exclusion;
        loop {
            let limits = SearchLimits::new(limit.ceil() as usize, pole_exclusion);
            self.run_descent(&mut index, &limits, registry, candidates, statistics);

            limit *= self.config.step_scale;
            pole_exclusion = (pole_exclusion * 2.0).min(self.config.max_pole_exclusion);
            if limit < self.config.final_threshold
                || (Self::available(pool, registry) as f64) < self.config.final_threshold
            {
                break;
            }
        }
        sort_by_radius(candidates);
    }

    fn postprocess(
        &self,
        pool: &[HitId],
        candidates: &mut Vec<Candidate>,
        registry: &mut HitRegistry,
        statistics: &mut FindingStatistics,
    ) {
        let merger = CandidateMerger::new(self.config.merger.clone(), &self.fitter);
        merger.refit_all(candidates, registry);

        if let Some(distance) = self.config.append_distance {
            statistics.hits_appended =
                merger.append_unused_hits(candidates, pool, distance, registry);
            for candidate in candidates.iter_mut() {
                statistics.hits_released +=
                    merger.remove_distant_hits(candidate, distance, registry);
            }
        }

        if self.config.merge_candidates {
            statistics.merges = match self.config.merge_strategy {
                MergeStrategy::AllPairs => merger.merge_all_pairs(candidates, registry),
                MergeStrategy::GrowEach => grow_each(&merger, candidates, registry),
            };
        }

        if self.config.split_candidates {
            let mut split_off = Vec::new();
            for candidate in candidates.iter_mut() {
                if let Some(second) = merger.split_ambiguous_candidate(candidate, registry) {
                    split_off.push(second);
                }
            }
            statistics.splits = split_off.len();
            candidates.extend(split_off);
        }

        if let Some(factor) = self.config.final_prune_factor {
            for candidate in candidates.iter_mut() {
                statistics.hits_pruned += merger.prune_candidate(candidate, factor, registry);
            }
        }

        let min_hits = self.config.merger.min_candidate_hits;
        let before = candidates.len();
        candidates.retain(|candidate| {
            if candidate.len() < min_hits {
                for &id in &candidate.hits {
                    registry.release(id);
                }
                false
            } else {
                true
            }
        });
        statistics.candidates_dropped = before - candidates.len();

        sort_by_radius(candidates);
    }
}

/// Lets every candidate, in order, absorb the compatible candidates that
/// follow it. Returns the number of merges.
fn grow_each<F: TrackFitter + ?Sized>(
    merger: &CandidateMerger<'_, F>,
    candidates: &mut Vec<Candidate>,
    registry: &mut HitRegistry,
) -> usize {
    let mut merges = 0;
    let mut pending = std::mem::take(candidates);
    while !pending.is_empty() {
        let mut seed = pending.remove(0);
        merges += merger.grow_candidate(&mut seed, &mut pending, registry);
        candidates.push(seed);
    }
    merges
}

fn sort_by_radius(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.radius().total_cmp(&a.radius()));
}
