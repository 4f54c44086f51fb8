//! Turns parameter-space leaves into track candidates.

use driftrack_core::{Candidate, HitId, HitRegistry, TrackFitter};

use crate::quadtree::{NodeId, ParameterSpaceIndex, SearchLimits};

/// Standard leaf callback.
///
/// Claims the available hits of a leaf (and optionally of its linked
/// neighbors), fits them and stores the resulting candidate. Leaves that
/// cannot claim enough hits give their hits back.
pub struct CandidateCollector<'a, F: TrackFitter + ?Sized> {
    fitter: &'a F,
    borrow_from_neighbors: bool,
    candidates: Vec<Candidate>,
    leaves_rejected: usize,
}

impl<'a, F: TrackFitter + ?Sized> CandidateCollector<'a, F> {
    /// Creates a collector using `fitter` for the initial fit.
    pub fn new(fitter: &'a F) -> Self {
        Self {
            fitter,
            borrow_from_neighbors: false,
            candidates: Vec::new(),
            leaves_rejected: 0,
        }
    }

    /// Also claims available hits of neighboring leaves.
    #[must_use]
    pub fn with_neighbor_borrowing(mut self, enabled: bool) -> Self {
        self.borrow_from_neighbors = enabled;
        self
    }

    /// Processes one leaf. Returns `true` when a candidate was created.
    pub fn collect(
        &mut self,
        index: &mut ParameterSpaceIndex,
        leaf: NodeId,
        registry: &mut HitRegistry,
        limits: &SearchLimits,
    ) -> bool {
        let mut hits: Vec<HitId> = index.node(leaf).hits().to_vec();
        if self.borrow_from_neighbors {
            for neighbor in index.link_neighbors(leaf) {
                hits.extend_from_slice(index.node(neighbor).hits());
            }
            hits.sort_unstable();
            hits.dedup();
        }

        let claimed: Vec<HitId> = hits.into_iter().filter(|&id| registry.claim(id)).collect();
        if claimed.len() < limits.hits_threshold {
            for &id in &claimed {
                registry.release(id);
            }
            self.leaves_rejected += 1;
            return false;
        }

        let fit = self.fitter.fit(&claimed, registry);
        let candidate = if fit.is_valid() {
            let charge = self.fitter.charge_sign(&fit, &claimed, registry);
            Candidate::from_fit(claimed, &fit, charge)
        } else {
            Candidate::new(claimed, index.node_center(leaf))
        };

        log::debug!(
            "candidate {} from leaf {}: {} hits, curvature {:.5}, charge {:?}",
            self.candidates.len(),
            leaf.0,
            candidate.len(),
            candidate.params.curvature,
            candidate.charge
        );
        self.candidates.push(candidate);
        true
    }

    /// Candidates collected so far.
    #[must_use]
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Number of leaves that could not claim enough hits.
    #[must_use]
    pub fn leaves_rejected(&self) -> usize {
        self.leaves_rejected
    }

    /// Consumes the collector and returns its candidates.
    #[must_use]
    pub fn into_candidates(self) -> Vec<Candidate> {
        self.candidates
    }
}
