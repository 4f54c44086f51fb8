//! Event-wide hit ownership.
//!
//! All hits of an event live in one [`HitRegistry`]. Components refer to
//! hits by [`HitId`] and change usage only through explicit registry calls:
//! a candidate *claims* a hit, gives it back with *release*, and refitting
//! marks outliers *bad*. Phases run one after another (vote, descend,
//! merge), so a single `&mut HitRegistry` is the only writer at any time.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hit::{HitRecord, HitUsage};

/// Identifier of a hit inside a [`HitRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitId(pub usize);

impl HitId {
    /// Position of the hit in the registry.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Owner of every hit record of an event.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HitRegistry {
    hits: Vec<HitRecord>,
}

impl HitRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            hits: Vec::with_capacity(capacity),
        }
    }

    /// Adds a hit and returns its id.
    pub fn insert(&mut self, hit: HitRecord) -> HitId {
        let id = HitId(self.hits.len());
        self.hits.push(hit);
        id
    }

    /// Number of hits.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if the registry holds no hits.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Looks up a hit.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this registry.
    #[inline]
    #[must_use]
    pub fn get(&self, id: HitId) -> &HitRecord {
        &self.hits[id.0]
    }

    /// Looks up a hit for modification of its geometry (z reference).
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this registry.
    #[inline]
    pub fn get_mut(&mut self, id: HitId) -> &mut HitRecord {
        &mut self.hits[id.0]
    }

    /// Fallible lookup.
    pub fn try_get(&self, id: HitId) -> Result<&HitRecord> {
        self.hits.get(id.0).ok_or(Error::UnknownHit(id.0))
    }

    /// Usage state of a hit.
    #[inline]
    #[must_use]
    pub fn usage(&self, id: HitId) -> HitUsage {
        self.hits[id.0].usage()
    }

    /// Whether the hit can still be claimed.
    #[inline]
    #[must_use]
    pub fn is_available(&self, id: HitId) -> bool {
        self.usage(id) == HitUsage::Unused
    }

    /// Claims an available hit for a candidate. Returns `false` when the
    /// hit is already used, background or bad.
    pub fn claim(&mut self, id: HitId) -> bool {
        let hit = &mut self.hits[id.0];
        if hit.usage() == HitUsage::Unused {
            hit.set_usage(HitUsage::UsedInTrack);
            true
        } else {
            false
        }
    }

    /// Gives a claimed hit back to the pool. Background and bad hits stay
    /// as they are.
    pub fn release(&mut self, id: HitId) {
        let hit = &mut self.hits[id.0];
        if hit.usage() == HitUsage::UsedInTrack {
            hit.set_usage(HitUsage::Unused);
        }
    }

    /// Marks a hit as an outlier.
    pub fn mark_bad(&mut self, id: HitId) {
        self.hits[id.0].set_usage(HitUsage::Bad);
    }

    /// Ids of all hits.
    pub fn ids(&self) -> impl Iterator<Item = HitId> + '_ {
        (0..self.hits.len()).map(HitId)
    }

    /// Ids of all hits that can still be claimed.
    #[must_use]
    pub fn available_ids(&self) -> Vec<HitId> {
        self.ids().filter(|&id| self.is_available(id)).collect()
    }

    /// Iterates over `(id, hit)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (HitId, &HitRecord)> {
        self.hits.iter().enumerate().map(|(i, hit)| (HitId(i), hit))
    }

    /// Counts hits in the given state.
    #[must_use]
    pub fn count(&self, usage: HitUsage) -> usize {
        self.hits.iter().filter(|hit| hit.usage() == usage).count()
    }
}

impl FromIterator<HitRecord> for HitRegistry {
    fn from_iter<I: IntoIterator<Item = HitRecord>>(iter: I) -> Self {
        Self {
            hits: iter.into_iter().collect(),
        }
    }
}
