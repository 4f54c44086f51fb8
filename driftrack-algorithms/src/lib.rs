//! driftrack-algorithms: Legendre track finding for drift chambers.
//!
//! This crate provides the pattern-recognition stages:
//! - **Quad tree** - recursive search over (angle, curvature) space
//! - **Collector** - turns leaves into fitted candidates
//! - **Merger** - joins, grows, prunes and splits candidates
//! - **Processing** - the multi-pass event driver
//!
#![warn(missing_docs)]

mod collector;
mod merger;
mod neighbors;
mod processing;
pub mod quadtree;

pub use collector::CandidateCollector;
pub use merger::{merge_hit_sets, prune_outliers, CandidateMerger, MergerConfig};
pub use processing::{
    FinderConfig, FindingResult, FindingStatistics, MergeStrategy, TrackFinder,
};
pub use quadtree::{IndexConfig, NodeId, ParameterSpaceIndex, ParameterSpaceNode, SearchLimits};

// Re-export the core data model
pub use driftrack_core::{Candidate, ChargeSign, HitId, HitRegistry, TrackParameters};
