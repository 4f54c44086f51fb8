//! Parameter-space index over (angle, curvature).
//!
//! Every hit contributes two curves `r(theta) = x cos(theta) + y sin(theta) +/- d`
//! in the Legendre plane (conformal position `x, y`, conformal drift `d`).
//! Track candidates sit where many curves cross. The index finds those
//! crossings by recursively splitting the plane into 2x2 cells and keeping
//! only cells that enough curves pass through.
//!
//! Nodes live in a flat arena and refer to each other by [`NodeId`].
//! Children are created on first subdivision; a node votes its hits into its
//! children exactly once.
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_panics_doc
)]

use std::cmp::Reverse;
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use driftrack_core::{ConformalPosition, Error, HitId, HitRegistry, Result, TrackParameters};

use crate::neighbors::{CellKey, NodeGrid};

/// Immutable configuration of a [`ParameterSpaceIndex`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexConfig {
    /// Deepest level of subdivision; leaves live here.
    pub max_level: u8,
    /// Number of angle bins covering `[0, pi]`.
    pub angle_bins: u32,
    /// Lower curvature bound of the domain.
    pub curvature_min: f64,
    /// Upper curvature bound of the domain.
    pub curvature_max: f64,
    /// Number of levels above the leaves whose children get widened angle bounds.
    pub widening_depth: u8,
    /// Nodes at or above this level (closer to the root) have no neighbors.
    pub neighbor_min_level: u8,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_level: 13,
            angle_bins: 8192,
            curvature_min: -0.15,
            curvature_max: 0.15,
            widening_depth: 5,
            neighbor_min_level: 3,
        }
    }
}

impl IndexConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum level.
    #[must_use]
    pub fn with_max_level(mut self, level: u8) -> Self {
        self.max_level = level;
        self
    }

    /// Sets the number of angle bins.
    #[must_use]
    pub fn with_angle_bins(mut self, bins: u32) -> Self {
        self.angle_bins = bins;
        self
    }

    /// Sets the curvature domain.
    #[must_use]
    pub fn with_curvature_range(mut self, min: f64, max: f64) -> Self {
        self.curvature_min = min;
        self.curvature_max = max;
        self
    }

    /// Sets the widening depth.
    #[must_use]
    pub fn with_widening_depth(mut self, depth: u8) -> Self {
        self.widening_depth = depth;
        self
    }

    /// Sets the minimum level for neighbor linking.
    #[must_use]
    pub fn with_neighbor_min_level(mut self, level: u8) -> Self {
        self.neighbor_min_level = level;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_level == 0 || self.max_level > 31 {
            return Err(Error::config(format!(
                "max level must be within [1, 31], got {}",
                self.max_level
            )));
        }
        if u64::from(self.angle_bins) < 1_u64 << self.max_level {
            return Err(Error::config(format!(
                "{} angle bins cannot be split {} times",
                self.angle_bins, self.max_level
            )));
        }
        if !(self.curvature_min < self.curvature_max) {
            return Err(Error::config(format!(
                "empty curvature range [{}, {}]",
                self.curvature_min, self.curvature_max
            )));
        }
        if self.widening_depth > self.max_level {
            return Err(Error::config("widening depth exceeds max level"));
        }
        Ok(())
    }
}

/// Per-descent limits.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchLimits {
    /// Nodes with fewer hits are pruned.
    pub hits_threshold: usize,
    /// Nodes whose curvature range lies on one side of zero and entirely
    /// beyond this radius are pruned.
    pub pole_exclusion_radius: f64,
}

impl SearchLimits {
    /// Creates new limits.
    #[must_use]
    pub fn new(hits_threshold: usize, pole_exclusion_radius: f64) -> Self {
        Self {
            hits_threshold,
            pole_exclusion_radius,
        }
    }

    /// Validates the limits.
    pub fn validate(&self) -> Result<()> {
        if self.hits_threshold == 0 {
            return Err(Error::config("hits threshold must be at least 1"));
        }
        if self.pole_exclusion_radius.is_nan() || self.pole_exclusion_radius < 0.0 {
            return Err(Error::config("pole exclusion radius must be non-negative"));
        }
        Ok(())
    }
}

/// Index of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NodeId(pub usize);

/// One rectangle of the (angle, curvature) plane.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterSpaceNode {
    pub(crate) angle_min: u32,
    pub(crate) angle_max: u32,
    pub(crate) curvature_min: f64,
    pub(crate) curvature_max: f64,
    pub(crate) level: u8,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Option<[NodeId; 4]>,
    pub(crate) hits: Vec<HitId>,
    pub(crate) filled: bool,
    pub(crate) neighbors: Option<Vec<NodeId>>,
}

impl ParameterSpaceNode {
    fn new(
        angle: (u32, u32),
        curvature: (f64, f64),
        level: u8,
        parent: Option<NodeId>,
    ) -> Self {
        Self {
            angle_min: angle.0,
            angle_max: angle.1,
            curvature_min: curvature.0,
            curvature_max: curvature.1,
            level,
            parent,
            children: None,
            hits: Vec::new(),
            filled: false,
            neighbors: None,
        }
    }

    /// Angle bounds as bin numbers.
    #[must_use]
    pub fn angle_bins(&self) -> (u32, u32) {
        (self.angle_min, self.angle_max)
    }

    /// Curvature bounds.
    #[must_use]
    pub fn curvature_bounds(&self) -> (f64, f64) {
        (self.curvature_min, self.curvature_max)
    }

    /// Recursion level (root is 0).
    #[must_use]
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Parent node, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in `angle_half * 2 + curvature_half` order, once created.
    #[must_use]
    pub fn children(&self) -> Option<&[NodeId; 4]> {
        self.children.as_ref()
    }

    /// Hits currently assigned to the node.
    #[must_use]
    pub fn hits(&self) -> &[HitId] {
        &self.hits
    }

    /// Whether the node already voted its hits into its children.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    fn excluded_by_pole(&self, radius: f64) -> bool {
        self.curvature_min * self.curvature_max >= 0.0
            && self.curvature_min.abs() > radius
            && self.curvature_max.abs() > radius
    }
}

/// Whether one drift-offset curve crosses a cell: the signed distances from
/// the curve to the four cell corners must not all share a strict sign.
#[inline]
fn curve_crosses_cell(curvature: (f64, f64), r_at_angle_min: f64, r_at_angle_max: f64) -> bool {
    let distances = [
        curvature.0 - r_at_angle_min,
        curvature.1 - r_at_angle_min,
        curvature.0 - r_at_angle_max,
        curvature.1 - r_at_angle_max,
    ];
    let all_above = distances.iter().all(|&d| d > 0.0);
    let all_below = distances.iter().all(|&d| d < 0.0);
    !(all_above || all_below)
}

/// Quad tree over the Legendre parameter plane.
#[derive(Debug, Clone)]
pub struct ParameterSpaceIndex {
    config: IndexConfig,
    nodes: Vec<ParameterSpaceNode>,
    /// `(cos, sin)` at every angle bin boundary.
    trig: Vec<(f64, f64)>,
    grid: NodeGrid,
    deepest_level: u8,
}

impl ParameterSpaceIndex {
    /// Creates an index holding only the root node.
    #[must_use]
    pub fn new(config: IndexConfig) -> Self {
        let trig = (0..=config.angle_bins)
            .map(|bin| {
                let angle = f64::from(bin) * PI / f64::from(config.angle_bins);
                (angle.cos(), angle.sin())
            })
            .collect();
        let mut index = Self {
            config,
            nodes: Vec::new(),
            trig,
            grid: NodeGrid::default(),
            deepest_level: 0,
        };
        index.clear();
        index
    }

    /// Discards every node except a fresh, empty root.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.grid.clear();
        self.deepest_level = 0;
        let root = ParameterSpaceNode::new(
            (0, self.config.angle_bins),
            (self.config.curvature_min, self.config.curvature_max),
            0,
            None,
        );
        self.push_node(root);
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Root node id.
    #[must_use]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Node lookup. Unknown ids are a programming error and panic.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &ParameterSpaceNode {
        &self.nodes[id.0]
    }

    /// Number of nodes created so far.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Deepest level any descent has visited.
    #[must_use]
    pub fn deepest_level(&self) -> u8 {
        self.deepest_level
    }

    /// Angle (radians) of a bin boundary.
    #[must_use]
    pub fn angle(&self, bin: u32) -> f64 {
        f64::from(bin) * PI / f64::from(self.config.angle_bins)
    }

    /// Center of a node in (angle, curvature).
    #[must_use]
    pub fn node_center(&self, id: NodeId) -> TrackParameters {
        let node = self.node(id);
        TrackParameters::new(
            0.5 * (self.angle(node.angle_min) + self.angle(node.angle_max)),
            0.5 * (node.curvature_min + node.curvature_max),
        )
    }

    /// Starts over with the hits of `pool` that are still available.
    ///
    /// All subdivisions are discarded; the new root holds the hit set.
    pub fn provide_hit_set(&mut self, pool: &[HitId], registry: &HitRegistry) {
        self.clear();
        let hits = pool
            .iter()
            .copied()
            .filter(|&id| registry.is_available(id))
            .collect();
        self.nodes[0].hits = hits;
    }

    fn push_node(&mut self, node: ParameterSpaceNode) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        let key = self.cell_key(id);
        self.grid.insert(key, id);
        id
    }

    /// Angle widening (in bins) applied to the children of a node at `level`.
    fn widening(&self, level: u8) -> u32 {
        if level + self.config.widening_depth >= self.config.max_level {
            (1_u32 << (self.config.max_level - level)) / 4
        } else {
            0
        }
    }

    /// Creates the four children of a node if they do not exist yet.
    ///
    /// Children are ordered `angle_half * 2 + curvature_half`. Near the
    /// leaves the angle bounds of the children overlap; they never leave
    /// the parent's bounds.
    ///
    /// # Panics
    ///
    /// Panics when called on a node at the maximum level.
    pub fn subdivide(&mut self, id: NodeId) -> [NodeId; 4] {
        if let Some(children) = self.nodes[id.0].children {
            return children;
        }

        let node = &self.nodes[id.0];
        assert!(
            node.level < self.config.max_level,
            "node {} at level {} cannot be subdivided",
            id.0,
            node.level
        );
        let (angle_min, angle_max) = (node.angle_min, node.angle_max);
        let (curvature_min, curvature_max) = (node.curvature_min, node.curvature_max);
        let level = node.level;

        let angle_mid = angle_min + (angle_max - angle_min) / 2;
        let curvature_mid = 0.5 * (curvature_min + curvature_max);
        let widening = self.widening(level);

        let mut children = [NodeId(0); 4];
        for i in 0..2 {
            let (lower, upper) = if i == 0 {
                (angle_min, angle_mid)
            } else {
                (angle_mid, angle_max)
            };
            let lower = lower.saturating_sub(widening).max(angle_min);
            let upper = upper.saturating_add(widening).min(angle_max);
            for j in 0..2 {
                let curvature = if j == 0 {
                    (curvature_min, curvature_mid)
                } else {
                    (curvature_mid, curvature_max)
                };
                let child = ParameterSpaceNode::new((lower, upper), curvature, level + 1, Some(id));
                children[i * 2 + j] = self.push_node(child);
            }
        }

        self.nodes[id.0].children = Some(children);
        children
    }

    /// Whether one of the two drift-offset curves of `position` crosses the node.
    #[must_use]
    pub fn votes_for(&self, id: NodeId, position: &ConformalPosition) -> bool {
        let node = self.node(id);
        let (cos_min, sin_min) = self.trig[node.angle_min as usize];
        let (cos_max, sin_max) = self.trig[node.angle_max as usize];
        let r_min = position.legendre_r(cos_min, sin_min);
        let r_max = position.legendre_r(cos_max, sin_max);
        let curvature = (node.curvature_min, node.curvature_max);

        [position.drift, -position.drift]
            .iter()
            .any(|&offset| curve_crosses_cell(curvature, r_min + offset, r_max + offset))
    }

    /// Votes the available hits of a node into its children. Runs once per node.
    pub fn fill(&mut self, id: NodeId, registry: &HitRegistry) {
        if self.nodes[id.0].filled {
            return;
        }
        let children = self.subdivide(id);
        let hits = self.nodes[id.0].hits.clone();

        let mut votes: [Vec<HitId>; 4] = Default::default();
        for hit in hits {
            if !registry.is_available(hit) {
                continue;
            }
            let position = registry.get(hit).conformal();
            for (slot, &child) in votes.iter_mut().zip(children.iter()) {
                if self.votes_for(child, &position) {
                    slot.push(hit);
                }
            }
        }

        for (child, hits) in children.iter().zip(votes) {
            log::trace!(
                "node {} child {} received {} hits",
                id.0,
                child.0,
                hits.len()
            );
            self.nodes[child.0].hits.extend(hits);
        }
        self.nodes[id.0].filled = true;
    }

    /// Greedy peak search from the root.
    ///
    /// Every node reaching the maximum level with enough hits is handed to
    /// `on_leaf`, which may claim hits through the registry. Children are
    /// visited in descending order of hit count; before visiting a child its
    /// hits that are no longer available are dropped. Returns the number of
    /// leaves handed out.
    pub fn descend<F>(
        &mut self,
        limits: &SearchLimits,
        registry: &mut HitRegistry,
        on_leaf: &mut F,
    ) -> usize
    where
        F: FnMut(&mut Self, NodeId, &mut HitRegistry),
    {
        let mut leaves = 0;
        self.descend_node(self.root(), limits, registry, on_leaf, &mut leaves);
        leaves
    }

    fn descend_node<F>(
        &mut self,
        id: NodeId,
        limits: &SearchLimits,
        registry: &mut HitRegistry,
        on_leaf: &mut F,
        leaves: &mut usize,
    ) where
        F: FnMut(&mut Self, NodeId, &mut HitRegistry),
    {
        let node = &self.nodes[id.0];
        if node.hits.len() < limits.hits_threshold
            || node.excluded_by_pole(limits.pole_exclusion_radius)
        {
            return;
        }
        let level = node.level;
        self.deepest_level = self.deepest_level.max(level);

        if level == self.config.max_level {
            log::debug!(
                "leaf {} at {:?} with {} hits",
                id.0,
                self.node_center(id),
                self.nodes[id.0].hits.len()
            );
            *leaves += 1;
            on_leaf(self, id, registry);
            return;
        }

        let mut children = self.subdivide(id);
        self.fill(id, registry);

        // Stable: ties keep the `angle_half * 2 + curvature_half` order.
        children.sort_by_key(|child| Reverse(self.nodes[child.0].hits.len()));

        for child in children {
            self.nodes[child.0]
                .hits
                .retain(|&hit| registry.is_available(hit));
            self.descend_node(child, limits, registry, on_leaf, leaves);
        }
    }

    /// Grid cell of a node at its own level.
    pub(crate) fn cell_key(&self, id: NodeId) -> CellKey {
        let node = &self.nodes[id.0];
        let cells = f64::from(1_u32 << node.level);

        let angle_width = f64::from(self.config.angle_bins) / cells;
        let angle_center = 0.5 * (f64::from(node.angle_min) + f64::from(node.angle_max));

        let curvature_height = (self.config.curvature_max - self.config.curvature_min) / cells;
        let curvature_center =
            0.5 * (node.curvature_min + node.curvature_max) - self.config.curvature_min;

        CellKey {
            level: node.level,
            angle: (angle_center / angle_width).floor() as i64,
            curvature: (curvature_center / curvature_height).floor() as i64,
        }
    }

    pub(crate) fn grid(&self) -> &NodeGrid {
        &self.grid
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut ParameterSpaceNode {
        &mut self.nodes[id.0]
    }
}
