//! Neighbor linking between nodes of the same level.
//!
//! Nodes are registered in a hash grid keyed by level and cell position as
//! they are created. Two nodes are neighbors when their cells touch,
//! corners included.

use std::collections::HashMap;

use crate::quadtree::{NodeId, ParameterSpaceIndex};

/// Position of a node in the regular grid of its level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CellKey {
    pub(crate) level: u8,
    pub(crate) angle: i64,
    pub(crate) curvature: i64,
}

/// Hash grid of nodes for 3x3 neighborhood queries.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeGrid {
    cells: HashMap<CellKey, Vec<NodeId>>,
}

impl NodeGrid {
    pub(crate) fn clear(&mut self) {
        self.cells.clear();
    }

    pub(crate) fn insert(&mut self, key: CellKey, id: NodeId) {
        self.cells.entry(key).or_default().push(id);
    }

    /// Nodes in the 3x3 block of cells around `key`, including the cell itself.
    pub(crate) fn query_neighborhood(&self, key: CellKey, out: &mut Vec<NodeId>) {
        out.clear();
        for d_angle in -1..=1 {
            for d_curvature in -1..=1 {
                let cell = CellKey {
                    level: key.level,
                    angle: key.angle + d_angle,
                    curvature: key.curvature + d_curvature,
                };
                if let Some(ids) = self.cells.get(&cell) {
                    out.extend_from_slice(ids);
                }
            }
        }
    }
}

impl ParameterSpaceIndex {
    /// Links a node to the existing nodes of its level that touch it.
    ///
    /// Nodes at or above the configured minimum level have no neighbors.
    /// The result is computed once and cached in the node; nodes created
    /// later are not added.
    pub fn link_neighbors(&mut self, id: NodeId) -> Vec<NodeId> {
        let node = self.node(id);
        if node.level() <= self.config().neighbor_min_level {
            return Vec::new();
        }
        if let Some(neighbors) = &node.neighbors {
            return neighbors.clone();
        }

        let mut neighbors = Vec::with_capacity(8);
        self.grid().query_neighborhood(self.cell_key(id), &mut neighbors);
        neighbors.retain(|&other| other != id);
        neighbors.sort_unstable();

        log::trace!("node {} linked to {} neighbors", id.0, neighbors.len());
        self.node_mut(id).neighbors = Some(neighbors.clone());
        neighbors
    }

    /// Cached neighbors of a node, if they were linked.
    #[must_use]
    pub fn neighbors(&self, id: NodeId) -> Option<&[NodeId]> {
        self.node(id).neighbors.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use crate::quadtree::{IndexConfig, ParameterSpaceIndex};

    fn small_index() -> ParameterSpaceIndex {
        ParameterSpaceIndex::new(
            IndexConfig::default()
                .with_max_level(6)
                .with_angle_bins(64)
                .with_widening_depth(0)
                .with_neighbor_min_level(1),
        )
    }

    #[test]
    fn test_shallow_nodes_have_no_neighbors() {
        let mut index = small_index();
        let children = index.subdivide(index.root());
        assert!(index.link_neighbors(children[0]).is_empty());
        assert!(index.neighbors(children[0]).is_none());
    }

    #[test]
    fn test_siblings_are_neighbors() {
        let mut index = small_index();
        let children = index.subdivide(index.root());
        let grandchildren = index.subdivide(children[0]);

        let neighbors = index.link_neighbors(grandchildren[0]);
        let mut expected = grandchildren[1..].to_vec();
        expected.sort_unstable();
        assert_eq!(neighbors, expected);
        assert_eq!(index.neighbors(grandchildren[0]), Some(expected.as_slice()));
    }

    #[test]
    fn test_neighbors_across_parent_border() {
        let mut index = small_index();
        let children = index.subdivide(index.root());
        // children[0]: lower angle half, lower curvature half.
        // children[2]: upper angle half, lower curvature half.
        let left = index.subdivide(children[0]);
        let right = index.subdivide(children[2]);

        // Upper angle quarter of the left block touches the lower quarter of the right.
        let neighbors = index.link_neighbors(left[3]);
        assert!(neighbors.contains(&right[0]));
        assert!(neighbors.contains(&right[1]));
        assert!(!neighbors.contains(&right[2]));
        assert!(!neighbors.contains(&right[3]));
        assert!(!neighbors.contains(&left[3]));
    }
}
