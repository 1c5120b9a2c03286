//! Tree options and the root decomposition.

use mwtree_arena::{ArenaConfig, NodeIndex};
use serde::Serialize;

use crate::constants::{
    DEFAULT_CHUNK_VALUES, DEFAULT_MAX_NODES, DEFAULT_ORDER, SMALL_DIMENSION_CHUNK,
};
use crate::error::TreeError;

/// Options fixed when a tree is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeOptions {
    /// Polynomial order `k`; each block holds `(k + 1)^D` values.
    pub order: usize,
    /// Persistent node budget (0 = default).
    pub max_nodes: usize,
    /// Generated node budget (0 = same as `max_nodes`).
    pub max_gen_nodes: usize,
    /// Nodes per chunk (0 = derived from dimension and order).
    pub chunk_capacity: usize,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            max_nodes: DEFAULT_MAX_NODES,
            max_gen_nodes: DEFAULT_MAX_NODES,
            chunk_capacity: 0,
        }
    }
}

impl TreeOptions {
    /// Normalize options, applying defaults where budgets are zero.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.max_nodes == 0 {
            self.max_nodes = DEFAULT_MAX_NODES;
        }
        if self.max_gen_nodes == 0 {
            self.max_gen_nodes = self.max_nodes;
        }
        self
    }

    /// Values in one scaling/wavelet block: `(k + 1)^dimension`.
    #[must_use]
    pub fn block_len(&self, dimension: usize) -> usize {
        (0..dimension).fold(1, |acc, _| acc * (self.order + 1))
    }

    /// Nodes per chunk.
    ///
    /// Small dimensions use a fixed chunk; otherwise a generated chunk is
    /// sized to hold about [`DEFAULT_CHUNK_VALUES`] coefficients. A derived
    /// capacity is raised to fit the largest group; an explicit one is taken
    /// as given and validated by the arena.
    #[must_use]
    pub fn chunk_capacity_for(&self, dimension: usize, root_count: usize) -> usize {
        if self.chunk_capacity > 0 {
            return self.chunk_capacity;
        }
        let derived = if dimension < 3 {
            SMALL_DIMENSION_CHUNK
        } else {
            DEFAULT_CHUNK_VALUES / self.block_len(dimension)
        };
        derived.max(1 << dimension).max(root_count)
    }

    /// Arena geometry for the persistent and generated arenas.
    ///
    /// Persistent nodes carry `2^D` blocks and the root group; generated
    /// nodes carry one block.
    #[must_use]
    pub fn arena_configs(&self, dimension: usize, root_count: usize) -> (ArenaConfig, ArenaConfig) {
        let capacity = self.chunk_capacity_for(dimension, root_count);
        let block = self.block_len(dimension);
        let persistent = ArenaConfig::new(dimension, capacity, self.max_nodes)
            .with_coefficients(block << dimension)
            .with_roots(root_count);
        let generated =
            ArenaConfig::new(dimension, capacity, self.max_gen_nodes).with_coefficients(block);
        (persistent, generated)
    }
}

/// Root scale, corner and per-axis box counts of a tree's world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox<const D: usize> {
    scale: i32,
    corner: [i32; D],
    boxes: [usize; D],
}

impl<const D: usize> BoundingBox<D> {
    /// Boxes `boxes[d]` wide along axis `d`, starting at `corner`.
    pub fn new(scale: i32, corner: [i32; D], boxes: [usize; D]) -> Result<Self, TreeError> {
        if D == 0 {
            return Err(TreeError::Config("dimension must be positive".into()));
        }
        if boxes.iter().any(|&b| b == 0) {
            return Err(TreeError::Config(format!(
                "every axis needs at least one box, got {boxes:?}"
            )));
        }
        if boxes.iter().any(|&b| i32::try_from(b).is_err()) {
            return Err(TreeError::Config(format!("box counts {boxes:?} too large")));
        }
        Ok(Self {
            scale,
            corner,
            boxes,
        })
    }

    /// A single root box at scale 0.
    #[must_use]
    pub fn unit() -> Self {
        Self {
            scale: 0,
            corner: [0; D],
            boxes: [1; D],
        }
    }

    /// Scale of the roots.
    pub fn scale(&self) -> i32 {
        self.scale
    }

    /// Translation of the first root.
    pub fn corner(&self) -> &[i32; D] {
        &self.corner
    }

    /// Boxes per axis.
    pub fn boxes(&self) -> &[usize; D] {
        &self.boxes
    }

    /// Number of roots.
    pub fn root_count(&self) -> usize {
        self.boxes.iter().product()
    }

    /// Address of root `i`; axis 0 varies fastest.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn root_index(&self, i: usize) -> NodeIndex<D> {
        let mut rest = i;
        let mut translation = self.corner;
        for (l, &n) in translation.iter_mut().zip(&self.boxes) {
            *l += (rest % n) as i32;
            rest /= n;
        }
        NodeIndex::new(self.scale, translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_fills_budgets() {
        let opts = TreeOptions {
            max_nodes: 0,
            max_gen_nodes: 0,
            ..Default::default()
        }
        .normalize();
        assert_eq!(opts.max_nodes, DEFAULT_MAX_NODES);
        assert_eq!(opts.max_gen_nodes, DEFAULT_MAX_NODES);

        let opts = TreeOptions {
            max_nodes: 500,
            max_gen_nodes: 0,
            ..Default::default()
        }
        .normalize();
        assert_eq!(opts.max_gen_nodes, 500);
    }

    #[test]
    fn block_len_is_power_of_order() {
        let opts = TreeOptions {
            order: 5,
            ..Default::default()
        };
        assert_eq!(opts.block_len(1), 6);
        assert_eq!(opts.block_len(3), 216);
    }

    #[test]
    fn chunk_capacity_by_dimension() {
        let opts = TreeOptions::default();
        assert_eq!(opts.chunk_capacity_for(2, 1), 64);
        assert_eq!(opts.chunk_capacity_for(3, 1), (1 << 20) / 216);
    }

    #[test]
    fn derived_chunk_fits_largest_group() {
        let opts = TreeOptions {
            order: 80,
            ..Default::default()
        };
        // 81^3 values per block leave room for a single node.
        assert_eq!(opts.chunk_capacity_for(3, 1), 8);
        assert_eq!(opts.chunk_capacity_for(3, 27), 27);
    }

    #[test]
    fn persistent_blocks_are_branching_times_larger() {
        let opts = TreeOptions {
            order: 3,
            max_nodes: 100,
            max_gen_nodes: 50,
            chunk_capacity: 16,
        };
        let (p, g) = opts.arena_configs(2, 4);
        assert_eq!(p.coefficients_per_node, 4 * 16);
        assert_eq!(g.coefficients_per_node, 16);
        assert_eq!(p.root_count, 4);
        assert_eq!(g.root_count, 0);
        assert_eq!((p.max_slots, g.max_slots), (100, 50));
    }

    #[test]
    fn root_count_is_product_of_boxes() {
        let bbox = BoundingBox::new(-1, [-2, 0, 1], [2, 3, 1]).unwrap();
        assert_eq!(bbox.root_count(), 6);
        assert_eq!(bbox.root_index(0), NodeIndex::new(-1, [-2, 0, 1]));
        assert_eq!(bbox.root_index(1), NodeIndex::new(-1, [-1, 0, 1]));
        assert_eq!(bbox.root_index(5), NodeIndex::new(-1, [-1, 2, 1]));
    }

    #[test]
    fn empty_axis_is_rejected() {
        assert!(BoundingBox::<2>::new(0, [0, 0], [1, 0]).is_err());
    }
}
