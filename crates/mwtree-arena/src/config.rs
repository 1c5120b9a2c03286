//! Arena configuration.

use crate::error::ArenaError;

/// Geometry of one node arena.
///
/// Fixed at tree construction. Two processes exchanging chunks must agree
/// on `chunk_capacity` and `coefficients_per_node`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Node slots per chunk.
    pub chunk_capacity: usize,
    /// Upper bound on slots ever handed out (the a-priori memory budget).
    pub max_slots: usize,
    /// `f64` values in one node's coefficient block.
    pub coefficients_per_node: usize,
    /// Children per node (`2^D`).
    pub branching_factor: usize,
    /// Size of the root group; zero for arenas that never hold roots.
    pub root_count: usize,
}

impl ArenaConfig {
    /// Configuration for an arena holding groups of `2^dimension` nodes.
    #[must_use]
    pub fn new(dimension: usize, chunk_capacity: usize, max_slots: usize) -> Self {
        Self {
            chunk_capacity,
            max_slots,
            coefficients_per_node: 1,
            branching_factor: 1 << dimension,
            root_count: 0,
        }
    }

    /// Set the coefficient block length.
    #[must_use]
    pub fn with_coefficients(mut self, coefficients_per_node: usize) -> Self {
        self.coefficients_per_node = coefficients_per_node;
        self
    }

    /// Set the root group size.
    #[must_use]
    pub fn with_roots(mut self, root_count: usize) -> Self {
        self.root_count = root_count;
        self
    }

    /// Check that every legal group fits in one chunk and in the budget.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.chunk_capacity == 0 {
            return Err(ArenaError::InvalidConfig(
                "chunk capacity must be positive".into(),
            ));
        }
        if self.coefficients_per_node == 0 {
            return Err(ArenaError::InvalidConfig(
                "coefficient block must hold at least one value".into(),
            ));
        }
        // Slot and coefficient handles store chunk and offset as u32.
        let chunk_values = self
            .chunk_capacity
            .checked_mul(self.coefficients_per_node)
            .and_then(|v| u32::try_from(v).ok());
        if chunk_values.is_none() {
            return Err(ArenaError::InvalidConfig(format!(
                "a chunk of {} nodes with {} values each exceeds the u32 offset range",
                self.chunk_capacity, self.coefficients_per_node
            )));
        }
        if u32::try_from(self.max_chunks()).is_err() {
            return Err(ArenaError::InvalidConfig(format!(
                "max slots {} need more than u32::MAX chunks",
                self.max_slots
            )));
        }
        let largest_group = self.branching_factor.max(self.root_count);
        if largest_group > self.chunk_capacity {
            return Err(ArenaError::InvalidConfig(format!(
                "chunk capacity {} cannot hold a group of {largest_group}",
                self.chunk_capacity
            )));
        }
        if self.root_count > self.max_slots {
            return Err(ArenaError::InvalidConfig(format!(
                "max slots {} below root count {}",
                self.max_slots, self.root_count
            )));
        }
        Ok(())
    }

    /// Number of slots in the group starting at `base`.
    ///
    /// Roots always occupy the first `root_count` slots, so any base inside
    /// that range names the root group.
    #[must_use]
    pub fn group_len(&self, base: usize) -> usize {
        if base < self.root_count {
            self.root_count
        } else {
            self.branching_factor
        }
    }

    /// Number of chunks needed to cover `max_slots`.
    #[must_use]
    pub fn max_chunks(&self) -> usize {
        self.max_slots.div_ceil(self.chunk_capacity)
    }
}
