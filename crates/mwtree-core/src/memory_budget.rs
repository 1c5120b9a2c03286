//! Memory footprint estimation and validation.

use std::mem::size_of;

use mwtree_arena::NodeRecord;
use serde::Serialize;

use crate::options::TreeOptions;

/// Worst-case memory of one tree's two arenas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArenaFootprint {
    /// Bytes per persistent node: record plus `2^D` blocks.
    pub node_bytes: usize,
    /// Bytes per generated node: record plus one block.
    pub gen_node_bytes: usize,
    /// Bytes per persistent chunk pair.
    pub chunk_bytes: usize,
    /// Bytes per generated chunk pair.
    pub gen_chunk_bytes: usize,
    /// Both arenas grown to their budgets, rounded up to whole chunks.
    pub total_bytes: usize,
}

impl ArenaFootprint {
    /// Estimate the footprint of a `D`-dimensional tree with `root_count`
    /// roots under `options`.
    #[must_use]
    pub fn estimate<const D: usize>(options: &TreeOptions, root_count: usize) -> Self {
        let options = options.clone().normalize();
        let record = size_of::<NodeRecord<D>>();
        let block = options.block_len(D) * size_of::<f64>();
        let node_bytes = record + (block << D);
        let gen_node_bytes = record + block;

        let capacity = options.chunk_capacity_for(D, root_count);
        let chunk_bytes = capacity * node_bytes;
        let gen_chunk_bytes = capacity * gen_node_bytes;
        let total_bytes = options.max_nodes.div_ceil(capacity) * chunk_bytes
            + options.max_gen_nodes.div_ceil(capacity) * gen_chunk_bytes;

        Self {
            node_bytes,
            gen_node_bytes,
            chunk_bytes,
            gen_chunk_bytes,
            total_bytes,
        }
    }

    /// Check if the arenas fit within the given memory limit.
    ///
    /// `None` means unlimited (always fits).
    #[must_use]
    pub fn fits_in(&self, limit: Option<usize>) -> bool {
        match limit {
            None => true,
            Some(l) => self.total_bytes <= l,
        }
    }

    /// Largest persistent budget whose arenas fit in `limit` bytes, given
    /// `max_gen_nodes` generated nodes alongside.
    #[must_use]
    pub fn max_nodes_for<const D: usize>(
        limit: usize,
        options: &TreeOptions,
        root_count: usize,
    ) -> usize {
        let per_chunk = Self::estimate::<D>(options, root_count);
        let capacity = options.chunk_capacity_for(D, root_count);
        if options.max_gen_nodes == 0 {
            // The generated budget follows the persistent one.
            return limit / (per_chunk.chunk_bytes + per_chunk.gen_chunk_bytes) * capacity;
        }
        let gen_bytes = options.max_gen_nodes.div_ceil(capacity) * per_chunk.gen_chunk_bytes;
        limit.saturating_sub(gen_bytes) / per_chunk.chunk_bytes * capacity
    }
}

/// Parse a memory limit string (e.g., "8G", "512M", "1024K").
///
/// # Errors
///
/// Returns an error string if the format is invalid or the number cannot be parsed.
pub fn parse_memory_limit(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(0);
    }

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('G') {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix('K') {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix('B') {
        (n, 1)
    } else {
        (s, 1)
    };

    let value: usize = num_str
        .trim()
        .parse()
        .map_err(|e| format!("invalid memory limit: {e}"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("memory limit {s} overflows"))
}
