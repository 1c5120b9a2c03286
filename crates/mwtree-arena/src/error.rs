//! Arena error types.
//!
//! Most variants describe conditions the allocator treats as fatal: the
//! arena geometry is reserved up front and in-flight numerical work relies
//! on it. The `try_*` operations hand them back as values; everything else
//! routes them through [`fatal`].

use thiserror::Error;

use crate::node::SerialIndex;

/// Errors raised by arena operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
    /// The configured slot budget cannot hold the requested group.
    #[error("max slots exceeded: group of {requested} at {base} does not fit in {max_slots} slots")]
    CapacityExceeded {
        /// First slot the group would occupy.
        base: usize,
        /// Group size.
        requested: usize,
        /// Configured slot budget.
        max_slots: usize,
    },

    /// A slot chosen for allocation is already in use.
    #[error("slot {0} is already occupied")]
    SlotOccupied(SerialIndex),

    /// A release names slots outside the occupied range.
    #[error("release of slots {base}..{end} outside the occupied range 0..{top}")]
    OutOfRange {
        /// First slot of the release.
        base: usize,
        /// One past the last slot of the release.
        end: usize,
        /// Current top of stack.
        top: usize,
    },

    /// A group size that is neither the root count nor the branching factor.
    #[error("invalid group size {count}: expected {branching} (or {roots} for the root group)")]
    InvalidGroupSize {
        /// Requested size.
        count: usize,
        /// Branching factor of the arena.
        branching: usize,
        /// Root group size of the arena.
        roots: usize,
    },

    /// A release whose base does not start a group inside one chunk.
    #[error("release base {0} does not start a group")]
    Misaligned(SerialIndex),

    /// Rejected configuration.
    #[error("invalid arena configuration: {0}")]
    InvalidConfig(String),

    /// A received chunk whose records contradict their positions.
    #[error("corrupt chunk data: {0}")]
    CorruptChunk(String),
}

/// Log a fatal arena error and abort the current operation.
///
/// The release profile is built with `panic = "abort"`, so in production
/// this terminates the process.
#[cold]
#[track_caller]
pub fn fatal(err: &ArenaError) -> ! {
    tracing::error!(error = %err, "fatal arena error");
    panic!("fatal arena error: {err}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_message_names_budget() {
        let err = ArenaError::CapacityExceeded {
            base: 9,
            requested: 8,
            max_slots: 10,
        };
        assert_eq!(
            err.to_string(),
            "max slots exceeded: group of 8 at 9 does not fit in 10 slots"
        );
    }

    #[test]
    fn out_of_range_message() {
        let err = ArenaError::OutOfRange {
            base: 16,
            end: 24,
            top: 9,
        };
        assert!(err.to_string().contains("16..24"));
    }

    #[test]
    #[should_panic(expected = "fatal arena error")]
    fn fatal_panics() {
        fatal(&ArenaError::SlotOccupied(SerialIndex::new(3)));
    }
}
