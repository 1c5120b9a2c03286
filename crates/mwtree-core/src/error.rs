//! Tree-level errors.

use mwtree_arena::{ArenaError, NodeRef, SerialIndex};
use thiserror::Error;

/// Errors raised by tree operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// An arena rejected its configuration or an operation.
    #[error(transparent)]
    Arena(#[from] ArenaError),

    /// No live node at the given reference.
    #[error("no live {:?} node at {}", .0.kind, .0.serial)]
    UnknownNode(NodeRef),

    /// Refinement of a node that already has children.
    #[error("node {0} already has children")]
    AlreadyRefined(SerialIndex),

    /// A coefficient vector of the wrong length.
    #[error("expected {expected} coefficients, got {actual}")]
    CoefficientLength {
        /// Block length of the target node.
        expected: usize,
        /// Length supplied.
        actual: usize,
    },

    /// Received chunks that cannot be installed into this tree.
    #[error("relocation failed: {0}")]
    Relocation(String),

    /// Invalid tree options or bounding box.
    #[error("configuration error: {0}")]
    Config(String),
}
