//! # mwtree-core
//!
//! Adaptive 2^D-ary function trees built on `mwtree-arena`.
//!
//! A [`FunctionTree`] owns a persistent arena for the adaptive grid and a
//! lock-guarded generated arena for transient nodes. Its persistent chunks
//! can be exported, shipped to another process and installed there with
//! [`TopologyRebuilder`].

pub mod constants;
pub mod context;
pub mod error;
pub mod memory_budget;
pub mod options;
pub mod rebuild;
pub mod tree;

// Re-exports
pub use constants::{exit_codes, DEFAULT_MAX_NODES, DEFAULT_ORDER};
pub use context::ProcessContext;
pub use error::TreeError;
pub use memory_budget::{parse_memory_limit, ArenaFootprint};
pub use options::{BoundingBox, TreeOptions};
pub use rebuild::{RebuildReport, TopologyRebuilder};
pub use tree::{FunctionTree, TreeStats};
