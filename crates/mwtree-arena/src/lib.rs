//! # mwtree-arena
//!
//! Node storage for adaptive 2^D-ary trees of multiwavelet coefficients.
//!
//! A [`NodeArena`] owns fixed-capacity chunks of node records plus a
//! parallel table of coefficient chunks, and hands out groups of
//! consecutive slots from the top of an occupancy stack. A tree keeps two
//! of them: one for the persistent grid, one (behind an [`ArenaLock`]) for
//! transient generated nodes.
//!
//! Nodes refer to each other by [`SerialIndex`]. Resolved slot references
//! are derived data; after a [`ChunkTable`] is moved into another process
//! they are recomputed by [`NodeArena::install_chunks`].
#![warn(missing_docs)]

pub mod address;
pub mod arena;
pub mod chunk;
pub mod config;
pub mod error;
pub mod lock;
pub mod node;
pub mod occupancy;
pub mod stats;

pub use address::{NodeIndex, OrderingPath};
pub use arena::{Group, NodeArena};
pub use chunk::ChunkTable;
pub use config::ArenaConfig;
pub use error::{fatal, ArenaError};
pub use lock::{ArenaLock, LockStats, SharedArena};
pub use node::{
    CoefficientHandle, NodeFlags, NodeKind, NodeLock, NodeRecord, NodeRef, SerialIndex, SlotRef,
    TreeId,
};
pub use occupancy::{OccupancyStack, Release, SlotStatus};
pub use stats::{ArenaStats, AtomicArenaStats};
