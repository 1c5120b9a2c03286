//! Per-process tree registry.
//!
//! Issues tree identities and keeps count of live and created trees.
//! Tests construct their own context; everything else shares
//! [`ProcessContext::global`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use mwtree_arena::TreeId;
use parking_lot::Mutex;
use tracing::debug;

use crate::constants::TREE_REPORT_INTERVAL;

/// Process-wide tree bookkeeping.
#[derive(Debug)]
pub struct ProcessContext {
    rank: usize,
    next_id: AtomicU64,
    live: Mutex<BTreeSet<TreeId>>,
}

impl ProcessContext {
    /// Fresh context for the process with the given rank.
    pub fn new(rank: usize) -> Self {
        Self {
            rank,
            next_id: AtomicU64::new(0),
            live: Mutex::new(BTreeSet::new()),
        }
    }

    /// Lazily created context shared by the whole process (rank 0).
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ProcessContext>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new(0))))
    }

    /// Rank of this process in a distributed run.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Trees created so far.
    pub fn created_trees(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Trees not yet dropped.
    pub fn live_trees(&self) -> usize {
        self.live.lock().len()
    }

    /// Whether `id` names a live tree.
    pub fn is_live(&self, id: TreeId) -> bool {
        self.live.lock().contains(&id)
    }

    /// Issue an identity for a new tree.
    pub(crate) fn register(&self, dimension: usize, max_nodes: usize) -> TreeId {
        let id = TreeId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.live.lock().insert(id);
        let created = id.0 + 1;
        if self.rank == 0 && created % TREE_REPORT_INTERVAL == 1 {
            debug!(created, max_nodes, dimension, "Function trees created");
        }
        id
    }

    /// Forget a dropped tree; returns whether it was live.
    pub(crate) fn unregister(&self, id: TreeId) -> bool {
        self.live.lock().remove(&id)
    }
}

impl Default for ProcessContext {
    fn default() -> Self {
        Self::new(0)
    }
}
