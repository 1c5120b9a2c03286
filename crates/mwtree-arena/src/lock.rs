//! Coarse-grained lock around a whole arena.
//!
//! Concurrent tasks request generated children of different branches at the
//! same time. Every mutation of the shared bookkeeping (top of stack,
//! occupancy, chunk table) runs inside one critical section scoped to the
//! entire arena.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;

use crate::arena::NodeArena;
use crate::node::SerialIndex;
use crate::occupancy::Release;

/// Acquisition counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LockStats {
    /// Times the lock was taken.
    pub acquisitions: u64,
    /// Times a caller had to wait.
    pub contended: u64,
}

/// Mutual exclusion for arena bookkeeping.
#[derive(Debug, Default)]
pub struct ArenaLock<T> {
    inner: Mutex<T>,
    acquisitions: AtomicU64,
    contended: AtomicU64,
}

/// Generated-node arena shared between worker threads.
pub type SharedArena<const D: usize> = ArenaLock<NodeArena<D>>;

impl<T> ArenaLock<T> {
    /// Wrap `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            acquisitions: AtomicU64::new(0),
            contended: AtomicU64::new(0),
        }
    }

    /// Block until the arena is held.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let guard = if let Some(guard) = self.inner.try_lock() {
            guard
        } else {
            self.contended.fetch_add(1, Ordering::Relaxed);
            self.inner.lock()
        };
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        guard
    }

    /// Run `f` inside the critical section.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    /// Direct access when the caller already has exclusive ownership.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Unwrap the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
        }
    }
}

impl<const D: usize> ArenaLock<NodeArena<D>> {
    /// Allocate a group under the lock and return its base.
    pub fn allocate(&self, count: usize) -> SerialIndex {
        self.lock().allocate_group(count).base
    }

    /// Release a group under the lock.
    pub fn deallocate(&self, base: SerialIndex) -> Release {
        self.lock().deallocate_group(base)
    }

    /// Live node count.
    pub fn live(&self) -> usize {
        self.lock().live()
    }
}
