//! Per-slot occupancy and the logical top of stack.
//!
//! Every slot at or above `top` is free. Slots below it are occupied or are
//! holes left by out-of-order releases; holes are only reused once the top
//! retracts past them.

use crate::error::ArenaError;
use crate::node::SerialIndex;

/// State of one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    /// Available.
    Free,
    /// Holds a live node.
    Occupied,
    /// Sentinel one past the budget; never handed out.
    OutOfBounds,
}

/// What a release found on its way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Release {
    /// Slots that were already free.
    pub anomalies: usize,
    /// Whether the top of stack moved down.
    pub retracted: bool,
}

/// Occupancy table plus top-of-stack counter.
#[derive(Clone, Debug)]
pub struct OccupancyStack {
    status: Vec<SlotStatus>,
    top: usize,
    live: usize,
}

impl OccupancyStack {
    /// All `max_slots` slots free, followed by the out-of-bounds sentinel.
    pub fn new(max_slots: usize) -> Self {
        let mut status = vec![SlotStatus::Free; max_slots + 1];
        status[max_slots] = SlotStatus::OutOfBounds;
        Self {
            status,
            top: 0,
            live: 0,
        }
    }

    /// Slot budget.
    pub fn max_slots(&self) -> usize {
        self.status.len() - 1
    }

    /// One past the highest slot that may be occupied.
    pub fn top(&self) -> usize {
        self.top
    }

    /// Number of occupied slots.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Status of `slot`; anything past the budget reads as out of bounds.
    pub fn status(&self, slot: usize) -> SlotStatus {
        self.status
            .get(slot)
            .copied()
            .unwrap_or(SlotStatus::OutOfBounds)
    }

    /// Mark `base..base + count` occupied and raise the top to its end.
    ///
    /// Nothing is modified if any slot in the range is unavailable.
    pub fn occupy(&mut self, base: usize, count: usize) -> Result<(), ArenaError> {
        let end = base + count;
        if end > self.max_slots() {
            return Err(ArenaError::CapacityExceeded {
                base,
                requested: count,
                max_slots: self.max_slots(),
            });
        }
        if let Some(taken) = (base..end).find(|&s| self.status[s] != SlotStatus::Free) {
            return Err(ArenaError::SlotOccupied(SerialIndex::new(taken)));
        }
        self.status[base..end].fill(SlotStatus::Occupied);
        self.live += count;
        self.top = self.top.max(end);
        Ok(())
    }

    /// Mark `base..base + count` free, retracting the top when the range
    /// reaches it.
    pub fn release(&mut self, base: usize, count: usize) -> Result<Release, ArenaError> {
        let end = base + count;
        if end > self.top {
            return Err(ArenaError::OutOfRange {
                base,
                end,
                top: self.top,
            });
        }
        let mut outcome = Release::default();
        for status in &mut self.status[base..end] {
            if *status == SlotStatus::Occupied {
                self.live -= 1;
            } else {
                outcome.anomalies += 1;
            }
            *status = SlotStatus::Free;
        }
        if end == self.top {
            self.retract();
            outcome.retracted = true;
        }
        Ok(outcome)
    }

    /// Move the top down past every trailing free slot.
    pub fn retract(&mut self) {
        while self.top > 0 && self.status[self.top - 1] == SlotStatus::Free {
            self.top -= 1;
        }
    }

    /// Forget all occupancy.
    pub fn clear(&mut self) {
        let max = self.max_slots();
        self.status[..max].fill(SlotStatus::Free);
        self.top = 0;
        self.live = 0;
    }

    /// Mark a single slot occupied during a rebuild.
    pub(crate) fn mark(&mut self, slot: usize) -> Result<(), ArenaError> {
        self.occupy(slot, 1)
    }
}
