//! The node allocator.
//!
//! [`NodeArena`] hands out groups of consecutive slots from the top of an
//! [`OccupancyStack`], backed by a [`ChunkTable`]. Two rules shape the
//! layout:
//!
//! - **No straddling.** A group that would cross a chunk boundary starts at
//!   the next chunk instead; the tail of the current chunk is skipped. All
//!   siblings therefore share a chunk.
//! - **Stack release.** Freed slots below the top stay holes until the top
//!   retracts to them. Coarsening mostly undoes refinement in reverse order,
//!   so the holes are short-lived.
//!
//! Running out of budget, reusing an occupied slot, and releasing outside
//! the occupied range are fatal: the plain operations abort, the `try_*`
//! operations return the [`ArenaError`].

use tracing::{debug, info, trace, warn};

use crate::chunk::ChunkTable;
use crate::config::ArenaConfig;
use crate::error::{fatal, ArenaError};
use crate::node::{CoefficientHandle, NodeKind, NodeRecord, SerialIndex};
use crate::occupancy::{OccupancyStack, Release};
use crate::stats::{ArenaStats, AtomicArenaStats};

/// Chunk count between growth summaries.
const GROWTH_REPORT_INTERVAL: usize = 100;

/// A freshly allocated group.
#[must_use]
pub struct Group<'a, const D: usize> {
    /// Serial index of the first slot.
    pub base: SerialIndex,
    /// The group's records, already claimed.
    pub nodes: &'a mut [NodeRecord<D>],
    /// The group's coefficient blocks, contiguous and zeroed.
    pub coefficients: &'a mut [f64],
}

/// Chunked slot allocator for one node lifetime class.
#[derive(Debug)]
pub struct NodeArena<const D: usize> {
    kind: NodeKind,
    config: ArenaConfig,
    stack: OccupancyStack,
    chunks: ChunkTable<D>,
    stats: AtomicArenaStats,
}

impl<const D: usize> NodeArena<D> {
    /// Create an empty arena. No chunk is allocated until the first group.
    pub fn new(kind: NodeKind, config: ArenaConfig) -> Result<Self, ArenaError> {
        if config.branching_factor != NodeRecord::<D>::BRANCHING {
            return Err(ArenaError::InvalidConfig(format!(
                "branching factor {} does not match dimension {D}",
                config.branching_factor
            )));
        }
        config.validate()?;
        Ok(Self {
            kind,
            stack: OccupancyStack::new(config.max_slots),
            chunks: ChunkTable::new(config.chunk_capacity, config.coefficients_per_node),
            config,
            stats: AtomicArenaStats::new(),
        })
    }

    /// Lifetime class of the nodes held here.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Arena geometry.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Top of stack: one past the highest possibly-occupied slot.
    pub fn top(&self) -> usize {
        self.stack.top()
    }

    /// Live node count.
    pub fn live(&self) -> usize {
        self.stack.live()
    }

    /// Slot budget.
    pub fn max_slots(&self) -> usize {
        self.config.max_slots
    }

    /// Occupancy table.
    pub fn occupancy(&self) -> &OccupancyStack {
        &self.stack
    }

    /// Backing chunks.
    pub fn chunks(&self) -> &ChunkTable<D> {
        &self.chunks
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ArenaStats {
        self.stats.snapshot()
    }

    /// Where a group of `count` would start: the current top, or the start
    /// of the next chunk if the group would not fit in the current one.
    pub fn placement(&self, count: usize) -> usize {
        let top = self.stack.top();
        let capacity = self.config.chunk_capacity;
        if top % capacity + count > capacity {
            top.next_multiple_of(capacity)
        } else {
            top
        }
    }

    /// Allocate `count` consecutive slots, aborting on any fatal condition.
    pub fn allocate_group(&mut self, count: usize) -> Group<'_, D> {
        match self.try_allocate_group(count) {
            Ok(group) => group,
            Err(err) => fatal(&err),
        }
    }

    /// Allocate `count` consecutive slots.
    ///
    /// `count` must be the branching factor, or the root count for the
    /// first allocation of an arena that holds roots.
    pub fn try_allocate_group(&mut self, count: usize) -> Result<Group<'_, D>, ArenaError> {
        self.check_group_size(count)?;

        let top = self.stack.top();
        let base = self.placement(count);
        if base + count > self.config.max_slots {
            return Err(ArenaError::CapacityExceeded {
                base,
                requested: count,
                max_slots: self.config.max_slots,
            });
        }

        let capacity = self.config.chunk_capacity;
        let added = self.chunks.ensure(base / capacity);
        if let Err(err) = self.stack.occupy(base, count) {
            warn!(kind = ?self.kind, base, count, error = %err, "Slot not available");
            return Err(err);
        }

        self.stats.record_allocation();
        if base > top {
            trace!(kind = ?self.kind, skipped = base - top, base, "Skipped chunk tail");
            self.stats.record_skipped(base - top);
        }
        if added > 0 {
            self.report_growth(added, base + count);
        }

        let kind = self.kind;
        let block = self.config.coefficients_per_node;
        let serial = SerialIndex::new(base);
        let (nodes, coefficients) = self.chunks.group_mut(serial, count);
        coefficients.fill(0.0);
        for (i, node) in nodes.iter_mut().enumerate() {
            let s = serial.add(i);
            node.claim(s, kind, CoefficientHandle::for_serial(s, capacity, block));
        }
        Ok(Group {
            base: serial,
            nodes,
            coefficients,
        })
    }

    /// Release the group starting at `base`, aborting on any fatal condition.
    pub fn deallocate_group(&mut self, base: SerialIndex) -> Release {
        match self.try_deallocate_group(base) {
            Ok(release) => release,
            Err(err) => fatal(&err),
        }
    }

    /// Release the group starting at `base`.
    ///
    /// The group length is implied: the root group for a base inside the
    /// root range, the branching factor otherwise. Slots that were already
    /// free are reported as anomalies, not errors.
    pub fn try_deallocate_group(&mut self, base: SerialIndex) -> Result<Release, ArenaError> {
        let count = self.config.group_len(base.get());
        let capacity = self.config.chunk_capacity;
        let is_root_group = base.get() < self.config.root_count;
        if (is_root_group && base.get() != 0) || base.offset(capacity) + count > capacity {
            return Err(ArenaError::Misaligned(base));
        }

        let release = self.stack.release(base.get(), count)?;
        if release.anomalies > 0 {
            warn!(
                kind = ?self.kind,
                base = base.get(),
                anomalies = release.anomalies,
                "Released slots were not occupied"
            );
            self.stats.record_anomalies(release.anomalies);
        }

        let (nodes, _) = self.chunks.group_mut(base, count);
        for node in nodes {
            node.vacate();
        }
        self.stats.record_release();
        Ok(release)
    }

    /// Release every node at once, keeping the chunks for reuse.
    pub fn clear(&mut self) {
        let top = self.stack.top();
        for (serial, node) in self.chunks.slots_mut() {
            if serial.get() >= top {
                break;
            }
            node.vacate();
        }
        self.stack.clear();
    }

    /// Live record at `serial`.
    pub fn node(&self, serial: SerialIndex) -> Option<&NodeRecord<D>> {
        self.chunks.node(serial).filter(|n| n.is_in_use())
    }

    /// Mutable live record at `serial`.
    pub fn node_mut(&mut self, serial: SerialIndex) -> Option<&mut NodeRecord<D>> {
        self.chunks.node_mut(serial).filter(|n| n.is_in_use())
    }

    /// Coefficient block of the live node at `serial`.
    pub fn coefficients(&self, serial: SerialIndex) -> Option<&[f64]> {
        let handle = self.node(serial)?.coefficient_handle()?;
        self.chunks.coefficients(handle)
    }

    /// Mutable coefficient block of the live node at `serial`.
    pub fn coefficients_mut(&mut self, serial: SerialIndex) -> Option<&mut [f64]> {
        let handle = self.node(serial)?.coefficient_handle()?;
        self.chunks.coefficients_mut(handle)
    }

    /// Record and coefficient block of the live node at `serial`.
    pub fn entry_mut(&mut self, serial: SerialIndex) -> Option<(&mut NodeRecord<D>, &mut [f64])> {
        self.node(serial)?;
        let (nodes, coefficients) = self.chunks.group_mut(serial, 1);
        Some((&mut nodes[0], coefficients))
    }

    /// Live nodes in serial order.
    pub fn iter(&self) -> impl Iterator<Item = &NodeRecord<D>> {
        let top = self.stack.top();
        self.chunks
            .slots()
            .take_while(move |(s, _)| s.get() < top)
            .map(|(_, n)| n)
            .filter(|n| n.is_in_use())
    }

    /// Copy of the chunk table, ready to hand to another process.
    pub fn export_chunks(&self) -> ChunkTable<D> {
        self.chunks.clone()
    }

    /// Replace all storage with relocated chunks.
    ///
    /// Prior state is discarded, not merged. Every in-use slot gets its
    /// references recomputed from its serial indices, a fresh lock and its
    /// coefficient handle; the occupancy stack is rebuilt from the in-use
    /// slots. `visit` sees each in-use record in index order after it has
    /// been relinked. Returns the number of live nodes.
    pub fn install_chunks<F>(&mut self, chunks: ChunkTable<D>, mut visit: F) -> Result<usize, ArenaError>
    where
        F: FnMut(&mut NodeRecord<D>),
    {
        self.validate_relocated(&chunks)?;

        let capacity = self.config.chunk_capacity;
        let block = self.config.coefficients_per_node;
        self.stack.clear();
        self.chunks = chunks;
        for (serial, node) in self.chunks.slots_mut() {
            if !node.is_in_use() {
                continue;
            }
            node.relink(capacity, CoefficientHandle::for_serial(serial, capacity, block));
            self.stack.mark(serial.get())?;
            visit(node);
        }
        debug!(
            kind = ?self.kind,
            chunks = self.chunks.len(),
            live = self.stack.live(),
            top = self.stack.top(),
            "Installed relocated chunks"
        );
        Ok(self.stack.live())
    }

    /// Check that `chunks` can be installed into this arena.
    ///
    /// Runs every check [`NodeArena::install_chunks`] makes, without
    /// touching the arena.
    pub fn validate_relocated(&self, chunks: &ChunkTable<D>) -> Result<(), ArenaError> {
        chunks.check_geometry(self.config.chunk_capacity, self.config.coefficients_per_node)?;
        let slot_count = chunks.slot_count();
        let in_table = |s: SerialIndex| s.get() < slot_count;
        for (position, node) in chunks.slots() {
            let Some(serial) = node.serial() else {
                continue;
            };
            if serial != position {
                return Err(ArenaError::CorruptChunk(format!(
                    "slot {position} records serial {serial}"
                )));
            }
            if serial.get() >= self.config.max_slots {
                return Err(ArenaError::CapacityExceeded {
                    base: serial.get(),
                    requested: 1,
                    max_slots: self.config.max_slots,
                });
            }
            if node.kind() != self.kind {
                return Err(ArenaError::CorruptChunk(format!(
                    "slot {position} holds a {:?} node",
                    node.kind()
                )));
            }
            let parent_ok = node
                .parent()
                .filter(|p| p.kind == self.kind)
                .map_or(true, |p| in_table(p.serial));
            let children_ok = node.child_serials().all(in_table);
            if !parent_ok || !children_ok {
                return Err(ArenaError::CorruptChunk(format!(
                    "slot {position} links outside the supplied chunks"
                )));
            }
        }
        Ok(())
    }

    fn check_group_size(&self, count: usize) -> Result<(), ArenaError> {
        let roots = self.config.root_count;
        let is_root_group = roots > 0 && count == roots && self.stack.top() == 0;
        if count == self.config.branching_factor || is_root_group {
            Ok(())
        } else {
            Err(ArenaError::InvalidGroupSize {
                count,
                branching: self.config.branching_factor,
                roots,
            })
        }
    }

    fn report_growth(&self, added: usize, top: usize) {
        self.stats.record_chunks(added);
        let chunks = self.chunks.len();
        debug!(kind = ?self.kind, chunks, top, "Appended node chunk");
        if chunks % GROWTH_REPORT_INTERVAL == 0 {
            info!(
                kind = ?self.kind,
                chunks,
                nodes = top,
                megabytes = self.chunks.memory_bytes() >> 20,
                "Arena growth"
            );
        }
    }
}
