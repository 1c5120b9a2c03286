//! Node records and the handles that point at them.
//!
//! Relational fields are stored twice: as serial indices, which survive a
//! byte copy into another process, and as resolved slot references, which
//! are derived from the indices and never serialized. A relocated chunk
//! carries only the former; the rebuild pass recomputes the latter.

use std::fmt;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::address::{NodeIndex, OrderingPath};

/// Stable slot identity inside one arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerialIndex(usize);

impl SerialIndex {
    /// Wrap a raw slot number.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Raw slot number.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Chunk holding this slot.
    #[must_use]
    pub const fn chunk(self, chunk_capacity: usize) -> usize {
        self.0 / chunk_capacity
    }

    /// Position inside its chunk.
    #[must_use]
    pub const fn offset(self, chunk_capacity: usize) -> usize {
        self.0 % chunk_capacity
    }

    /// Resolved location for a given chunk capacity.
    #[must_use]
    pub fn slot(self, chunk_capacity: usize) -> SlotRef {
        SlotRef::new(self.chunk(chunk_capacity), self.offset(chunk_capacity))
    }

    /// Index `n` slots further on.
    #[must_use]
    pub const fn add(self, n: usize) -> Self {
        Self(self.0 + n)
    }

    /// Index `n` slots further on, or `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, n: usize) -> Option<Self> {
        match self.0.checked_add(n) {
            Some(s) => Some(Self(s)),
            None => None,
        }
    }
}

impl fmt::Display for SerialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which arena a node lives in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Part of the durable adaptive grid.
    #[default]
    Persistent,
    /// Materialized on demand below the grid, freed soon after.
    Generated,
}

/// A node named by arena and serial index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef {
    /// Arena holding the node.
    pub kind: NodeKind,
    /// Slot in that arena.
    pub serial: SerialIndex,
}

impl NodeRef {
    /// Persistent node at `serial`.
    #[must_use]
    pub const fn persistent(serial: SerialIndex) -> Self {
        Self {
            kind: NodeKind::Persistent,
            serial,
        }
    }

    /// Generated node at `serial`.
    #[must_use]
    pub const fn generated(serial: SerialIndex) -> Self {
        Self {
            kind: NodeKind::Generated,
            serial,
        }
    }
}

/// Resolved (chunk, offset) location of a node record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotRef {
    /// Chunk index.
    pub chunk: u32,
    /// Slot inside the chunk.
    pub offset: u32,
}

impl SlotRef {
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn new(chunk: usize, offset: usize) -> Self {
        Self {
            chunk: chunk as u32,
            offset: offset as u32,
        }
    }

    /// Serial index this location corresponds to.
    #[must_use]
    pub fn serial(&self, chunk_capacity: usize) -> SerialIndex {
        SerialIndex::new(self.chunk as usize * chunk_capacity + self.offset as usize)
    }
}

/// Location of a node's coefficient block in the coefficient chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CoefficientHandle {
    /// Coefficient chunk index (same as the node chunk index).
    pub chunk: u32,
    /// First value of the block inside the chunk.
    pub offset: u32,
    /// Block length.
    pub len: u32,
}

impl CoefficientHandle {
    /// Handle for `serial` under the given geometry.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn for_serial(serial: SerialIndex, chunk_capacity: usize, block: usize) -> Self {
        Self {
            chunk: serial.chunk(chunk_capacity) as u32,
            offset: (serial.offset(chunk_capacity) * block) as u32,
            len: block as u32,
        }
    }
}

/// Identity of the tree owning a node, valid inside one process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(pub u64);

/// Status bits of a node.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeFlags(u8);

impl NodeFlags {
    /// Slot holds a live node.
    pub const ALLOCATED: Self = Self(1);
    /// Node has no children.
    pub const LEAF: Self = Self(1 << 1);
    /// Node is a leaf of the stored grid.
    pub const END_NODE: Self = Self(1 << 2);
    /// Node belongs to the root group.
    pub const ROOT: Self = Self(1 << 3);
    /// Coefficients have been written.
    pub const HAS_COEFS: Self = Self(1 << 4);
    /// Node lives in the generated arena.
    pub const GENERATED: Self = Self(1 << 5);

    /// No bits set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Whether every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for NodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(NodeFlags, &str); 6] = [
            (NodeFlags::ALLOCATED, "ALLOCATED"),
            (NodeFlags::LEAF, "LEAF"),
            (NodeFlags::END_NODE, "END_NODE"),
            (NodeFlags::ROOT, "ROOT"),
            (NodeFlags::HAS_COEFS, "HAS_COEFS"),
            (NodeFlags::GENERATED, "GENERATED"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "NodeFlags({})", set.join(" | "))
    }
}

/// Per-node lock used by callers for coefficient read-modify-write.
///
/// The arena constructs a fresh one whenever a slot is claimed or rebuilt.
/// Cloning yields a new, unlocked lock: locks never travel with a node.
#[derive(Default)]
pub struct NodeLock(Mutex<()>);

impl NodeLock {
    /// Unlocked lock.
    #[must_use]
    pub fn new() -> Self {
        Self(Mutex::new(()))
    }

    /// Block until the lock is held.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }

    /// Take the lock if it is free.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, ()>> {
        self.0.try_lock()
    }

    /// Whether some caller holds the lock.
    pub fn is_locked(&self) -> bool {
        self.0.is_locked()
    }
}

impl Clone for NodeLock {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl fmt::Debug for NodeLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// One cell of the hierarchical decomposition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRecord<const D: usize> {
    serial: Option<SerialIndex>,
    kind: NodeKind,
    index: NodeIndex<D>,
    path: OrderingPath,
    parent: Option<NodeRef>,
    first_child: Option<SerialIndex>,
    flags: NodeFlags,
    square_norm: f64,

    #[serde(skip)]
    owner: Option<TreeId>,
    #[serde(skip)]
    parent_slot: Option<SlotRef>,
    #[serde(skip)]
    child_slots: SmallVec<[SlotRef; 8]>,
    #[serde(skip)]
    coefficients: Option<CoefficientHandle>,
    #[serde(skip)]
    lock: NodeLock,
}

impl<const D: usize> Default for NodeRecord<D> {
    fn default() -> Self {
        Self {
            serial: None,
            kind: NodeKind::Persistent,
            index: NodeIndex::new(0, [0; D]),
            path: OrderingPath::root(),
            parent: None,
            first_child: None,
            flags: NodeFlags::empty(),
            square_norm: 0.0,
            owner: None,
            parent_slot: None,
            child_slots: SmallVec::new(),
            coefficients: None,
            lock: NodeLock::new(),
        }
    }
}

impl<const D: usize> NodeRecord<D> {
    /// Children per node.
    pub const BRANCHING: usize = 1 << D;

    /// Serial index, `None` for a vacant slot.
    pub fn serial(&self) -> Option<SerialIndex> {
        self.serial
    }

    /// Whether the slot holds a live node.
    pub fn is_in_use(&self) -> bool {
        self.serial.is_some()
    }

    /// Arena the node belongs to.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Scale and translation.
    pub fn index(&self) -> &NodeIndex<D> {
        &self.index
    }

    /// Dyadic scale.
    pub fn scale(&self) -> i32 {
        self.index.scale()
    }

    /// Traversal key.
    pub fn path(&self) -> OrderingPath {
        self.path
    }

    /// Parent by index, `None` for roots.
    pub fn parent(&self) -> Option<NodeRef> {
        self.parent
    }

    /// First child by index; children occupy `2^D` consecutive slots.
    pub fn first_child(&self) -> Option<SerialIndex> {
        self.first_child
    }

    /// Serial indices of all children.
    pub fn child_serials(&self) -> impl Iterator<Item = SerialIndex> {
        let first = self.first_child;
        (0..Self::BRANCHING).filter_map(move |i| first.and_then(|f| f.checked_add(i)))
    }

    /// Status bits.
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Whether a flag is set.
    pub fn has(&self, flag: NodeFlags) -> bool {
        self.flags.contains(flag)
    }

    /// Squared norm of the coefficient block.
    pub fn square_norm(&self) -> f64 {
        self.square_norm
    }

    /// Tree currently owning the node.
    pub fn owner(&self) -> Option<TreeId> {
        self.owner
    }

    /// Resolved parent location (persistent parents only).
    pub fn parent_slot(&self) -> Option<SlotRef> {
        self.parent_slot
    }

    /// Resolved child locations.
    pub fn child_slots(&self) -> &[SlotRef] {
        &self.child_slots
    }

    /// Resolved coefficient block.
    pub fn coefficient_handle(&self) -> Option<CoefficientHandle> {
        self.coefficients
    }

    /// Per-node lock.
    pub fn lock(&self) -> &NodeLock {
        &self.lock
    }

    /// Record the geometric address.
    pub fn set_address(&mut self, index: NodeIndex<D>, path: OrderingPath) {
        self.index = index;
        self.path = path;
    }

    /// Link to the parent by index.
    pub fn set_parent(&mut self, parent: Option<NodeRef>, chunk_capacity: usize) {
        self.parent = parent;
        self.resolve_parent(chunk_capacity);
    }

    /// Link to a child group by index; `None` detaches all children.
    pub fn set_first_child(&mut self, first: Option<SerialIndex>, chunk_capacity: usize) {
        self.first_child = first;
        self.resolve_children(chunk_capacity);
    }

    /// Set status bits.
    pub fn insert_flags(&mut self, flags: NodeFlags) {
        self.flags.insert(flags);
    }

    /// Clear status bits.
    pub fn remove_flags(&mut self, flags: NodeFlags) {
        self.flags.remove(flags);
    }

    /// Record the squared norm of the coefficients.
    pub fn set_square_norm(&mut self, square_norm: f64) {
        self.square_norm = square_norm;
    }

    /// Record the owning tree.
    pub fn set_owner(&mut self, owner: Option<TreeId>) {
        self.owner = owner;
    }

    /// Turn a vacant slot into a fresh live node.
    pub(crate) fn claim(&mut self, serial: SerialIndex, kind: NodeKind, handle: CoefficientHandle) {
        *self = Self {
            serial: Some(serial),
            kind,
            flags: match kind {
                NodeKind::Persistent => NodeFlags::ALLOCATED,
                NodeKind::Generated => NodeFlags::ALLOCATED | NodeFlags::GENERATED,
            },
            coefficients: Some(handle),
            ..Self::default()
        };
    }

    /// Return the slot to the vacant state.
    pub(crate) fn vacate(&mut self) {
        *self = Self::default();
    }

    /// Recompute every derived reference from the stored indices.
    ///
    /// Used after relocation; any transmitted reference is discarded.
    pub(crate) fn relink(&mut self, chunk_capacity: usize, handle: CoefficientHandle) {
        self.resolve_parent(chunk_capacity);
        self.resolve_children(chunk_capacity);
        self.coefficients = Some(handle);
        self.lock = NodeLock::new();
    }

    fn resolve_parent(&mut self, chunk_capacity: usize) {
        self.parent_slot = match self.parent {
            Some(parent) if parent.kind == self.kind => Some(parent.serial.slot(chunk_capacity)),
            _ => None,
        };
    }

    fn resolve_children(&mut self, chunk_capacity: usize) {
        self.child_slots.clear();
        if let Some(first) = self.first_child {
            self.child_slots
                .extend((0..Self::BRANCHING).map(|i| first.add(i).slot(chunk_capacity)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_serials_stop_at_overflow() {
        assert_eq!(SerialIndex::new(usize::MAX).checked_add(1), None);
        assert_eq!(SerialIndex::new(3).checked_add(4), Some(SerialIndex::new(7)));

        let mut node = NodeRecord::<2>::default();
        node.first_child = Some(SerialIndex::new(usize::MAX - 1));
        let children: Vec<_> = node.child_serials().collect();
        assert_eq!(
            children,
            [SerialIndex::new(usize::MAX - 1), SerialIndex::new(usize::MAX)]
        );
    }

    #[test]
    fn serial_splits_into_chunk_and_offset() {
        let s = SerialIndex::new(4861);
        assert_eq!(s.chunk(4854), 1);
        assert_eq!(s.offset(4854), 7);
        assert_eq!(s.slot(4854).serial(4854), s);
    }

    #[test]
    fn coefficient_handle_scales_offset_by_block() {
        let h = CoefficientHandle::for_serial(SerialIndex::new(70), 64, 16);
        assert_eq!(h.chunk, 1);
        assert_eq!(h.offset, 6 * 16);
        assert_eq!(h.len, 16);
    }

    #[test]
    fn flags_insert_and_remove() {
        let mut flags = NodeFlags::ALLOCATED | NodeFlags::LEAF;
        assert!(flags.contains(NodeFlags::LEAF));
        flags.remove(NodeFlags::LEAF);
        assert!(!flags.contains(NodeFlags::LEAF));
        assert!(flags.contains(NodeFlags::ALLOCATED));
        assert_eq!(format!("{flags:?}"), "NodeFlags(ALLOCATED)");
    }

    #[test]
    fn claim_resets_previous_occupant() {
        let mut node = NodeRecord::<3>::default();
        node.claim(
            SerialIndex::new(9),
            NodeKind::Persistent,
            CoefficientHandle::for_serial(SerialIndex::new(9), 64, 4),
        );
        node.insert_flags(NodeFlags::HAS_COEFS);
        node.set_square_norm(2.5);
        node.set_first_child(Some(SerialIndex::new(16)), 64);

        node.claim(
            SerialIndex::new(9),
            NodeKind::Generated,
            CoefficientHandle::for_serial(SerialIndex::new(9), 64, 4),
        );
        assert!(node.has(NodeFlags::GENERATED));
        assert!(!node.has(NodeFlags::HAS_COEFS));
        assert_eq!(node.square_norm(), 0.0);
        assert!(node.first_child().is_none());
        assert!(node.child_slots().is_empty());
    }

    #[test]
    fn children_resolve_across_chunk_boundary() {
        let mut node = NodeRecord::<1>::default();
        node.set_first_child(Some(SerialIndex::new(63)), 64);
        assert_eq!(
            node.child_slots(),
            &[SlotRef::new(0, 63), SlotRef::new(1, 0)]
        );
    }

    #[test]
    fn generated_child_of_persistent_parent_has_no_slot() {
        let mut node = NodeRecord::<2>::default();
        node.claim(
            SerialIndex::new(0),
            NodeKind::Generated,
            CoefficientHandle::for_serial(SerialIndex::new(0), 64, 1),
        );
        node.set_parent(Some(NodeRef::persistent(SerialIndex::new(5))), 64);
        assert_eq!(node.parent_slot(), None);
        node.set_parent(Some(NodeRef::generated(SerialIndex::new(5))), 64);
        assert_eq!(node.parent_slot(), Some(SlotRef::new(0, 5)));
    }

    #[test]
    fn serialization_drops_derived_references() {
        let mut node = NodeRecord::<2>::default();
        node.claim(
            SerialIndex::new(5),
            NodeKind::Persistent,
            CoefficientHandle::for_serial(SerialIndex::new(5), 64, 4),
        );
        node.set_parent(Some(NodeRef::persistent(SerialIndex::new(0))), 64);
        node.set_first_child(Some(SerialIndex::new(8)), 64);
        node.set_owner(Some(TreeId(7)));

        let json = serde_json::to_string(&node).unwrap();
        let back: NodeRecord<2> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.serial(), Some(SerialIndex::new(5)));
        assert_eq!(back.first_child(), Some(SerialIndex::new(8)));
        assert!(back.parent_slot().is_none());
        assert!(back.child_slots().is_empty());
        assert!(back.coefficient_handle().is_none());
        assert!(back.owner().is_none());
    }

    #[test]
    fn cloned_lock_is_fresh() {
        let node = NodeRecord::<3>::default();
        let _guard = node.lock().lock();
        let copy = node.clone();
        assert!(node.lock().is_locked());
        assert!(!copy.lock().is_locked());
    }
}
