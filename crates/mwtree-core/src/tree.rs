//! Function trees.
//!
//! A [`FunctionTree`] owns two arenas. The persistent arena holds the
//! adaptive grid and is only mutated through `&mut self`, so refinement and
//! coarsening of one tree are exclusive by construction. The generated arena
//! sits behind an [`ArenaLock`] and is shared by worker threads through
//! `&self`.

use std::sync::Arc;

use mwtree_arena::{
    ArenaError, ArenaLock, ArenaStats, ChunkTable, LockStats, NodeArena, NodeFlags, NodeIndex,
    NodeKind, NodeRecord, NodeRef, OrderingPath, SerialIndex, SharedArena, TreeId,
};
use serde::Serialize;
use tracing::debug;

use crate::context::ProcessContext;
use crate::error::TreeError;
use crate::options::{BoundingBox, TreeOptions};

/// Allocator state of one tree, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TreeStats {
    /// Live persistent nodes.
    pub nodes: usize,
    /// Live generated nodes.
    pub gen_nodes: usize,
    /// Persistent node budget.
    pub max_nodes: usize,
    /// Generated node budget.
    pub max_gen_nodes: usize,
    /// Persistent chunk pairs.
    pub chunks: usize,
    /// Generated chunk pairs.
    pub gen_chunks: usize,
    /// Nodes per chunk.
    pub chunk_capacity: usize,
    /// Bytes held by both chunk tables.
    pub memory_bytes: usize,
    /// Persistent nodes per depth below the roots.
    pub depth_counts: Vec<usize>,
    /// Persistent arena counters.
    pub persistent: ArenaStats,
    /// Generated arena counters.
    pub generated: ArenaStats,
    /// Generated arena lock counters.
    pub lock: LockStats,
}

/// An adaptive 2^D-ary tree of coefficient blocks.
pub struct FunctionTree<const D: usize> {
    pub(crate) id: TreeId,
    pub(crate) context: Arc<ProcessContext>,
    pub(crate) bbox: BoundingBox<D>,
    pub(crate) options: TreeOptions,
    pub(crate) persistent: NodeArena<D>,
    pub(crate) generated: SharedArena<D>,
    pub(crate) roots: Vec<SerialIndex>,
    pub(crate) depth_counts: Vec<usize>,
    pub(crate) square_norm: f64,
    pub(crate) end_nodes: Vec<SerialIndex>,
}

impl<const D: usize> FunctionTree<D> {
    /// Children per node.
    pub const BRANCHING: usize = 1 << D;

    /// Build a tree and allocate its root group.
    pub fn new(
        context: Arc<ProcessContext>,
        bbox: BoundingBox<D>,
        options: TreeOptions,
    ) -> Result<Self, TreeError> {
        let mut tree = Self::empty(context, bbox, options)?;
        tree.alloc_roots();
        Ok(tree)
    }

    /// Build a tree from chunks received from another process.
    ///
    /// Sender and receiver must agree on bounding box and options.
    pub fn from_chunks(
        context: Arc<ProcessContext>,
        bbox: BoundingBox<D>,
        options: TreeOptions,
        chunks: ChunkTable<D>,
    ) -> Result<Self, TreeError> {
        let mut tree = Self::empty(context, bbox, options)?;
        tree.rebuild(chunks)?;
        Ok(tree)
    }

    /// Tree with both arenas set up and no nodes.
    pub(crate) fn empty(
        context: Arc<ProcessContext>,
        bbox: BoundingBox<D>,
        options: TreeOptions,
    ) -> Result<Self, TreeError> {
        let options = options.normalize();
        let (persistent, generated) = options.arena_configs(D, bbox.root_count());
        let persistent = NodeArena::new(NodeKind::Persistent, persistent)?;
        let generated = ArenaLock::new(NodeArena::new(NodeKind::Generated, generated)?);
        let id = context.register(D, options.max_nodes);
        Ok(Self {
            id,
            context,
            bbox,
            options,
            persistent,
            generated,
            roots: Vec::new(),
            depth_counts: Vec::new(),
            square_norm: 0.0,
            end_nodes: Vec::new(),
        })
    }

    fn alloc_roots(&mut self) {
        let count = self.bbox.root_count();
        let capacity = self.chunk_capacity();
        let group = self.persistent.allocate_group(count);
        let base = group.base;
        for (i, node) in group.nodes.iter_mut().enumerate() {
            node.set_address(self.bbox.root_index(i), OrderingPath::root());
            node.set_parent(None, capacity);
            node.insert_flags(NodeFlags::ROOT | NodeFlags::LEAF | NodeFlags::END_NODE);
            node.set_owner(Some(self.id));
        }
        self.roots = (0..count).map(|i| base.add(i)).collect();
        self.depth_counts = vec![count];
        self.end_nodes.clone_from(&self.roots);
    }

    /// Refine a persistent node; returns the first child's serial index.
    ///
    /// Aborts if the persistent budget is exhausted.
    pub fn alloc_children(&mut self, parent: SerialIndex) -> Result<SerialIndex, TreeError> {
        let capacity = self.chunk_capacity();
        let node = self
            .persistent
            .node(parent)
            .ok_or(TreeError::UnknownNode(NodeRef::persistent(parent)))?;
        if node.first_child().is_some() {
            return Err(TreeError::AlreadyRefined(parent));
        }
        let (index, path) = (*node.index(), node.path());

        let group = self.persistent.allocate_group(Self::BRANCHING);
        let base = group.base;
        init_children(
            group.nodes,
            &index,
            path,
            NodeRef::persistent(parent),
            capacity,
            self.id,
            NodeFlags::LEAF | NodeFlags::END_NODE,
        );

        if let Some(node) = self.persistent.node_mut(parent) {
            node.set_first_child(Some(base), capacity);
            node.remove_flags(NodeFlags::LEAF | NodeFlags::END_NODE);
        }
        let depth = path.depth() as usize + 1;
        if self.depth_counts.len() <= depth {
            self.depth_counts.resize(depth + 1, 0);
        }
        self.depth_counts[depth] += Self::BRANCHING;
        Ok(base)
    }

    /// Coarsen a persistent node, releasing its whole subtree.
    ///
    /// Deeper groups are released first and siblings in reverse order, so
    /// undoing a refinement sequence walks the stack back down.
    pub fn delete_children(&mut self, parent: SerialIndex) -> Result<(), TreeError> {
        let node = self
            .persistent
            .node(parent)
            .ok_or(TreeError::UnknownNode(NodeRef::persistent(parent)))?;
        let Some(first) = node.first_child() else {
            return Ok(());
        };
        let depth = node.path().depth() as usize + 1;
        self.release_subtree(first, depth);

        let capacity = self.chunk_capacity();
        if let Some(node) = self.persistent.node_mut(parent) {
            node.set_first_child(None, capacity);
            node.insert_flags(NodeFlags::LEAF | NodeFlags::END_NODE);
        }
        while self.depth_counts.last() == Some(&0) {
            self.depth_counts.pop();
        }
        Ok(())
    }

    fn release_subtree(&mut self, first: SerialIndex, depth: usize) {
        for i in (0..Self::BRANCHING).rev() {
            let grandchildren = self
                .persistent
                .node(first.add(i))
                .and_then(NodeRecord::first_child);
            if let Some(g) = grandchildren {
                self.release_subtree(g, depth + 1);
            }
        }
        self.persistent.deallocate_group(first);
        if let Some(count) = self.depth_counts.get_mut(depth) {
            *count = count.saturating_sub(Self::BRANCHING);
        }
    }

    /// Materialize generated children below `parent`.
    ///
    /// A persistent parent is left untouched: the returned base is the only
    /// handle to the group. A generated parent records its first child.
    /// Aborts if the generated budget is exhausted.
    pub fn alloc_gen_children(&self, parent: NodeRef) -> Result<SerialIndex, TreeError> {
        let persistent_parent = match parent.kind {
            NodeKind::Persistent => {
                let node = self
                    .persistent
                    .node(parent.serial)
                    .ok_or(TreeError::UnknownNode(parent))?;
                Some((*node.index(), node.path()))
            }
            NodeKind::Generated => None,
        };

        let mut arena = self.generated.lock();
        let capacity = arena.config().chunk_capacity;
        let (index, path) = match persistent_parent {
            Some(address) => address,
            None => {
                let node = arena
                    .node(parent.serial)
                    .ok_or(TreeError::UnknownNode(parent))?;
                if node.first_child().is_some() {
                    return Err(TreeError::AlreadyRefined(parent.serial));
                }
                (*node.index(), node.path())
            }
        };

        let group = arena.allocate_group(Self::BRANCHING);
        let base = group.base;
        init_children(
            group.nodes,
            &index,
            path,
            parent,
            capacity,
            self.id,
            NodeFlags::LEAF,
        );
        if parent.kind == NodeKind::Generated {
            if let Some(node) = arena.node_mut(parent.serial) {
                node.set_first_child(Some(base), capacity);
                node.remove_flags(NodeFlags::LEAF);
            }
        }
        Ok(base)
    }

    /// Release a generated group and everything generated below it.
    pub fn delete_gen_children(&self, base: SerialIndex) -> Result<(), TreeError> {
        let mut arena = self.generated.lock();
        let node = arena
            .node(base)
            .ok_or(TreeError::UnknownNode(NodeRef::generated(base)))?;
        if node.index().child_position() != 0 {
            return Err(ArenaError::Misaligned(base).into());
        }
        let parent = node.parent();

        release_generated(&mut arena, base);
        let capacity = arena.config().chunk_capacity;
        if let Some(parent) = parent.filter(|p| p.kind == NodeKind::Generated) {
            if let Some(node) = arena.node_mut(parent.serial) {
                node.set_first_child(None, capacity);
                node.insert_flags(NodeFlags::LEAF);
            }
        }
        Ok(())
    }

    /// Drop every generated node at once; returns how many were live.
    pub fn delete_generated(&self) -> usize {
        let mut arena = self.generated.lock();
        let released = arena.live();
        arena.clear();
        debug!(tree = self.id.0, released, "Dropped generated nodes");
        released
    }

    /// Copy `values` into a node's coefficient block; returns its squared
    /// norm.
    pub fn set_coefficients(&mut self, node: NodeRef, values: &[f64]) -> Result<f64, TreeError> {
        match node.kind {
            NodeKind::Persistent => write_coefficients(&mut self.persistent, node, values),
            NodeKind::Generated => write_coefficients(self.generated.get_mut(), node, values),
        }
    }

    /// Copy `values` into a generated node's block from a shared reference.
    pub fn set_gen_coefficients(&self, serial: SerialIndex, values: &[f64]) -> Result<f64, TreeError> {
        let mut arena = self.generated.lock();
        write_coefficients(&mut arena, NodeRef::generated(serial), values)
    }

    /// Coefficient block of a persistent node.
    pub fn coefficients(&self, serial: SerialIndex) -> Option<&[f64]> {
        self.persistent.coefficients(serial)
    }

    /// Copy of a generated node's coefficient block.
    pub fn gen_coefficients(&self, serial: SerialIndex) -> Option<Vec<f64>> {
        self.generated.lock().coefficients(serial).map(<[f64]>::to_vec)
    }

    /// Identity of this tree inside its process.
    pub fn id(&self) -> TreeId {
        self.id
    }

    /// Registry the tree belongs to.
    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.context
    }

    /// Root decomposition.
    pub fn bounding_box(&self) -> &BoundingBox<D> {
        &self.bbox
    }

    /// Normalized construction options.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Live persistent node at `serial`.
    pub fn node(&self, serial: SerialIndex) -> Option<&NodeRecord<D>> {
        self.persistent.node(serial)
    }

    /// Snapshot of the live generated node at `serial`.
    pub fn gen_node(&self, serial: SerialIndex) -> Option<NodeRecord<D>> {
        self.generated.lock().node(serial).cloned()
    }

    /// Children of a persistent node, through its resolved references.
    pub fn children(&self, serial: SerialIndex) -> impl Iterator<Item = &NodeRecord<D>> + '_ {
        let chunks = self.persistent.chunks();
        self.persistent
            .node(serial)
            .into_iter()
            .flat_map(|node| node.child_slots().iter())
            .filter_map(move |slot| chunks.node_at(*slot))
    }

    /// Parent of a persistent node, through its resolved reference.
    pub fn parent(&self, serial: SerialIndex) -> Option<&NodeRecord<D>> {
        let slot = self.persistent.node(serial)?.parent_slot()?;
        self.persistent.chunks().node_at(slot)
    }

    /// Serial indices of the root group.
    pub fn roots(&self) -> &[SerialIndex] {
        &self.roots
    }

    /// Live persistent nodes.
    pub fn node_count(&self) -> usize {
        self.persistent.live()
    }

    /// Live generated nodes.
    pub fn gen_node_count(&self) -> usize {
        self.generated.live()
    }

    /// Persistent nodes `depth` levels below the roots.
    pub fn nodes_at_depth(&self, depth: usize) -> usize {
        self.depth_counts.get(depth).copied().unwrap_or(0)
    }

    /// Persistent nodes per depth, roots first.
    pub fn depth_histogram(&self) -> &[usize] {
        &self.depth_counts
    }

    /// Deepest populated level.
    pub fn depth(&self) -> usize {
        self.depth_counts.len().saturating_sub(1)
    }

    /// Squared norm accumulated over end nodes at the last rebuild or
    /// [`FunctionTree::calc_square_norm`].
    pub fn square_norm(&self) -> f64 {
        self.square_norm
    }

    /// Recompute the squared norm from the current end nodes.
    pub fn calc_square_norm(&mut self) -> f64 {
        self.square_norm = self
            .persistent
            .iter()
            .filter(|n| n.has(NodeFlags::END_NODE))
            .map(NodeRecord::square_norm)
            .sum();
        self.square_norm
    }

    /// End nodes in traversal order, as of the last reset.
    pub fn end_node_table(&self) -> &[SerialIndex] {
        &self.end_nodes
    }

    /// Regenerate the end-node table by walking down from the roots.
    pub fn reset_end_node_table(&mut self) {
        let capacity = self.chunk_capacity();
        let mut table = Vec::new();
        let mut pending: Vec<SerialIndex> = self.roots.iter().rev().copied().collect();
        while let Some(serial) = pending.pop() {
            let Some(node) = self.persistent.node(serial) else {
                continue;
            };
            if node.child_slots().is_empty() {
                table.push(serial);
            } else {
                pending.extend(node.child_slots().iter().rev().map(|s| s.serial(capacity)));
            }
        }
        self.end_nodes = table;
    }

    /// Nodes per chunk in both arenas.
    pub fn chunk_capacity(&self) -> usize {
        self.persistent.config().chunk_capacity
    }

    /// Persistent chunk pairs.
    pub fn chunk_count(&self) -> usize {
        self.persistent.chunks().len()
    }

    /// Generated chunk pairs.
    pub fn gen_chunk_count(&self) -> usize {
        self.generated.lock().chunks().len()
    }

    /// Persistent node budget.
    pub fn max_nodes(&self) -> usize {
        self.persistent.max_slots()
    }

    /// Generated node budget.
    pub fn max_gen_nodes(&self) -> usize {
        self.generated.lock().max_slots()
    }

    /// Persistent arena, read-only.
    pub fn persistent_arena(&self) -> &NodeArena<D> {
        &self.persistent
    }

    /// Generated arena and its lock.
    pub fn generated_arena(&self) -> &SharedArena<D> {
        &self.generated
    }

    /// Allocator state snapshot.
    pub fn stats(&self) -> TreeStats {
        let lock = self.generated.stats();
        let arena = self.generated.lock();
        TreeStats {
            nodes: self.persistent.live(),
            gen_nodes: arena.live(),
            max_nodes: self.persistent.max_slots(),
            max_gen_nodes: arena.max_slots(),
            chunks: self.persistent.chunks().len(),
            gen_chunks: arena.chunks().len(),
            chunk_capacity: self.chunk_capacity(),
            memory_bytes: self.persistent.chunks().memory_bytes() + arena.chunks().memory_bytes(),
            depth_counts: self.depth_counts.clone(),
            persistent: self.persistent.stats(),
            generated: arena.stats(),
            lock,
        }
    }

    /// Persistent chunks, ready to send to another process.
    pub fn export_chunks(&self) -> ChunkTable<D> {
        self.persistent.export_chunks()
    }
}

impl<const D: usize> Drop for FunctionTree<D> {
    fn drop(&mut self) {
        self.context.unregister(self.id);
    }
}

fn init_children<const D: usize>(
    nodes: &mut [NodeRecord<D>],
    parent_index: &NodeIndex<D>,
    parent_path: OrderingPath,
    parent: NodeRef,
    capacity: usize,
    owner: TreeId,
    flags: NodeFlags,
) {
    for (i, child) in nodes.iter_mut().enumerate() {
        child.set_address(parent_index.child(i), parent_path.child(i, D));
        child.set_parent(Some(parent), capacity);
        child.insert_flags(flags);
        child.set_owner(Some(owner));
    }
}

fn release_generated<const D: usize>(arena: &mut NodeArena<D>, first: SerialIndex) {
    for i in (0..NodeRecord::<D>::BRANCHING).rev() {
        if let Some(g) = arena.node(first.add(i)).and_then(NodeRecord::first_child) {
            release_generated(arena, g);
        }
    }
    arena.deallocate_group(first);
}

fn write_coefficients<const D: usize>(
    arena: &mut NodeArena<D>,
    node: NodeRef,
    values: &[f64],
) -> Result<f64, TreeError> {
    let (record, block) = arena
        .entry_mut(node.serial)
        .ok_or(TreeError::UnknownNode(node))?;
    if block.len() != values.len() {
        return Err(TreeError::CoefficientLength {
            expected: block.len(),
            actual: values.len(),
        });
    }
    block.copy_from_slice(values);
    let square_norm = values.iter().map(|v| v * v).sum();
    record.set_square_norm(square_norm);
    record.insert_flags(NodeFlags::HAS_COEFS);
    Ok(square_norm)
}
