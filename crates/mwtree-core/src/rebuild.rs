//! Topology rebuild after chunk relocation.
//!
//! Received chunks carry serial indices only. Rebuilding recomputes every
//! derived reference from them, rebuilds the occupancy stack, and refolds
//! the tree-level aggregates. Prior tree state is replaced, never merged.

use mwtree_arena::{ChunkTable, NodeFlags, NodeKind, NodeRecord, NodeRef, OrderingPath, SerialIndex};
use serde::Serialize;
use tracing::debug;

use crate::error::TreeError;
use crate::tree::FunctionTree;

/// Summary of one rebuild.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebuildReport {
    /// Live nodes installed.
    pub nodes: usize,
    /// Chunk pairs installed.
    pub chunks: usize,
    /// Entries in the regenerated end-node table.
    pub end_nodes: usize,
    /// Squared norm accumulated over end nodes.
    pub square_norm: f64,
    /// Generated nodes dropped.
    pub dropped_gen_nodes: usize,
}

/// Installs a received chunk set into a tree.
///
/// Consumes itself and the chunk set, so each set is rebuilt exactly once.
pub struct TopologyRebuilder<'a, const D: usize> {
    tree: &'a mut FunctionTree<D>,
}

impl<'a, const D: usize> TopologyRebuilder<'a, D> {
    /// Rebuilder targeting `tree`.
    pub fn new(tree: &'a mut FunctionTree<D>) -> Self {
        Self { tree }
    }

    /// Validate `chunks` and make them the tree's persistent storage.
    ///
    /// Every check runs before the tree is touched; on error the tree is
    /// unchanged.
    pub fn rebuild(self, chunks: ChunkTable<D>) -> Result<RebuildReport, TreeError> {
        let tree = self.tree;
        let root_count = tree.bbox.root_count();
        tree.persistent
            .validate_relocated(&chunks)
            .map_err(relocation)?;
        check_roots(&chunks, root_count)?;
        check_links(&chunks)?;

        let dropped_gen_nodes = {
            let generated = tree.generated.get_mut();
            let live = generated.live();
            generated.clear();
            live
        };

        let owner = tree.id;
        let mut depth_counts: Vec<usize> = Vec::new();
        let mut square_norm = 0.0;
        let nodes = tree
            .persistent
            .install_chunks(chunks, |node| {
                node.set_owner(Some(owner));
                let depth = node.path().depth() as usize;
                if depth_counts.len() <= depth {
                    depth_counts.resize(depth + 1, 0);
                }
                depth_counts[depth] += 1;
                if node.has(NodeFlags::END_NODE) {
                    square_norm += node.square_norm();
                }
            })
            .map_err(relocation)?;

        tree.roots = (0..root_count).map(SerialIndex::new).collect();
        tree.depth_counts = depth_counts;
        tree.square_norm = square_norm;
        tree.reset_end_node_table();

        let report = RebuildReport {
            nodes,
            chunks: tree.persistent.chunks().len(),
            end_nodes: tree.end_nodes.len(),
            square_norm,
            dropped_gen_nodes,
        };
        debug!(
            tree = tree.id.0,
            nodes = report.nodes,
            chunks = report.chunks,
            end_nodes = report.end_nodes,
            "Rebuilt tree topology"
        );
        Ok(report)
    }
}

impl<const D: usize> FunctionTree<D> {
    /// Replace the persistent grid with relocated chunks.
    pub fn rebuild(&mut self, chunks: ChunkTable<D>) -> Result<RebuildReport, TreeError> {
        TopologyRebuilder::new(self).rebuild(chunks)
    }
}

fn relocation(err: impl std::fmt::Display) -> TreeError {
    TreeError::Relocation(err.to_string())
}

/// Roots are exactly the first `root_count` slots of chunk 0.
fn check_roots<const D: usize>(chunks: &ChunkTable<D>, root_count: usize) -> Result<(), TreeError> {
    let stray = chunks
        .slots()
        .find(|(s, n)| s.get() >= root_count && n.is_in_use() && n.has(NodeFlags::ROOT));
    if let Some((serial, _)) = stray {
        return Err(TreeError::Relocation(format!(
            "unexpected root at slot {serial}, expected {root_count} roots"
        )));
    }
    for serial in (0..root_count).map(SerialIndex::new) {
        let root = chunks
            .node(serial)
            .filter(|n| n.is_in_use())
            .ok_or_else(|| TreeError::Relocation(format!("root slot {serial} is empty")))?;
        if !root.has(NodeFlags::ROOT) || root.parent().is_some() || root.path() != OrderingPath::root() {
            return Err(TreeError::Relocation(format!(
                "slot {serial} is not a root"
            )));
        }
    }
    Ok(())
}

/// Every stored parent and child link must agree with its counterpart.
fn check_links<const D: usize>(chunks: &ChunkTable<D>) -> Result<(), TreeError> {
    let branching = NodeRecord::<D>::BRANCHING;
    let live = |s: SerialIndex| chunks.node(s).filter(|n| n.is_in_use());
    for (serial, node) in chunks.slots().filter(|(_, n)| n.is_in_use()) {
        for (position, child) in node.child_serials().enumerate() {
            let Some(record) = live(child).filter(|c| c.parent() == Some(NodeRef::persistent(serial)))
            else {
                return Err(TreeError::Relocation(format!(
                    "child {child} of {serial} does not point back"
                )));
            };
            let expected = node
                .index()
                .checked_child(position)
                .zip(node.path().checked_child(position, D));
            let Some((index, path)) = expected else {
                return Err(TreeError::Relocation(format!(
                    "address of {serial} has no room for children"
                )));
            };
            if *record.index() != index || record.path() != path {
                return Err(TreeError::Relocation(format!(
                    "child {child} of {serial} has the wrong address"
                )));
            }
        }
        match node.parent() {
            Some(parent) if parent.kind == NodeKind::Persistent => {
                let first = live(parent.serial).and_then(NodeRecord::first_child);
                let owns = first.is_some_and(|f| {
                    f.get()
                        .checked_add(branching)
                        .is_some_and(|end| (f.get()..end).contains(&serial.get()))
                });
                if !owns {
                    return Err(TreeError::Relocation(format!(
                        "parent {} does not list {serial} as a child",
                        parent.serial
                    )));
                }
            }
            Some(parent) => {
                return Err(TreeError::Relocation(format!(
                    "persistent node {serial} has generated parent {}",
                    parent.serial
                )));
            }
            None if !node.has(NodeFlags::ROOT) => {
                return Err(TreeError::Relocation(format!(
                    "node {serial} has no parent"
                )));
            }
            None => {}
        }
    }
    Ok(())
}
