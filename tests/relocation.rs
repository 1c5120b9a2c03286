//! Chunk relocation across trees and contexts.
//!
//! A sender exports its persistent chunks, they travel as JSON, and a
//! receiver in another context rebuilds the same tree from them.

use std::sync::Arc;

use mwtree_arena::{ChunkTable, NodeFlags, NodeRef, SerialIndex};
use mwtree_core::{BoundingBox, FunctionTree, ProcessContext, TreeError, TreeOptions};

fn options() -> TreeOptions {
    TreeOptions {
        order: 1,
        max_nodes: 400,
        max_gen_nodes: 64,
        chunk_capacity: 16,
    }
}

fn bbox() -> BoundingBox<3> {
    BoundingBox::new(-1, [0, 0, 0], [2, 1, 1]).unwrap()
}

/// Two roots, refined unevenly, with coefficients on every end node.
fn sender(ctx: &Arc<ProcessContext>) -> FunctionTree<3> {
    let mut tree = FunctionTree::new(Arc::clone(ctx), bbox(), options()).unwrap();
    let roots = tree.roots().to_vec();
    let first = tree.alloc_children(roots[0]).unwrap();
    let deep = tree.alloc_children(first.add(3)).unwrap();
    tree.alloc_children(deep.add(7)).unwrap();
    tree.alloc_children(roots[1]).unwrap();
    tree.reset_end_node_table();

    for (i, serial) in tree.end_node_table().to_vec().into_iter().enumerate() {
        let values: Vec<f64> = (0..64).map(|j| f64::from(u32::try_from(i + j).unwrap()) * 0.125).collect();
        tree.set_coefficients(NodeRef::persistent(serial), &values).unwrap();
    }
    tree.calc_square_norm();
    tree
}

fn ship(chunks: &ChunkTable<3>) -> ChunkTable<3> {
    let json = serde_json::to_string(chunks).unwrap();
    serde_json::from_str(&json).unwrap()
}

#[test]
fn relocated_tree_matches_sender() {
    let here = Arc::new(ProcessContext::new(0));
    let there = Arc::new(ProcessContext::new(1));
    let source = sender(&here);

    let target = FunctionTree::from_chunks(Arc::clone(&there), bbox(), options(), ship(&source.export_chunks())).unwrap();

    assert_eq!(target.roots(), &[SerialIndex::new(0), SerialIndex::new(1)]);
    assert_eq!(target.node_count(), source.node_count());
    assert_eq!(target.depth_histogram(), &[2, 16, 8, 8]);
    assert_eq!(target.end_node_table(), source.end_node_table());
    assert!((target.square_norm() - source.square_norm()).abs() < 1e-9 * source.square_norm());

    for &serial in source.end_node_table() {
        let sent = source.coefficients(serial).unwrap();
        let received = target.coefficients(serial).unwrap();
        assert_eq!(sent, received);
        let node = target.node(serial).unwrap();
        assert!(node.has(NodeFlags::END_NODE | NodeFlags::HAS_COEFS));
        assert_eq!(node.index(), source.node(serial).unwrap().index());
    }
}

#[test]
fn receiver_owns_relocated_nodes() {
    let here = Arc::new(ProcessContext::new(0));
    let there = Arc::new(ProcessContext::new(1));
    let source = sender(&here);
    let target = FunctionTree::from_chunks(Arc::clone(&there), bbox(), options(), ship(&source.export_chunks())).unwrap();

    assert!(there.is_live(target.id()));
    assert_eq!(there.live_trees(), 1);
    assert!(target.persistent_arena().iter().all(|n| n.owner() == Some(target.id())));
    assert!(source.persistent_arena().iter().all(|n| n.owner() == Some(source.id())));
}

#[test]
fn links_survive_relocation() {
    let ctx = Arc::new(ProcessContext::new(0));
    let source = sender(&ctx);
    let target = FunctionTree::from_chunks(Arc::clone(&ctx), bbox(), options(), ship(&source.export_chunks())).unwrap();

    for node in target.persistent_arena().iter() {
        let serial = node.serial().unwrap();
        let children: Vec<_> = target.children(serial).collect();
        assert_eq!(children.len(), if node.first_child().is_some() { 8 } else { 0 });
        for (i, child) in children.iter().enumerate() {
            assert_eq!(child.index(), &node.index().child(i));
            assert_eq!(target.parent(child.serial().unwrap()).unwrap().serial(), Some(serial));
        }
    }
}

#[test]
fn relocated_tree_keeps_working() {
    let ctx = Arc::new(ProcessContext::new(0));
    let source = sender(&ctx);
    let mut target = FunctionTree::from_chunks(Arc::clone(&ctx), bbox(), options(), ship(&source.export_chunks())).unwrap();

    let leaf = target.end_node_table()[0];
    let base = target.alloc_gen_children(NodeRef::persistent(leaf)).unwrap();
    assert_eq!(target.gen_node_count(), 8);
    target.delete_gen_children(base).unwrap();

    let roots = target.roots().to_vec();
    for root in roots {
        target.delete_children(root).unwrap();
    }
    target.reset_end_node_table();
    assert_eq!(target.node_count(), 2);
    assert_eq!(target.persistent_arena().top(), 2);
    assert_eq!(target.end_node_table(), target.roots());
}

#[test]
fn second_relocation_replaces_first() {
    let ctx = Arc::new(ProcessContext::new(0));
    let source = sender(&ctx);
    let mut target = FunctionTree::new(Arc::clone(&ctx), bbox(), options()).unwrap();

    let first = target.rebuild(ship(&source.export_chunks())).unwrap();
    let second = target.rebuild(ship(&source.export_chunks())).unwrap();
    assert_eq!(first, second);
    assert_eq!(target.node_count(), source.node_count());
}

#[test]
fn truncated_payload_does_not_decode() {
    let ctx = Arc::new(ProcessContext::new(0));
    let json = serde_json::to_string(&sender(&ctx).export_chunks()).unwrap();
    let torn = &json[..json.len() / 2];
    assert!(serde_json::from_str::<ChunkTable<3>>(torn).is_err());
}

#[test]
fn mismatched_order_is_rejected() {
    let ctx = Arc::new(ProcessContext::new(0));
    let source = sender(&ctx);
    let other = TreeOptions {
        order: 2,
        ..options()
    };
    let result = FunctionTree::from_chunks(Arc::clone(&ctx), bbox(), other, ship(&source.export_chunks()));
    assert!(matches!(result, Err(TreeError::Relocation(_))));
}
