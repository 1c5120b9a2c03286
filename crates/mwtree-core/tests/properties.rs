//! Property-based tests for tree refinement and topology rebuild.

use std::sync::Arc;

use mwtree_arena::{ChunkTable, NodeFlags, NodeRef};
use mwtree_core::{BoundingBox, FunctionTree, ProcessContext, TreeOptions};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Step {
    /// Refine the end node at this position (modulo the table length).
    Refine(usize),
    /// Coarsen the refined node at this position.
    Coarsen(usize),
    /// Write coefficients to the end node at this position.
    Fill(usize, f64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => any::<usize>().prop_map(Step::Refine),
        1 => any::<usize>().prop_map(Step::Coarsen),
        2 => (any::<usize>(), -4.0f64..4.0).prop_map(|(i, v)| Step::Fill(i, v)),
    ]
}

fn options(chunk: usize) -> TreeOptions {
    TreeOptions {
        order: 1,
        max_nodes: 20_000,
        max_gen_nodes: 64,
        chunk_capacity: chunk,
    }
}

fn grow(tree: &mut FunctionTree<2>, steps: &[Step]) {
    for step in steps {
        tree.reset_end_node_table();
        let ends = tree.end_node_table().to_vec();
        match *step {
            Step::Refine(i) => {
                tree.alloc_children(ends[i % ends.len()]).unwrap();
            }
            Step::Coarsen(i) => {
                let refined: Vec<_> = tree
                    .persistent_arena()
                    .iter()
                    .filter(|n| n.first_child().is_some())
                    .filter_map(|n| n.serial())
                    .collect();
                if !refined.is_empty() {
                    tree.delete_children(refined[i % refined.len()]).unwrap();
                }
            }
            Step::Fill(i, value) => {
                let target = NodeRef::persistent(ends[i % ends.len()]);
                tree.set_coefficients(target, &[value; 16]).unwrap();
            }
        }
    }
    tree.reset_end_node_table();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rebuild_restores_links_and_aggregates(
        chunk in 6usize..40,
        boxes in 1usize..4,
        steps in prop::collection::vec(step(), 0..60),
    ) {
        let ctx = Arc::new(ProcessContext::new(0));
        let bbox = BoundingBox::new(0, [0, 0], [boxes, 1]).unwrap();
        let mut source = FunctionTree::<2>::new(Arc::clone(&ctx), bbox, options(chunk)).unwrap();
        grow(&mut source, &steps);
        let norm = source.calc_square_norm();

        let json = serde_json::to_string(&source.export_chunks()).unwrap();
        let received: ChunkTable<2> = serde_json::from_str(&json).unwrap();
        let target = FunctionTree::from_chunks(Arc::clone(&ctx), bbox, options(chunk), received).unwrap();

        prop_assert_eq!(target.node_count(), source.node_count());
        prop_assert_eq!(target.depth_histogram(), source.depth_histogram());
        prop_assert_eq!(target.end_node_table(), source.end_node_table());
        prop_assert_eq!(target.persistent_arena().top(), source.persistent_arena().top());
        prop_assert!((target.square_norm() - norm).abs() <= 1e-9 * norm.max(1.0));

        let roots: Vec<usize> = target.roots().iter().map(|s| s.get()).collect();
        prop_assert_eq!(roots, (0..boxes).collect::<Vec<_>>());

        for node in target.persistent_arena().iter() {
            let serial = node.serial().unwrap();
            prop_assert_eq!(node.index(), source.node(serial).unwrap().index());
            let received = target.coefficients(serial).unwrap();
            let sent = source.coefficients(serial).unwrap();
            prop_assert!(received.iter().zip(sent).all(|(a, b)| (a - b).abs() <= 1e-12));
            let mut children = 0;
            for child in target.children(serial) {
                children += 1;
                let back = target.parent(child.serial().unwrap()).unwrap();
                prop_assert_eq!(back.serial(), Some(serial));
            }
            prop_assert!(children == 0 || children == 4);
            prop_assert_eq!(children == 0, node.has(NodeFlags::END_NODE));
        }
    }

    #[test]
    fn refine_then_coarsen_all_returns_to_roots(
        chunk in 4usize..30,
        steps in prop::collection::vec(any::<usize>().prop_map(Step::Refine), 0..40),
    ) {
        let ctx = Arc::new(ProcessContext::new(0));
        let mut tree = FunctionTree::<2>::new(ctx, BoundingBox::unit(), options(chunk)).unwrap();
        grow(&mut tree, &steps);
        let root = tree.roots()[0];
        tree.delete_children(root).unwrap();
        prop_assert_eq!(tree.node_count(), 1);
        prop_assert_eq!(tree.persistent_arena().top(), 1);
        prop_assert_eq!(tree.persistent_arena().stats().anomalies, 0);
    }
}
