#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;

use mwtree_arena::{ChunkTable, NodeRef, SerialIndex};
use mwtree_core::{BoundingBox, FunctionTree, ProcessContext, TreeOptions};

fn options() -> TreeOptions {
    TreeOptions {
        order: 0,
        max_nodes: 256,
        max_gen_nodes: 16,
        chunk_capacity: 8,
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&mode, rest)) = data.split_first() else {
        return;
    };
    let ctx = Arc::new(ProcessContext::new(0));

    let chunks = if mode & 1 == 0 {
        // Raw payload straight off the wire
        match serde_json::from_slice::<ChunkTable<2>>(rest) {
            Ok(chunks) => chunks,
            Err(_) => return,
        }
    } else {
        // Refine by the bytes, then corrupt one link
        let Ok(mut tree) = FunctionTree::<2>::new(Arc::clone(&ctx), BoundingBox::unit(), options())
        else {
            return;
        };
        for &byte in rest.iter().take(40) {
            let ends = tree.end_node_table().to_vec();
            let leaf = ends[usize::from(byte) % ends.len()];
            if tree.node_count() + 4 > 200 {
                break;
            }
            tree.alloc_children(leaf).ok();
            tree.reset_end_node_table();
        }
        let mut chunks = tree.export_chunks();
        if let [a, b, ..] = rest {
            let capacity = chunks.chunk_capacity();
            let target = SerialIndex::new(usize::from(*a) % 64);
            let link = Some(NodeRef::persistent(SerialIndex::new(usize::from(*b) % 64)));
            if mode & 2 != 0 {
                if let Some(node) = chunks.node_mut(target) {
                    node.set_parent(link, capacity);
                }
            }
        }
        chunks
    };

    // Either the rebuild is rejected or the tree it yields is consistent.
    if let Ok(tree) = FunctionTree::from_chunks(Arc::clone(&ctx), BoundingBox::unit(), options(), chunks) {
        assert_eq!(tree.depth_histogram().iter().sum::<usize>(), tree.node_count());
        for node in tree.persistent_arena().iter() {
            let serial = node.serial().expect("live nodes have serials");
            for child in tree.children(serial) {
                let back = tree.parent(child.serial().expect("live child")).map(|p| p.serial());
                assert_eq!(back, Some(Some(serial)));
            }
        }
        assert!(tree.end_node_table().iter().all(|&s| tree.children(s).next().is_none()));
    }
});
