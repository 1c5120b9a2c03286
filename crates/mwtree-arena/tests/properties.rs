//! Property-based tests for the node arena using proptest.

use std::collections::HashSet;

use mwtree_arena::{ArenaConfig, NodeArena, NodeKind, SerialIndex};
use proptest::prelude::*;

fn arena(chunk: usize, max: usize, roots: usize) -> NodeArena<3> {
    let config = ArenaConfig::new(3, chunk, max)
        .with_coefficients(5)
        .with_roots(roots);
    NodeArena::new(NodeKind::Persistent, config).unwrap()
}

/// Arena of either kind with its coefficient block length. Generated
/// arenas hold no roots and a shorter block.
fn arena_of(kind: NodeKind, chunk: usize) -> (NodeArena<3>, usize) {
    match kind {
        NodeKind::Persistent => (arena(chunk, 100_000, 1), 5),
        NodeKind::Generated => {
            let config = ArenaConfig::new(3, chunk, 100_000).with_coefficients(3);
            (NodeArena::new(NodeKind::Generated, config).unwrap(), 3)
        }
    }
}

fn node_kind() -> impl Strategy<Value = NodeKind> {
    prop_oneof![Just(NodeKind::Persistent), Just(NodeKind::Generated)]
}

/// Each live node's block sits at `(serial % chunk) * block` in the
/// coefficient chunk `serial / chunk`.
fn check_coefficient_blocks(
    arena: &NodeArena<3>,
    chunk: usize,
    block: usize,
) -> Result<(), TestCaseError> {
    for node in arena.iter() {
        let s = node.serial().unwrap();
        prop_assert_eq!(node.kind(), arena.kind());
        let expected = arena
            .chunks()
            .coefficient_chunk(s.get() / chunk)
            .unwrap()
            .as_ptr()
            .wrapping_add((s.get() % chunk) * block);
        let actual = arena.coefficients(s).unwrap();
        prop_assert!(std::ptr::eq(actual.as_ptr(), expected));
        prop_assert_eq!(actual.len(), block);
    }
    Ok(())
}

#[derive(Clone, Debug)]
enum Op {
    Allocate,
    /// Release the live group at this position (modulo the live count).
    Release(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Allocate),
        1 => any::<usize>().prop_map(Op::Release),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn aligned_groups_pack_densely(chunks in 1usize..6, groups in 0usize..40) {
        // Root group and chunk capacity are multiples of the branching
        // factor, so no tail is ever skipped.
        let mut arena = arena(8 * chunks, 10_000, 8);
        let _ = arena.allocate_group(8);
        for _ in 0..groups {
            let _ = arena.allocate_group(8);
        }
        let live = arena.live();
        let serials: HashSet<usize> = arena.iter().map(|n| n.serial().unwrap().get()).collect();
        prop_assert_eq!(serials.len(), live);
        prop_assert!(serials.iter().all(|&s| s < live));
    }

    #[test]
    fn serials_unique_under_churn(
        chunk in 8usize..40,
        ops in prop::collection::vec(op(), 1..120),
    ) {
        let mut arena = arena(chunk, 100_000, 1);
        let _ = arena.allocate_group(1);
        let mut groups: Vec<SerialIndex> = Vec::new();
        for op in ops {
            match op {
                Op::Allocate => groups.push(arena.allocate_group(8).base),
                Op::Release(i) if !groups.is_empty() => {
                    let base = groups.remove(i % groups.len());
                    let release = arena.deallocate_group(base);
                    prop_assert_eq!(release.anomalies, 0);
                }
                Op::Release(_) => {}
            }
        }
        let serials: Vec<usize> = arena.iter().map(|n| n.serial().unwrap().get()).collect();
        let unique: HashSet<usize> = serials.iter().copied().collect();
        prop_assert_eq!(unique.len(), serials.len());
        prop_assert_eq!(serials.len(), 1 + 8 * groups.len());
        prop_assert!(serials.iter().all(|&s| s < arena.top()));
    }

    #[test]
    fn groups_stay_inside_one_chunk(
        chunk in 8usize..70,
        roots in 1usize..8,
        groups in 1usize..60,
    ) {
        let mut arena = arena(chunk, 100_000, roots);
        let _ = arena.allocate_group(roots);
        for _ in 0..groups {
            let base = arena.allocate_group(8).base.get();
            prop_assert_eq!(base / chunk, (base + 7) / chunk);
        }
    }

    #[test]
    fn release_then_allocate_reuses_range(
        chunk in 8usize..50,
        before in 0usize..30,
    ) {
        let mut arena = arena(chunk, 100_000, 1);
        let _ = arena.allocate_group(1);
        for _ in 0..before {
            let _ = arena.allocate_group(8);
        }
        let first = arena.allocate_group(8).base;
        let chunks = arena.chunks().len();
        arena.deallocate_group(first);
        let second = arena.allocate_group(8).base;
        prop_assert_eq!(first, second);
        prop_assert_eq!(arena.chunks().len(), chunks);
    }

    #[test]
    fn coefficient_blocks_follow_slot_arithmetic(
        kind in node_kind(),
        chunk in 8usize..40,
        ops in prop::collection::vec(op(), 1..80),
    ) {
        let (mut arena, block) = arena_of(kind, chunk);
        if kind == NodeKind::Persistent {
            let _ = arena.allocate_group(1);
        }
        let mut groups = Vec::new();
        for op in ops {
            match op {
                Op::Allocate => groups.push(arena.allocate_group(8).base),
                Op::Release(i) if !groups.is_empty() => {
                    let base = groups.swap_remove(i % groups.len());
                    arena.deallocate_group(base);
                }
                Op::Release(_) => {}
            }
        }
        check_coefficient_blocks(&arena, chunk, block)?;

        let (mut installed, _) = arena_of(kind, chunk);
        let live = installed.install_chunks(arena.export_chunks(), |_| {}).unwrap();
        prop_assert_eq!(live, arena.live());
        check_coefficient_blocks(&installed, chunk, block)?;
    }
}
