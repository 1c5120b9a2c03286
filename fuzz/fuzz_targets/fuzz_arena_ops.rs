#![no_main]

use libfuzzer_sys::fuzz_target;

use mwtree_arena::{ArenaConfig, NodeArena, NodeKind, SerialIndex};

fuzz_target!(|data: &[u8]| {
    // Small chunks so boundary skips happen often
    let config = ArenaConfig::new(2, 10, 200).with_coefficients(3);
    let Ok(mut arena) = NodeArena::<2>::new(NodeKind::Generated, config) else {
        return;
    };
    let mut live: Vec<SerialIndex> = Vec::new();

    for &byte in data {
        if byte & 1 == 0 {
            match arena.try_allocate_group(4) {
                Ok(group) => {
                    let base = group.base;
                    assert!(base.get() % 10 + 4 <= 10, "group {base} crosses a chunk");
                    assert_eq!(group.coefficients.len(), 12);
                    live.push(base);
                }
                Err(_) => assert!(arena.top() + 10 > 200),
            }
        } else if !live.is_empty() {
            let base = live.swap_remove(usize::from(byte >> 1) % live.len());
            arena.try_deallocate_group(base).expect("live group releases");
        }
        assert_eq!(arena.live(), live.len() * 4);
        assert!(live.iter().all(|b| b.get() + 4 <= arena.top()));
    }

    for base in live.drain(..).rev() {
        arena.try_deallocate_group(base).expect("live group releases");
    }
    assert_eq!(arena.live(), 0);
    assert_eq!(arena.top(), 0);
});
