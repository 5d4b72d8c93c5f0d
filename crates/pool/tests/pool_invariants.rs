//! Invariant-level tests: the free-byte counter against an independent
//! traversal, and the coalescing table observed through `blocks()`.

use core::ptr::NonNull;

use blockpool::prelude::*;
use proptest::prelude::*;

/// Sum free bytes the slow way, straight from the block list.
fn observed_free_bytes<P: ArenaProvider>(pool: &MemoryPool<P>) -> usize {
    pool.blocks()
        .filter(|b| b.state == BlockState::Free)
        .map(|b| b.footprint())
        .sum()
}

#[test]
fn coalescing_follows_the_four_case_table() {
    let mut pool = MemoryPool::with_capacity(4096).unwrap();

    let i = pool.alloc_bytes(8).unwrap();
    let j = pool.alloc_bytes(8).unwrap();
    let k = pool.alloc_bytes(8).unwrap();
    // layout: [used i][used j][used k][free tail]
    assert_eq!(pool.free_block_count(), 1);

    // i: neither neighbor merges (its prev is across the wraparound seam)
    pool.release_bytes(i).unwrap();
    assert_eq!(pool.free_block_count(), 2);

    // k: the free tail follows it, so the two become one
    pool.release_bytes(k).unwrap();
    assert_eq!(pool.free_block_count(), 2);

    // j: both neighbors are free, so everything collapses to one block
    pool.release_bytes(j).unwrap();
    assert_eq!(pool.free_block_count(), 1);
    assert_eq!(pool.free_bytes(), 4096);

    let only: Vec<_> = pool.blocks().collect();
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].footprint(), 4096);
    assert_eq!(only[0].state, BlockState::Free);
}

#[test]
fn freed_block_vanishes_into_lower_neighbor() {
    let mut pool = MemoryPool::with_capacity(4096).unwrap();

    let i = pool.alloc_bytes(8).unwrap();
    let j = pool.alloc_bytes(8).unwrap();
    let k = pool.alloc_bytes(8).unwrap();

    pool.release_bytes(i).unwrap();
    // j's lower neighbor is free, its upper neighbor (k) is not: j's own
    // header is absorbed and the first block grows over both footprints
    pool.release_bytes(j).unwrap();
    assert_eq!(pool.free_block_count(), 2);

    let first = pool.blocks().next().unwrap();
    assert_eq!(first.state, BlockState::Free);
    assert_eq!(first.payload_size, 8 + pool.header_size() + 8);

    pool.release_bytes(k).unwrap();
    assert_eq!(pool.free_block_count(), 1);
    assert_eq!(pool.free_bytes(), 4096);
}

#[test]
fn double_release_leaves_the_counter_alone() {
    let mut pool = MemoryPool::with_capacity(4096).unwrap();

    let ptr = pool.alloc_bytes(32).unwrap();
    pool.release_bytes(ptr).unwrap();

    let after_first = pool.free_bytes();
    assert_eq!(pool.release_bytes(ptr), Err(PoolError::InvalidPointer));
    assert_eq!(pool.free_bytes(), after_first);
}

#[test]
fn foreign_pointer_leaves_the_pool_untouched() {
    let mut pool = MemoryPool::with_capacity(4096).unwrap();
    let _held = pool.alloc_bytes(32).unwrap();
    let before = pool.stats();

    let mut on_stack = [0_u8; 64];
    let foreign = NonNull::from(&mut on_stack[8]);
    assert_eq!(pool.release(foreign), Err(PoolError::InvalidPointer));

    assert_eq!(pool.stats(), before);
}

proptest! {
    /// After every operation in any in-capacity alloc/release sequence, the
    /// tracked free-byte counter matches an independent sum over the block
    /// list, and draining all live allocations restores the pristine arena.
    #[test]
    fn accounting_invariant_holds(
        ops in proptest::collection::vec((any::<bool>(), 1_usize..256), 1..64)
    ) {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();
        let mut live: Vec<NonNull<u8>> = Vec::new();

        for (is_alloc, n) in ops {
            if is_alloc || live.is_empty() {
                if let Ok(ptr) = pool.alloc_bytes(n) {
                    live.push(ptr);
                }
            } else {
                let ptr = live.swap_remove(n % live.len());
                pool.release_bytes(ptr).unwrap();
            }

            prop_assert_eq!(pool.free_bytes(), observed_free_bytes(&pool));
        }

        for ptr in live.drain(..) {
            pool.release_bytes(ptr).unwrap();
            prop_assert_eq!(pool.free_bytes(), observed_free_bytes(&pool));
        }

        prop_assert_eq!(pool.free_bytes(), 4096);
        prop_assert_eq!(pool.free_block_count(), 1);
    }

    /// Resize keeps the payload prefix regardless of direction.
    #[test]
    fn resize_preserves_prefix(
        old_len in 1_usize..128,
        new_len in 1_usize..128,
        fill in any::<u8>(),
    ) {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();

        let old = pool.alloc_array::<u8>(old_len).unwrap();
        for i in 0..old_len {
            unsafe { old.as_ptr().add(i).write(fill.wrapping_add(i as u8)) };
        }

        let new = pool.resize_array::<u8>(old, new_len).unwrap();
        for i in 0..old_len.min(new_len) {
            prop_assert_eq!(
                unsafe { new.as_ptr().add(i).read() },
                fill.wrapping_add(i as u8)
            );
        }

        pool.release(new).unwrap();
        prop_assert_eq!(pool.free_bytes(), 4096);
    }
}
