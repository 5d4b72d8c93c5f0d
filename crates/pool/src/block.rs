//! Intrusive block headers
//!
//! Every region of the arena, free or in use, starts with a [`BlockHeader`]
//! followed immediately by that region's payload bytes. Headers are threaded
//! onto a circular doubly linked list in address order; the list is never
//! empty and never null-terminated (a single-block arena links to itself).
//!
//! # Safety
//!
//! This module is the crate's raw-pointer boundary. Everything here operates
//! on `*mut BlockHeader` pointing into an arena owned by the calling pool:
//!
//! - `init`/`connect`/`merge` require pointers to properly aligned headers
//!   inside the caller's arena. `connect` and `merge` additionally require
//!   the list invariants the pool maintains (closed circular list, address
//!   order).
//! - `merge` requires `absorbed` to be `curt`'s direct list successor; it
//!   performs no flag or adjacency checks of its own.
//! - `verify` is the one function designed to be safe to call on garbage:
//!   it range-checks and alignment-checks every pointer (including the
//!   header's own links) before the first dereference, so the only memory it
//!   ever reads lies inside the caller's arena.
//!
//! The `flag` field is a raw word rather than a Rust enum: `verify` reads
//! headers that may contain arbitrary bytes, and reading an arbitrary word
//! is defined where reading an invalid enum discriminant would not be.

use core::ptr;

/// Payload alignment guaranteed by the pool, and the header alignment.
pub(crate) const ALIGN: usize = 8;

/// Block is free.
pub(crate) const FLAG_FREE: u64 = 0;
/// Block is in use.
pub(crate) const FLAG_USED: u64 = 1;

/// Sentinel written into `magic` when a block transitions to used. Its
/// absence on release is how wild pointers and stale frees are caught.
pub(crate) const MAGIC: u64 = 0xB10C_CAFE_F00D_FACE;

/// Header stored in place at the start of every arena region.
///
/// `size` is the payload byte count governed by this header (the header
/// itself excluded), always a multiple of [`ALIGN`]. For all but the last
/// block before the wraparound, `self as usize + HEADER_SIZE + self.size`
/// is the address of the next header in memory.
#[repr(C, align(8))]
pub(crate) struct BlockHeader {
    pub size: usize,
    pub flag: u64,
    pub magic: u64,
    pub prev: *mut BlockHeader,
    pub next: *mut BlockHeader,
}

/// Fixed per-block overhead in bytes.
pub(crate) const HEADER_SIZE: usize = size_of::<BlockHeader>();

/// Round a payload size up to the next multiple of [`ALIGN`].
#[inline(always)]
pub(crate) fn align8(size: usize) -> usize {
    (size + (ALIGN - 1)) & !(ALIGN - 1)
}

/// Initialize a header as a free, unlinked block of `payload_size` bytes.
///
/// The caller links it into the list separately (see [`connect`]).
///
/// # Safety
///
/// `block` must point to `HEADER_SIZE` writable, 8-aligned bytes inside the
/// caller's arena.
pub(crate) unsafe fn init(block: *mut BlockHeader, payload_size: usize) {
    unsafe {
        (*block).size = payload_size;
        (*block).flag = FLAG_FREE;
        (*block).magic = 0;
        (*block).prev = ptr::null_mut();
        (*block).next = ptr::null_mut();
    }
}

/// Splice `next` into the list immediately after `curt`.
///
/// Used only when splitting a block in two: `next` is the freshly
/// initialized remainder header.
///
/// # Safety
///
/// `curt` must be a live, linked header; `next` a valid unlinked header.
pub(crate) unsafe fn connect(curt: *mut BlockHeader, next: *mut BlockHeader) {
    unsafe {
        (*next).prev = curt;
        (*next).next = (*curt).next;
        (*(*next).next).prev = next;
        (*curt).next = next;
    }
}

/// Unlink `absorbed` and grow `curt` over it.
///
/// After this, `curt` governs its own payload, the absorbed header's bytes
/// and the absorbed payload: `curt.size += absorbed.size + HEADER_SIZE`.
///
/// # Safety
///
/// `absorbed` must be `curt`'s direct list successor and directly
/// address-adjacent above it. The caller has already established that the
/// merge is wanted (both free, right side of the wraparound seam); no checks
/// happen here.
pub(crate) unsafe fn merge(curt: *mut BlockHeader, absorbed: *mut BlockHeader) {
    unsafe {
        (*(*absorbed).next).prev = curt;
        (*curt).next = (*absorbed).next;
        (*curt).size += (*absorbed).size + HEADER_SIZE;
    }
}

/// Validate a header before trusting it.
///
/// Returns `false` (never panics) if `block`:
/// - lies outside `[arena_start, arena_start + arena_len)` or is not
///   header-aligned,
/// - is missing the magic sentinel (when a used block is expected),
/// - has list links that leave the arena or disagree with it
///   (`next.prev != block` or `prev.next != block`),
/// - or does not carry `expected_flag`.
///
/// This single check is the pool's only line of defense against
/// use-after-free, wild frees and header corruption; it runs before every
/// release and resize.
///
/// # Safety
///
/// `arena_start`/`arena_len` must describe memory readable by the caller.
/// `block` itself may be any pointer whatsoever: nothing is dereferenced
/// until its address has passed the range and alignment checks, and link
/// pointers get the same treatment before they are followed.
pub(crate) unsafe fn verify(
    block: *const BlockHeader,
    arena_start: usize,
    arena_len: usize,
    expected_flag: u64,
) -> bool {
    // arena_len is at least HEADER_SIZE + ALIGN (checked at construction),
    // so `arena_end - HEADER_SIZE` cannot underflow; comparing against it
    // instead of `addr + HEADER_SIZE` keeps garbage addresses near
    // `usize::MAX` from overflowing.
    let arena_end = arena_start + arena_len;
    let in_arena = |addr: usize| {
        addr >= arena_start && addr <= arena_end - HEADER_SIZE && addr & (ALIGN - 1) == 0
    };

    if !in_arena(block as usize) {
        return false;
    }

    // The address is inside our own arena and aligned; field reads are now
    // plain (possibly stale) data reads, not UB.
    let (magic, flag, prev, next) = unsafe {
        (
            (*block).magic,
            (*block).flag,
            (*block).prev,
            (*block).next,
        )
    };

    if expected_flag == FLAG_USED && magic != MAGIC {
        return false;
    }

    // Links must land inside the arena before they are followed.
    if !in_arena(prev as usize) || !in_arena(next as usize) {
        return false;
    }

    let consistent = unsafe {
        (*next).prev == block.cast_mut() && (*prev).next == block.cast_mut()
    };

    consistent && flag == expected_flag
}
