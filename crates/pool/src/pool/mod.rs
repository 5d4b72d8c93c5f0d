//! Fixed-capacity pool engine
//!
//! Owns one arena and the circular doubly linked list of block headers
//! threaded through it. Allocation is first-fit starting at a rotating scan
//! cursor; free blocks split on demand and coalesce with address-adjacent
//! free neighbors on release.
//!
//! # Safety
//!
//! All raw-pointer manipulation funnels through `crate::block`:
//! - The head, cursor and every list link always point at live headers
//!   inside the arena; the pool is the only writer (`&mut self`).
//! - Pointers arriving from outside (`release`, `resize`) are never trusted:
//!   the header address is re-derived from the arena allocation and then
//!   passed through `block::verify`, which bounds-checks before it reads.
//! - The free-byte counter equals the sum of `size + HEADER_SIZE` over all
//!   free blocks after every mutation.

mod config;
mod dump;

pub use config::{DEFAULT_CAPACITY, PoolConfig};
pub use dump::{BlockInfo, BlockState, Blocks, PoolStats};

use core::fmt;
use core::ptr::{self, NonNull};

use crate::block::{self, ALIGN, BlockHeader, FLAG_FREE, FLAG_USED, HEADER_SIZE, MAGIC, align8};
use crate::error::{PoolError, PoolResult};
use crate::provider::{ArenaProvider, HeapProvider};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Fixed-capacity, arena-backed memory pool.
///
/// The arena is acquired once from the injected [`ArenaProvider`] and
/// released when the pool is dropped; it never grows, shrinks or moves.
/// Payloads are 8-aligned.
///
/// # Example
///
/// ```
/// use blockpool::MemoryPool;
///
/// let mut pool = MemoryPool::with_capacity(4096).unwrap();
/// let ptr = pool.alloc::<u64>().unwrap();
/// unsafe { ptr.write(42) };
/// assert_eq!(unsafe { ptr.read() }, 42);
/// pool.release(ptr).unwrap();
/// ```
pub struct MemoryPool<P: ArenaProvider = HeapProvider> {
    provider: P,
    config: PoolConfig,
    arena: NonNull<u8>,
    capacity: usize,
    /// First block; fixed for the pool's lifetime.
    head: NonNull<BlockHeader>,
    /// Rotating first-fit hint. Purely a performance aid, never required
    /// for correctness, but must never dangle.
    cursor: NonNull<BlockHeader>,
    free_bytes: usize,
}

// SAFETY: the pool exclusively owns its arena; every header pointer points
// into it, so moving the whole pool to another thread moves everything the
// pointers refer to along with it.
unsafe impl<P: ArenaProvider + Send> Send for MemoryPool<P> {}

impl MemoryPool<HeapProvider> {
    /// Create a pool with the default configuration (4 KiB heap arena).
    pub fn new() -> PoolResult<Self> {
        Self::with_config(PoolConfig::default())
    }

    /// Create a heap-backed pool with the given arena capacity in bytes.
    pub fn with_capacity(bytes: usize) -> PoolResult<Self> {
        Self::with_config(PoolConfig::with_capacity(bytes))
    }

    /// Create a heap-backed pool from a full configuration.
    pub fn with_config(config: PoolConfig) -> PoolResult<Self> {
        Self::with_provider(HeapProvider, config)
    }
}

impl<P: ArenaProvider> MemoryPool<P> {
    /// Create a pool over an arena acquired from `provider`.
    ///
    /// Fails if the configured capacity cannot hold at least one header plus
    /// one aligned payload, or if the provider cannot supply the arena.
    pub fn with_provider(mut provider: P, config: PoolConfig) -> PoolResult<Self> {
        let capacity = config.effective_capacity()?;
        let arena = provider.acquire(capacity)?;
        let head = arena.cast::<BlockHeader>();

        let mut pool = Self {
            provider,
            config,
            arena,
            capacity,
            head,
            cursor: head,
            free_bytes: 0,
        };
        pool.init_blocks();

        #[cfg(feature = "logging")]
        debug!(capacity, "memory pool created");

        Ok(pool)
    }

    /// Reset the arena to a single free block spanning all of it.
    fn init_blocks(&mut self) {
        let head = self.head.as_ptr();
        // SAFETY: the arena is 8-aligned and at least HEADER_SIZE + ALIGN
        // bytes (validated by the config), so the head header fits.
        unsafe {
            block::init(head, self.capacity - HEADER_SIZE);
            (*head).prev = head;
            (*head).next = head;
        }
        self.cursor = self.head;
        self.free_bytes = self.capacity;
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocate room for one `T`.
    ///
    /// The memory is uninitialized (or debug-patterned); the caller writes
    /// the value. `release` never runs destructors.
    pub fn alloc<T>(&mut self) -> PoolResult<NonNull<T>> {
        self.check_align::<T>()?;
        self.alloc_bytes(size_of::<T>()).map(NonNull::cast)
    }

    /// Allocate room for `count` contiguous `T`s.
    pub fn alloc_array<T>(&mut self, count: usize) -> PoolResult<NonNull<T>> {
        self.check_align::<T>()?;
        let bytes = size_of::<T>()
            .checked_mul(count)
            .ok_or_else(|| PoolError::exhausted(usize::MAX, self.free_bytes))?;
        self.alloc_bytes(bytes).map(NonNull::cast)
    }

    /// Allocate room for one `T` and move `value` into it.
    pub fn alloc_value<T>(&mut self, value: T) -> PoolResult<NonNull<T>> {
        let ptr = self.alloc::<T>()?;
        // SAFETY: freshly carved block of at least size_of::<T>() bytes,
        // alignment checked by `alloc`.
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Allocate a raw run of `bytes` bytes (rounded up to a multiple of 8).
    ///
    /// Fails on zero-size requests and on exhaustion, including the
    /// fragmented case where enough bytes exist in aggregate but no single
    /// free block can hold the request.
    pub fn alloc_bytes(&mut self, bytes: usize) -> PoolResult<NonNull<u8>> {
        // The coarse check also caps `bytes` low enough that the alignment
        // round-up below cannot overflow.
        if bytes == 0 || bytes > self.free_bytes {
            return Err(PoolError::exhausted(bytes, self.free_bytes));
        }
        let requested = align8(bytes);
        if requested + HEADER_SIZE > self.free_bytes {
            return Err(PoolError::exhausted(requested, self.free_bytes));
        }

        // First fit, one full lap of the circular list starting at the
        // cursor.
        let start = self.cursor;
        let mut blk = start;
        loop {
            // SAFETY: cursor and list links only ever hold live headers.
            let (flag, size, next) = unsafe {
                let h = blk.as_ptr();
                ((*h).flag, (*h).size, (*h).next)
            };

            if flag == FLAG_FREE && size >= requested {
                return Ok(self.carve(blk, requested));
            }

            // SAFETY: list links are never null.
            blk = unsafe { NonNull::new_unchecked(next) };
            if blk == start {
                break;
            }
        }

        Err(PoolError::exhausted(requested, self.free_bytes))
    }

    /// Turn the free block at `blk` into a used block of `requested` bytes,
    /// splitting off the remainder when it is worth a header of its own.
    fn carve(&mut self, blk: NonNull<BlockHeader>, requested: usize) -> NonNull<u8> {
        let hdr = blk.as_ptr();
        // SAFETY: `hdr` is a live free header with size >= requested; the
        // split header lands inside its payload, which the pool owns.
        unsafe {
            let remainder = (*hdr).size - requested;
            if remainder > requested + HEADER_SIZE {
                let split = blk
                    .as_ptr()
                    .cast::<u8>()
                    .add(HEADER_SIZE + requested)
                    .cast::<BlockHeader>();
                block::init(split, remainder - HEADER_SIZE);
                block::connect(hdr, split);
                (*hdr).size = requested;
            }
            // else: consume the block whole. A split here would leave a free
            // block with little or no usable payload; the extra bytes stay
            // attached and come back on release.

            (*hdr).flag = FLAG_USED;
            (*hdr).magic = MAGIC;
            self.free_bytes -= (*hdr).size + HEADER_SIZE;
            // spread future scans away from the region just consumed
            self.cursor = NonNull::new_unchecked((*hdr).next);

            let payload = blk.as_ptr().cast::<u8>().add(HEADER_SIZE);
            if let Some(pattern) = self.config.alloc_pattern {
                ptr::write_bytes(payload, pattern, (*hdr).size);
            }

            #[cfg(feature = "logging")]
            trace!(
                requested,
                size = (*hdr).size,
                free = self.free_bytes,
                "block allocated"
            );

            NonNull::new_unchecked(payload)
        }
    }

    fn check_align<T>(&self) -> PoolResult<()> {
        if align_of::<T>() > ALIGN {
            return Err(PoolError::unsupported_alignment(align_of::<T>(), ALIGN));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// Return an allocation to the pool.
    ///
    /// The pointer must have come from this pool and still be live. Wild
    /// pointers, double frees and corrupted headers are rejected with
    /// [`PoolError::InvalidPointer`] and leave the pool untouched. No
    /// destructor runs for the payload.
    pub fn release<T>(&mut self, ptr: NonNull<T>) -> PoolResult<()> {
        self.release_bytes(ptr.cast())
    }

    /// Byte-level counterpart of [`release`](Self::release).
    pub fn release_bytes(&mut self, ptr: NonNull<u8>) -> PoolResult<()> {
        let hdr = self.header_of(ptr)?;

        // SAFETY: `hdr` was re-derived from the arena allocation and then
        // verified; from here on it is a live used header and every link on
        // it holds a live header too.
        unsafe {
            if !block::verify(hdr, self.arena.as_ptr() as usize, self.capacity, FLAG_USED) {
                return Err(PoolError::invalid_pointer());
            }

            (*hdr).magic = 0;
            if let Some(pattern) = self.config.dealloc_pattern {
                ptr::write_bytes(hdr.cast::<u8>().add(HEADER_SIZE), pattern, (*hdr).size);
            }

            self.free_bytes += (*hdr).size + HEADER_SIZE;

            #[cfg(feature = "logging")]
            trace!(size = (*hdr).size, free = self.free_bytes, "block released");

            // sole block in the arena
            if (*hdr).next == hdr {
                (*hdr).flag = FLAG_FREE;
                return Ok(());
            }

            let prev = (*hdr).prev;
            let next = (*hdr).next;
            // A neighbor merges only when it is free AND sits on the right
            // side in address order; the comparison keeps the list's
            // wraparound seam out of the merge.
            let prev_free = (*prev).flag == FLAG_FREE && (prev as usize) < (hdr as usize);
            let next_free = (*next).flag == FLAG_FREE && (hdr as usize) < (next as usize);

            // Whenever the cursor points at a block about to be absorbed,
            // retarget it to the surviving block first.
            match (prev_free, next_free) {
                (false, false) => {
                    (*hdr).flag = FLAG_FREE;
                }
                (false, true) => {
                    if self.cursor.as_ptr() == next {
                        self.cursor = NonNull::new_unchecked(hdr);
                    }
                    block::merge(hdr, next);
                    (*hdr).flag = FLAG_FREE;
                }
                (true, false) => {
                    if self.cursor.as_ptr() == hdr {
                        self.cursor = NonNull::new_unchecked(prev);
                    }
                    block::merge(prev, hdr);
                }
                (true, true) => {
                    if self.cursor.as_ptr() == hdr || self.cursor.as_ptr() == next {
                        self.cursor = NonNull::new_unchecked(prev);
                    }
                    block::merge(prev, hdr);
                    block::merge(prev, next);
                }
            }
        }

        Ok(())
    }

    /// Re-derive a header pointer for `ptr` from the arena allocation.
    ///
    /// Only the coarse range is checked here, enough to keep the pointer
    /// arithmetic inside the arena's provenance. `block::verify` does the
    /// real vetting.
    fn header_of(&self, ptr: NonNull<u8>) -> PoolResult<*mut BlockHeader> {
        let base = self.arena.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        if addr < base + HEADER_SIZE || addr >= base + self.capacity {
            return Err(PoolError::invalid_pointer());
        }
        // SAFETY: the offset was just checked to lie within the arena.
        let hdr = unsafe { self.arena.as_ptr().add(addr - base - HEADER_SIZE) };
        Ok(hdr.cast::<BlockHeader>())
    }

    // ------------------------------------------------------------------
    // Resize
    // ------------------------------------------------------------------

    /// Move an allocation of `T` into a new block sized for `U`.
    ///
    /// Not in place: a new block is allocated, `min(old, new)` bytes are
    /// copied, and the old block is released. If the new allocation fails
    /// the original block is left intact and still valid.
    pub fn resize<T, U>(&mut self, ptr: NonNull<T>) -> PoolResult<NonNull<U>> {
        self.check_align::<U>()?;
        self.resize_bytes(ptr.cast(), size_of::<U>()).map(NonNull::cast)
    }

    /// Move an array allocation to a new length. Same contract as
    /// [`resize`](Self::resize).
    pub fn resize_array<T>(&mut self, ptr: NonNull<T>, new_count: usize) -> PoolResult<NonNull<T>> {
        self.check_align::<T>()?;
        let bytes = size_of::<T>()
            .checked_mul(new_count)
            .ok_or_else(|| PoolError::exhausted(usize::MAX, self.free_bytes))?;
        self.resize_bytes(ptr.cast(), bytes).map(NonNull::cast)
    }

    /// Byte-level counterpart of [`resize`](Self::resize).
    pub fn resize_bytes(&mut self, ptr: NonNull<u8>, new_bytes: usize) -> PoolResult<NonNull<u8>> {
        let hdr = self.header_of(ptr)?;

        // SAFETY: same vetting as release; `old_size` is copied out before
        // any mutation.
        let old_size = unsafe {
            if !block::verify(hdr, self.arena.as_ptr() as usize, self.capacity, FLAG_USED) {
                return Err(PoolError::invalid_pointer());
            }
            (*hdr).size
        };

        // The old block stays used during the search, so the new block can
        // never overlap it. On failure the old block is untouched.
        let new_ptr = self.alloc_bytes(new_bytes)?;

        // SAFETY: distinct blocks (the old one was used throughout the
        // allocation), both at least `min(old, new)` bytes long.
        unsafe {
            ptr::copy_nonoverlapping(
                ptr.as_ptr(),
                new_ptr.as_ptr(),
                old_size.min(align8(new_bytes)),
            );
        }

        self.release_bytes(ptr)?;
        Ok(new_ptr)
    }

    // ------------------------------------------------------------------
    // Maintenance and accessors
    // ------------------------------------------------------------------

    /// Reinitialize the pool as if freshly constructed, without releasing
    /// the arena.
    ///
    /// All live allocations are discarded; pointers handed out earlier are
    /// logically dangling afterwards and will be rejected by `release`
    /// unless a new block has been carved at the same address.
    pub fn clear(&mut self) {
        self.init_blocks();

        #[cfg(feature = "logging")]
        debug!(capacity = self.capacity, "pool cleared");
    }

    /// Arena capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Aggregate free bytes, counting each free block's header.
    ///
    /// Enough free bytes do not guarantee a successful allocation: the
    /// bytes may be fragmented across undersized blocks.
    pub fn free_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Alias for [`free_bytes`](Self::free_bytes).
    pub fn available(&self) -> usize {
        self.free_bytes
    }

    /// Fixed per-block bookkeeping overhead in bytes.
    pub fn header_size(&self) -> usize {
        HEADER_SIZE
    }
}

impl<P: ArenaProvider> fmt::Debug for MemoryPool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("capacity", &self.capacity)
            .field("free_bytes", &self.free_bytes)
            .finish_non_exhaustive()
    }
}

impl<P: ArenaProvider> Drop for MemoryPool<P> {
    fn drop(&mut self) {
        // SAFETY: the arena came from this provider's `acquire` with this
        // exact size and is not used after the pool is gone.
        unsafe { self.provider.release(self.arena, self.capacity) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_write_read_release() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();

        let i = pool.alloc::<i32>().unwrap();
        unsafe { i.write(100) };
        assert_eq!(unsafe { i.read() }, 100);

        assert!(pool.release(i).is_ok());
        // double free is rejected, not UB
        assert_eq!(pool.release(i), Err(PoolError::InvalidPointer));

        // the pool still works; the region may be reused
        let j = pool.alloc::<i32>().unwrap();
        unsafe { j.write(7) };
        assert_eq!(unsafe { j.read() }, 7);
    }

    #[test]
    fn test_split_distance() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();

        let i = pool.alloc::<i32>().unwrap();
        let j = pool.alloc::<i32>().unwrap();

        // one header plus one aligned 4-byte payload apart
        let distance = j.as_ptr() as usize - i.as_ptr() as usize;
        assert_eq!(distance, HEADER_SIZE + 8);
    }

    #[test]
    fn test_zero_size_fails() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();
        assert!(pool.alloc_bytes(0).is_err());
        assert!(pool.alloc_array::<u64>(0).is_err());
        assert_eq!(pool.free_bytes(), 4096);
    }

    #[test]
    fn test_exhaustion_leaves_state() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();
        let before = pool.free_bytes();

        assert!(matches!(
            pool.alloc_bytes(8192),
            Err(PoolError::Exhausted { .. })
        ));
        assert_eq!(pool.free_bytes(), before);
    }

    #[test]
    fn test_fragmented_exhaustion() {
        let mut pool = MemoryPool::with_capacity(1024).unwrap();

        let a = pool.alloc_bytes(104).unwrap();
        let _b = pool.alloc_bytes(104).unwrap();
        let c = pool.alloc_bytes(104).unwrap();
        let _d = pool.alloc_bytes(104).unwrap();

        pool.release_bytes(a).unwrap();
        pool.release_bytes(c).unwrap();

        // plenty of aggregate free bytes, no single block big enough
        let free = pool.free_bytes();
        assert!(free > 544);
        assert!(matches!(
            pool.alloc_bytes(504),
            Err(PoolError::Exhausted { .. })
        ));
        assert_eq!(pool.free_bytes(), free);
    }

    #[test]
    fn test_foreign_pointer_rejected() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();
        let before = pool.free_bytes();

        let mut on_stack = 5_i32;
        let foreign = NonNull::from(&mut on_stack);
        assert_eq!(pool.release(foreign), Err(PoolError::InvalidPointer));
        assert_eq!(pool.free_bytes(), before);
    }

    #[test]
    fn test_interior_pointer_rejected() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();
        let ptr = pool.alloc_array::<u8>(64).unwrap();

        // a pointer into the middle of a payload is not a block identity
        let interior = unsafe { NonNull::new_unchecked(ptr.as_ptr().add(8)) };
        assert_eq!(pool.release(interior), Err(PoolError::InvalidPointer));
        assert!(pool.release(ptr).is_ok());
    }

    #[test]
    fn test_alignment_guard() {
        #[repr(align(16))]
        #[allow(dead_code)]
        struct Wide([u8; 32]);

        let mut pool = MemoryPool::with_capacity(4096).unwrap();
        assert_eq!(
            pool.alloc::<Wide>(),
            Err(PoolError::UnsupportedAlignment { align: 16, max: 8 })
        );
    }

    #[test]
    fn test_alloc_value() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();
        let v = pool.alloc_value(0xABCD_u32).unwrap();
        assert_eq!(unsafe { v.read() }, 0xABCD);
        pool.release(v).unwrap();
    }

    #[test]
    fn test_full_coalescing_round_trip() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();
        let pristine = pool.free_bytes();

        let a = pool.alloc::<u64>().unwrap();
        let b = pool.alloc::<u64>().unwrap();
        pool.release(a).unwrap();
        pool.release(b).unwrap();

        assert_eq!(pool.free_bytes(), pristine);
        assert_eq!(pool.free_block_count(), 1);
    }

    #[test]
    fn test_clear_discards_everything() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();
        let a = pool.alloc_array::<u8>(100).unwrap();
        let _b = pool.alloc_array::<u8>(200).unwrap();

        pool.clear();
        assert_eq!(pool.free_bytes(), 4096);
        assert_eq!(pool.free_block_count(), 1);

        // the old pointer no longer names a live block
        assert_eq!(pool.release(a), Err(PoolError::InvalidPointer));
    }

    #[test]
    fn test_whole_arena_allocation() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();

        let all = pool.alloc_bytes(4096 - HEADER_SIZE).unwrap();
        assert_eq!(pool.free_bytes(), 0);

        pool.release_bytes(all).unwrap();
        assert_eq!(pool.free_bytes(), 4096);
    }

    #[test]
    fn test_resize_preserves_contents() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();

        let small = pool.alloc_array::<u8>(16).unwrap();
        for i in 0..16 {
            unsafe { small.as_ptr().add(i).write(i as u8) };
        }

        let big = pool.resize_array::<u8>(small, 64).unwrap();
        for i in 0..16 {
            assert_eq!(unsafe { big.as_ptr().add(i).read() }, i as u8);
        }

        // the old block is gone
        assert_eq!(pool.release(small), Err(PoolError::InvalidPointer));
        pool.release(big).unwrap();
    }

    #[test]
    fn test_resize_failure_keeps_original() {
        let mut pool = MemoryPool::with_capacity(256).unwrap();

        let ptr = pool.alloc_array::<u8>(64).unwrap();
        unsafe { ptr.as_ptr().write(0x5A) };

        // no room for a second, larger block
        assert!(pool.resize_array::<u8>(ptr, 4096).is_err());

        // the original survives the failed resize
        assert_eq!(unsafe { ptr.as_ptr().read() }, 0x5A);
        assert!(pool.release(ptr).is_ok());
    }

    #[test]
    fn test_resize_type_change() {
        let mut pool = MemoryPool::with_capacity(4096).unwrap();

        let small = pool.alloc_value(0x11223344_u32).unwrap();
        let big: NonNull<u64> = pool.resize(small).unwrap();

        // the low four bytes carried over
        assert_eq!(unsafe { big.cast::<u32>().read() }, 0x11223344);
        pool.release(big).unwrap();
    }

    #[test]
    fn test_cursor_survives_churn() {
        // exercise cursor retargeting across all merge shapes
        let mut pool = MemoryPool::with_capacity(2048).unwrap();
        let pristine = pool.free_bytes();

        for _ in 0..8 {
            let a = pool.alloc_bytes(64).unwrap();
            let b = pool.alloc_bytes(64).unwrap();
            let c = pool.alloc_bytes(64).unwrap();
            pool.release_bytes(b).unwrap();
            pool.release_bytes(a).unwrap();
            pool.release_bytes(c).unwrap();
        }

        assert_eq!(pool.free_bytes(), pristine);
        assert_eq!(pool.free_block_count(), 1);
    }
}
