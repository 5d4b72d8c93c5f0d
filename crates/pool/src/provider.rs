//! Arena acquisition
//!
//! The pool does not decide where its backing buffer comes from: an
//! [`ArenaProvider`] is injected at construction and asked exactly once for
//! the arena, which it takes back when the pool is dropped. The default
//! [`HeapProvider`] goes through the global heap; embedded targets can hand
//! out a static buffer instead.

use core::alloc::Layout;
use core::ptr::NonNull;

use crate::block::ALIGN;
use crate::error::{PoolError, PoolResult};

/// Source of the pool's backing buffer.
///
/// Exactly two obligations: hand out one buffer of the requested size, and
/// take the same buffer back. The bytes handed out may be zeroed or
/// unspecified; the pool writes its own bookkeeping before reading anything.
pub trait ArenaProvider {
    /// Acquire a buffer of `bytes` bytes, aligned to at least 8.
    ///
    /// Failure here is fatal for pool construction.
    fn acquire(&mut self, bytes: usize) -> PoolResult<NonNull<u8>>;

    /// Release a buffer previously returned by [`acquire`](Self::acquire).
    ///
    /// # Safety
    ///
    /// `buffer` must have come from `self.acquire(bytes)` with the same
    /// `bytes`, and must not be used afterwards.
    unsafe fn release(&mut self, buffer: NonNull<u8>, bytes: usize);
}

/// Default provider: one global-heap allocation per pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapProvider;

impl ArenaProvider for HeapProvider {
    fn acquire(&mut self, bytes: usize) -> PoolResult<NonNull<u8>> {
        let layout = Layout::from_size_align(bytes, ALIGN)
            .map_err(|_| PoolError::arena_acquisition(bytes))?;

        // Zeroed, so probing a pointer into a never-written region of the
        // arena reads defined bytes (and can never look like a tagged
        // header by chance).
        // SAFETY: the pool validates capacity before acquiring, so the
        // layout is never zero-sized.
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| PoolError::arena_acquisition(bytes))
    }

    unsafe fn release(&mut self, buffer: NonNull<u8>, bytes: usize) {
        // SAFETY: `acquire` succeeded with this exact size and alignment, so
        // the layout round-trips, and the caller guarantees `buffer` came
        // from that call.
        unsafe {
            let layout = Layout::from_size_align_unchecked(bytes, ALIGN);
            std::alloc::dealloc(buffer.as_ptr(), layout);
        }
    }
}
