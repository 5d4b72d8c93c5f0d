//! Read-only diagnostics
//!
//! Everything here walks the circular block list from the head back around
//! to the head without mutating anything: the [`Blocks`] iterator yields raw
//! block metadata, [`PoolStats`] aggregates one traversal, and
//! [`MemoryPool::dump`] renders a human-readable report, optionally with a
//! caller-supplied formatter for in-use payloads.

use core::fmt::{self, Write};
use core::ptr::NonNull;

use super::MemoryPool;
use crate::block::{BlockHeader, FLAG_USED, HEADER_SIZE};
use crate::provider::ArenaProvider;

/// State of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Available for allocation.
    Free,
    /// Carries a live payload.
    Used,
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Used => write!(f, "used"),
        }
    }
}

/// Metadata for one block, as yielded by [`MemoryPool::blocks`].
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    /// Address of the block header.
    pub header: usize,
    /// Start of the payload, one header past `header`.
    pub payload: NonNull<u8>,
    /// Payload byte count (header excluded).
    pub payload_size: usize,
    /// Free or used.
    pub state: BlockState,
}

impl BlockInfo {
    /// Exclusive end address of the block (header plus payload).
    pub fn end(&self) -> usize {
        self.header + HEADER_SIZE + self.payload_size
    }

    /// Total footprint including the header.
    pub fn footprint(&self) -> usize {
        HEADER_SIZE + self.payload_size
    }
}

/// Iterator over a pool's blocks in address order.
///
/// Follows the circular list exactly one lap; the single-block self-loop
/// falls out of the same termination condition.
pub struct Blocks<'a, P: ArenaProvider> {
    pool: &'a MemoryPool<P>,
    next: Option<NonNull<BlockHeader>>,
}

impl<'a, P: ArenaProvider> Iterator for Blocks<'a, P> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let cur = self.next?;
        // SAFETY: the iterator borrows the pool, so the list cannot change
        // underneath it and every link holds a live header.
        unsafe {
            let h = cur.as_ptr();
            let succ = NonNull::new_unchecked((*h).next);
            self.next = if succ == self.pool.head {
                None
            } else {
                Some(succ)
            };

            Some(BlockInfo {
                header: h as usize,
                payload: NonNull::new_unchecked(cur.as_ptr().cast::<u8>().add(HEADER_SIZE)),
                payload_size: (*h).size,
                state: if (*h).flag == FLAG_USED {
                    BlockState::Used
                } else {
                    BlockState::Free
                },
            })
        }
    }
}

/// Aggregate snapshot of a pool, computed by one block traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Arena capacity in bytes.
    pub capacity: usize,
    /// Aggregate free bytes (headers of free blocks included).
    pub free_bytes: usize,
    /// Number of free blocks.
    pub free_blocks: usize,
    /// Number of used blocks.
    pub used_blocks: usize,
    /// Largest free payload: the biggest request that can still succeed.
    pub largest_free: usize,
}

impl<P: ArenaProvider> MemoryPool<P> {
    /// Iterate over all blocks in address order. Read-only.
    pub fn blocks(&self) -> Blocks<'_, P> {
        Blocks {
            pool: self,
            next: Some(self.head),
        }
    }

    /// Number of free blocks currently in the arena.
    pub fn free_block_count(&self) -> usize {
        self.blocks()
            .filter(|b| b.state == BlockState::Free)
            .count()
    }

    /// Aggregate snapshot of the pool's current shape.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            capacity: self.capacity(),
            free_bytes: self.free_bytes(),
            ..PoolStats::default()
        };
        for b in self.blocks() {
            match b.state {
                BlockState::Free => {
                    stats.free_blocks += 1;
                    stats.largest_free = stats.largest_free.max(b.payload_size);
                }
                BlockState::Used => stats.used_blocks += 1,
            }
        }
        stats
    }

    /// Write a human-readable report of every block to `out`.
    pub fn dump<W: Write>(&self, out: &mut W) -> fmt::Result {
        self.dump_inner(out, None)
    }

    /// Like [`dump`](Self::dump), with a caller-supplied formatter rendering
    /// the payload of each used block. The formatter receives the payload
    /// address and size; it is never called for free blocks.
    ///
    /// # Example
    ///
    /// ```
    /// use blockpool::MemoryPool;
    ///
    /// let mut pool = MemoryPool::with_capacity(4096).unwrap();
    /// let v = pool.alloc_value(100_i32).unwrap();
    ///
    /// let mut report = String::new();
    /// pool.dump_with(&mut report, |payload, _size| {
    ///     format!("i32 = {}", unsafe { payload.cast::<i32>().read() })
    /// })
    /// .unwrap();
    /// assert!(report.contains("i32 = 100"));
    /// # pool.release(v).unwrap();
    /// ```
    pub fn dump_with<W, F>(&self, out: &mut W, formatter: F) -> fmt::Result
    where
        W: Write,
        F: Fn(NonNull<u8>, usize) -> String,
    {
        self.dump_inner(out, Some(&formatter))
    }

    fn dump_inner(
        &self,
        out: &mut dyn Write,
        formatter: Option<&dyn Fn(NonNull<u8>, usize) -> String>,
    ) -> fmt::Result {
        let stats = self.stats();
        writeln!(out, "--------------------------------------------------")?;
        writeln!(
            out,
            "pool | capacity: {} bytes ({}-byte headers)",
            stats.capacity, HEADER_SIZE
        )?;
        writeln!(
            out,
            "pool | free:     {} bytes across {} block(s)",
            stats.free_bytes, stats.free_blocks
        )?;
        for b in self.blocks() {
            write!(
                out,
                "pool | [{:#014x}-{:#014x}] payload {:5} bytes, {}",
                b.header,
                b.end(),
                b.payload_size,
                b.state
            )?;
            match (b.state, formatter) {
                (BlockState::Used, Some(f)) => writeln!(out, ": {}", f(b.payload, b.payload_size))?,
                _ => writeln!(out)?,
            }
        }
        writeln!(out, "--------------------------------------------------")
    }
}
