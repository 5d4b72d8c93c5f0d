//! Pool configuration

use crate::block::{ALIGN, HEADER_SIZE, align8};
use crate::error::{PoolError, PoolResult};

/// Default arena capacity in bytes (4 KiB).
pub const DEFAULT_CAPACITY: usize = 4096;

/// Configuration for a [`MemoryPool`](crate::pool::MemoryPool)
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Arena capacity in bytes. Rounded up to a multiple of 8 at
    /// construction; must fit at least one header plus one aligned payload.
    pub capacity: usize,

    /// Fill pattern byte for newly allocated payloads (for debugging)
    pub alloc_pattern: Option<u8>,
    /// Fill pattern byte for released payloads (for debugging)
    pub dealloc_pattern: Option<u8>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            alloc_pattern: if cfg!(debug_assertions) {
                Some(0xBB)
            } else {
                None
            },
            dealloc_pattern: if cfg!(debug_assertions) {
                Some(0xDD)
            } else {
                None
            },
        }
    }
}

impl PoolConfig {
    /// Configuration with the given capacity and default patterns
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Production configuration - no fill patterns
    #[must_use]
    pub fn production(capacity: usize) -> Self {
        Self {
            capacity,
            alloc_pattern: None,
            dealloc_pattern: None,
        }
    }

    /// Debug configuration - poison allocated and released payloads
    #[must_use]
    pub fn debug(capacity: usize) -> Self {
        Self {
            capacity,
            alloc_pattern: Some(0xBB),
            dealloc_pattern: Some(0xDD),
        }
    }

    /// Validate and return the effective (8-aligned) capacity.
    pub(crate) fn effective_capacity(&self) -> PoolResult<usize> {
        let minimum = HEADER_SIZE + ALIGN;
        // the upper bound keeps the round-up from overflowing and matches
        // what `Layout` will accept anyway
        if self.capacity < minimum || self.capacity > isize::MAX as usize - ALIGN {
            return Err(PoolError::invalid_capacity(self.capacity, minimum));
        }
        Ok(align8(self.capacity))
    }
}
