//! Error types for blockpool
//!
//! Uses thiserror for clean, idiomatic Rust error definitions. Every fallible
//! pool operation reports failure through [`PoolError`]; nothing in the public
//! API panics on malformed input.

use thiserror::Error;

#[cfg(feature = "logging")]
use tracing::warn;

/// Pool allocator errors
#[must_use = "errors should be handled"]
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// No block can satisfy the request. Raised both when the aggregate free
    /// byte count is too low and when enough bytes exist but are fragmented
    /// across undersized blocks; callers cannot tell the two apart without
    /// inspecting diagnostics.
    #[error("pool exhausted: requested {requested} bytes, {available} bytes free")]
    Exhausted { requested: usize, available: usize },

    /// The pointer handed to `release`/`resize` is not a live allocation of
    /// this pool: out of the arena's range, missing the magic tag, already
    /// free (double free), or with inconsistent list links (corruption).
    /// The pool's state is untouched whenever this is returned.
    #[error("invalid pointer: not a live allocation of this pool")]
    InvalidPointer,

    /// The requested type needs stricter alignment than the pool guarantees.
    #[error("alignment {align} exceeds the pool's {max}-byte guarantee")]
    UnsupportedAlignment { align: usize, max: usize },

    /// The arena is too small to hold even one header plus one payload.
    #[error("invalid capacity: {requested} bytes (minimum {minimum})")]
    InvalidCapacity { requested: usize, minimum: usize },

    /// The arena provider could not supply the backing buffer. Fatal for
    /// construction: the pool never exists without its arena.
    #[error("failed to acquire a {bytes}-byte arena")]
    ArenaAcquisition { bytes: usize },
}

impl PoolError {
    /// Check if error is retryable (after releasing memory back to the pool)
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Get error code for categorization
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Exhausted { .. } => "POOL:ALLOC:EXHAUSTED",
            Self::InvalidPointer => "POOL:RELEASE:INVALID",
            Self::UnsupportedAlignment { .. } => "POOL:ALLOC:ALIGN",
            Self::InvalidCapacity { .. } => "POOL:CONFIG:CAPACITY",
            Self::ArenaAcquisition { .. } => "POOL:ARENA:ACQUIRE",
        }
    }

    /// Create an exhaustion error
    pub fn exhausted(requested: usize, available: usize) -> Self {
        Self::Exhausted {
            requested,
            available,
        }
    }

    /// Create an invalid pointer error
    pub fn invalid_pointer() -> Self {
        #[cfg(feature = "logging")]
        warn!("release/resize rejected: pointer is not a live allocation");

        Self::InvalidPointer
    }

    /// Create an unsupported alignment error
    pub fn unsupported_alignment(align: usize, max: usize) -> Self {
        Self::UnsupportedAlignment { align, max }
    }

    /// Create an invalid capacity error
    pub fn invalid_capacity(requested: usize, minimum: usize) -> Self {
        Self::InvalidCapacity { requested, minimum }
    }

    /// Create an arena acquisition error
    pub fn arena_acquisition(bytes: usize) -> Self {
        #[cfg(feature = "logging")]
        warn!(bytes, "arena acquisition failed");

        Self::ArenaAcquisition { bytes }
    }
}

/// Result type for pool operations
pub type PoolResult<T> = core::result::Result<T, PoolError>;
