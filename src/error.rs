//! Error types for cache operations.

use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache has been shut down; the operation was not performed.
    #[error("cache is shut down")]
    Shutdown,

    /// Insert rejected: it would push usage past the hard limit.
    /// Eviction in the target bucket could not free sufficient space.
    #[error("over capacity")]
    OverCapacity,

    /// A bucket lock could not be acquired within the retry budget.
    /// Transient; the caller may retry or treat the operation as a miss.
    #[error("bucket busy")]
    BucketBusy,

    /// Key not found (for find/remove operations).
    #[error("key not found")]
    NotFound,

    /// Insert rejected: the fingerprint is banished for the current term.
    /// Only returned by transactional caches.
    #[error("fingerprint banished for current term")]
    Banished,

    /// Operation not supported by this cache variant.
    #[error("operation not supported")]
    Unsupported,
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
