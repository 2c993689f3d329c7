//! Error types for gencache
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using GenCacheError
pub type Result<T> = std::result::Result<T, GenCacheError>;

/// Unified error type for gencache operations
#[derive(Debug, Error)]
pub enum GenCacheError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The allocator could not extend a backing file (disk full or similar)
    #[error("cannot grow {path}: {source}")]
    CannotGrow {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not delete {path}: {source}")]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("checksum mismatch at address {address}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        address: u64,
        expected: i32,
        actual: i32,
    },

    /// Header version differs from the one this build writes
    #[error("{path} is an old version ({version}) and will be ignored")]
    OldFormat { path: PathBuf, version: i32 },

    // -------------------------------------------------------------------------
    // Write Pipeline Errors
    // -------------------------------------------------------------------------
    /// A queued write failed on the writer thread; surfaced on the next put
    #[error("background write failed: {0}")]
    BackgroundWrite(Box<GenCacheError>),

    // -------------------------------------------------------------------------
    // Caller Errors
    // -------------------------------------------------------------------------
    #[error("keys must not be empty")]
    EmptyKey,

    #[error("zero-sized objects are not supported")]
    EmptyPayload,

    #[error("record of {size} bytes does not fit the on-disk size fields")]
    TooLarge { size: usize },

    #[error("invalid key pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("storage is closed")]
    Closed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GenCacheError {
    /// True when this error (or the background error it wraps) means the
    /// allocator ran out of space.
    pub fn is_space_exhaustion(&self) -> bool {
        match self {
            GenCacheError::CannotGrow { .. } => true,
            GenCacheError::BackgroundWrite(inner) => inner.is_space_exhaustion(),
            _ => false,
        }
    }
}
