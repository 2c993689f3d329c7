//! # gencache
//!
//! A generational, append-mostly key-value storage engine for a cache
//! server:
//! - Records appended to pre-allocated data files, rewritten in place when
//!   they fit
//! - An append-only index log per data file, replayed into memory at startup
//! - Write coalescing on a background thread per generation
//! - Expiry by deleting whole generations instead of compacting records
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Storage                              │
//! │         (generation chain, rotation, driver callbacks)       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ newest takes writes, reads scan newest → oldest
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Generation                             │
//! │        (key index, group index, payload cache, queue)        │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//!   ┌─────────────┐      ┌─────────────┐         ┌─────────────┐
//!   │  Pipeline   │      │   Record    │         │  Index Log  │
//!   │ (coalesce)  │─────►│   Codec     │         │  (append)   │
//!   └─────────────┘      └──────┬──────┘         └──────┬──────┘
//!                               │                       │
//!                               ▼                       ▼
//!                        ┌─────────────────────────────────────┐
//!                        │     BlockFile + HandlePool           │
//!                        │  (chunked growth, positional I/O)    │
//!                        └─────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod clock;
pub mod config;
pub mod error;

pub mod file;
pub mod generation;
pub mod index;
pub mod pipeline;
pub mod record;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, ConfigBuilder};
pub use error::{GenCacheError, Result};
pub use generation::{Generation, Lookup, StoredObject};
pub use storage::{Storage, StorageDriver, TracingDriver};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of gencache
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
