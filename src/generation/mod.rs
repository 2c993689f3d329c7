//! Generation Module
//!
//! A generation is the unit of expiry: one data file, one index log and the
//! in-memory state rebuilt from them. Whole generations are deleted instead
//! of compacting individual records.
//!
//! ## Data File Layout
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ Header (1024 bytes)                        │
//! │ ┌─────────────┬──────────┬───────────────┐ │
//! │ │ Version (4) │ CRCs (1) │ Created (8)   │ │
//! │ └─────────────┴──────────┴───────────────┘ │
//! ├────────────────────────────────────────────┤
//! │ Record │ Record │ ... │ dead bytes         │
//! └────────────────────────────────────────────┘
//! ```

mod header;
mod instance;
mod usage;

pub use header::{DataHeader, DATA_FORMAT_VERSION, HEADER_SIZE};
pub use instance::{
    generation_stem, parse_stamp, Generation, GenerationState, GenerationStats, Lookup,
    StoredObject,
};
pub use usage::{UseCounter, UseGuard};
