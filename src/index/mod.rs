//! Index Module
//!
//! Everything a generation knows about its keys, held fully in memory and
//! made durable through an append-only log.
//!
//! ## Responsibilities
//! - Key index: key -> slot, TTL delta, groups, newest unwritten payload
//! - Group index: group id -> member keys
//! - Bounded payload cache in front of the data file
//! - Index log append and startup replay

mod cache;
mod entry;
mod groups;
mod log;
mod replay;
mod table;

pub use cache::PayloadCache;
pub use entry::{IndexEntry, Slot};
pub use groups::GroupIndex;
pub use log::{encode_entry, IndexLog, LogEntry, MAGIC_BYTE, MAGIC_INT, NULL_BYTE};
pub use replay::{replay, ReplaySummary};
pub use table::{EntryRef, KeyIndex, INDEX_BASE_SIZE};
