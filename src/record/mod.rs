//! Record Module
//!
//! Binary framing for one stored object inside a generation's data file.
//!
//! ## Responsibilities
//! - Allocate and write records, reusing a slot in place when it is big enough
//! - Load a record's sizes, key or full payload from an address
//! - Tombstone a record by rewriting its opcode
//! - Optional payload checksums
//!
//! ## Record Format
//! ```text
//! ┌────────┬──────────┬─────────┬─────────┬─────────┬─────────┐
//! │ Op (1) │ Size (4) │ Key (4) │ Len (4) │ Grp (4) │[CRC (4)]│
//! ├────────┴──────────┴─────────┴─────────┴─────────┴─────────┤
//! │ Key bytes │ Groups (8 each) │ Payload │ (slack)           │
//! └───────────────────────────────────────────────────────────┘
//! ```
//! All integers are big-endian. `Size` is the total slot size and never
//! changes after allocation, so a later, smaller put can reuse the slot.

mod codec;

pub use codec::{Loaded, Record, RecordCodec, RecordSizes, Written};

/// Opcode of a live record
pub const OPCODE_NORMAL: u8 = 0xAD;

/// Opcode of a tombstoned record
pub const OPCODE_DELETED: u8 = 0xEB;

/// Fill byte of unallocated data file space; an opcode of this value marks
/// the end of live data
pub const DEAD_BYTE: u8 = 0;

/// Fixed part of a record header, without the checksum
pub const BASE_HEADER_SIZE: usize = 1 + 4 + 4 + 4 + 4;

/// Bytes per stored group tag
pub const GROUP_SIZE: usize = 8;

/// Header length for files with or without checksums
pub fn header_size(checksums: bool) -> usize {
    if checksums {
        BASE_HEADER_SIZE + 4
    } else {
        BASE_HEADER_SIZE
    }
}

/// How much of a record `RecordCodec::load` reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Header only
    SizesOnly,
    /// Header, key and group tags
    KeyOnly,
    /// Everything, verifying the checksum if enabled
    Full,
}

/// Payload checksum: `h = 31 * h + b` over signed bytes with wrapping
/// 32-bit arithmetic. Not a CRC; kept for on-disk compatibility.
pub fn checksum(data: &[u8]) -> i32 {
    data.iter()
        .fold(0i32, |h, &b| h.wrapping_mul(31).wrapping_add(b as i8 as i32))
}
