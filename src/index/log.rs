//! Index Log
//!
//! Append-only record of key -> location metadata. It is the only durable
//! source of the key index; the data file is never scanned for keys.
//!
//! ## Entry Format
//! ```text
//! ┌───────────┬────────────┬─────────────┬─────┬──────────────┬─────────┬─────────┬────────────┐
//! │ 0xBF (1)  │ CAFEBABE(4)│ KeyLen (4)  │ Key │ Address (8)  │ TTL (4) │ Grp (4) │ Groups ... │
//! └───────────┴────────────┴─────────────┴─────┴──────────────┴─────────┴─────────┴────────────┘
//! ```
//! Unused space is filled with `NULL_BYTE`; meeting one where a marker is
//! expected is the logical end of the log.

use std::path::Path;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::error::Result;
use crate::file::BlockFile;

/// First byte of every entry
pub const MAGIC_BYTE: u8 = 0xBF;

/// Follows the magic byte
pub const MAGIC_INT: u32 = 0xCAFE_BABE;

/// Fill byte of unused log space
pub const NULL_BYTE: u8 = 0;

/// One decoded log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub key: String,
    /// Data file offset, or a negative sentinel (-1 = removed)
    pub address: i64,
    pub ttl_delta: i32,
    pub groups: Vec<i64>,
}

/// Encode one entry
pub fn encode_entry(key: &str, address: i64, ttl_delta: i32, groups: &[i64]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(1 + 4 + 4 + key.len() + 8 + 4 + 4 + groups.len() * 8);
    buf.put_u8(MAGIC_BYTE);
    buf.put_u32(MAGIC_INT);
    buf.put_i32(key.len() as i32);
    buf.put_slice(key.as_bytes());
    buf.put_i64(address);
    buf.put_i32(ttl_delta);
    buf.put_i32(groups.len() as i32);
    for group in groups {
        buf.put_i64(*group);
    }
    buf
}

/// Appender for one generation's index log
pub struct IndexLog {
    file: BlockFile,
}

impl IndexLog {
    pub fn open(path: &Path, chunk_size: u64, resize_interval: Duration) -> Result<Self> {
        Ok(Self {
            file: BlockFile::open(path, chunk_size, NULL_BYTE, resize_interval)?,
        })
    }

    /// Durably record the current location and metadata of `key`
    pub fn append(&self, key: &str, address: i64, ttl_delta: i32, groups: &[i64]) -> Result<()> {
        let entry = encode_entry(key, address, ttl_delta, groups);
        let offset = self.file.allocate(entry.len() as u64)?;
        self.file.write_all_at(&entry, offset)?;
        trace!(key, address, offset, "appended index entry");
        Ok(())
    }

    /// Mark where replay found the end of the log
    pub fn set_logical_end(&self, end: u64) {
        self.file.truncate_logical(end);
    }

    pub fn logical_size(&self) -> u64 {
        self.file.logical_size()
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn close(&self) -> Result<()> {
        self.file.close()
    }
}
