//! Index Log Replay
//!
//! Sequential read of an index log at startup.
//!
//! ## Responsibilities
//! - Decode entries in order and hand them to the caller
//! - Stop at the first null byte and report it as the logical end
//! - Fail the load on a bad marker or a truncated entry
//! - Publish percent-done as bytes consumed / file length

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::error::{GenCacheError, Result};

use super::log::{LogEntry, MAGIC_BYTE, MAGIC_INT, NULL_BYTE};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// What a replay found
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub entries: u64,
    /// Offset of the first byte after the last entry
    pub logical_end: u64,
    /// Highest non-negative data address named by any entry
    pub max_address: Option<u64>,
}

/// Replay the log at `path`, calling `apply` for each entry in order.
/// A missing file is an empty log.
pub fn replay<F>(path: &Path, progress: &AtomicU32, mut apply: F) -> Result<ReplaySummary>
where
    F: FnMut(LogEntry),
{
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            progress.store(100, Ordering::Release);
            return Ok(ReplaySummary::default());
        }
        Err(e) => return Err(e.into()),
    };
    let file_len = file.metadata()?.len();
    let length = file_len.max(1);
    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    let mut summary = ReplaySummary::default();
    let mut offset: u64 = 0;

    loop {
        let marker = match read_byte(&mut reader)? {
            Some(byte) => byte,
            None => break,
        };
        match marker {
            NULL_BYTE => break,
            MAGIC_BYTE => {}
            other => {
                return Err(GenCacheError::Corruption(format!(
                    "bad magic byte 0x{:02X} at offset {} of {}",
                    other,
                    offset,
                    path.display()
                )))
            }
        }

        let remaining = file_len.saturating_sub(offset + 1);
        let (entry, consumed) = read_entry(&mut reader, remaining).map_err(|e| match e {
            GenCacheError::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                GenCacheError::Corruption(format!(
                    "truncated entry at offset {} of {}",
                    offset,
                    path.display()
                ))
            }
            GenCacheError::Corruption(reason) => GenCacheError::Corruption(format!(
                "{} at offset {} of {}",
                reason,
                offset,
                path.display()
            )),
            other => other,
        })?;
        offset += 1 + consumed;

        if entry.address >= 0 {
            let address = entry.address as u64;
            summary.max_address = Some(summary.max_address.map_or(address, |max| max.max(address)));
        }
        summary.entries += 1;
        apply(entry);

        progress.store(((offset * 100) / length).min(100) as u32, Ordering::Release);
    }

    summary.logical_end = offset;
    progress.store(100, Ordering::Release);
    debug!(
        path = %path.display(),
        entries = summary.entries,
        logical_end = summary.logical_end,
        "replayed index log"
    );
    Ok(summary)
}

fn read_byte<R: Read>(reader: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read the rest of an entry after its magic byte; returns it with the
/// number of bytes consumed. Lengths larger than the `remaining` bytes of
/// the file are corruption, never an allocation.
fn read_entry<R: Read>(reader: &mut R, remaining: u64) -> Result<(LogEntry, u64)> {
    if read_u32(reader)? != MAGIC_INT {
        return Err(GenCacheError::Corruption("bad magic int".to_string()));
    }

    let key_len = read_i32(reader)?;
    if key_len <= 0 || key_len as u64 > remaining {
        return Err(GenCacheError::Corruption(format!("bad key length {}", key_len)));
    }
    let mut key = vec![0u8; key_len as usize];
    reader.read_exact(&mut key)?;
    let key = String::from_utf8(key)
        .map_err(|_| GenCacheError::Corruption("key is not UTF-8".to_string()))?;

    let address = read_i64(reader)?;
    let ttl_delta = read_i32(reader)?;
    let group_count = read_i32(reader)?;
    if group_count < 0 || group_count as u64 * 8 > remaining {
        return Err(GenCacheError::Corruption(format!("bad group count {}", group_count)));
    }
    let mut groups = Vec::new();
    for _ in 0..group_count {
        groups.push(read_i64(reader)?);
    }

    let consumed = 4 + 4 + key_len as u64 + 8 + 4 + 4 + group_count as u64 * 8;
    Ok((
        LogEntry {
            key,
            address,
            ttl_delta,
            groups,
        },
        consumed,
    ))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_be_bytes(buf))
}
