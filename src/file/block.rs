//! Block Allocator
//!
//! A growable backing file that hands out contiguous byte ranges.
//!
//! ## Responsibilities
//! - Serialize allocation behind a single mutex
//! - Extend the file in whole chunks, pre-filled with a sentinel byte
//! - Track the logical size (bytes handed out) apart from the actual size
//! - Positional reads/writes of allocated ranges through the handle pool
//!
//! ## Layout
//! ```text
//! 0                        logical                      actual
//! ├──────── allocated ────────┼──────── fill bytes ───────┤
//! ```

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{GenCacheError, Result};

use super::pool::HandlePool;

/// Default growth quantum (16 MB)
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Size of the buffer used to write fill bytes (1 MB)
const FILL_BUFFER_SIZE: usize = 1024 * 1024;

struct Extent {
    logical: u64,
    actual: u64,
}

/// A file that grows by allocation only
pub struct BlockFile {
    path: PathBuf,
    pool: HandlePool,
    extent: Mutex<Extent>,
    logical: AtomicU64,
    actual: AtomicU64,
    chunk_size: u64,
    fill_byte: u8,
}

impl BlockFile {
    /// Open (creating if needed) a block file. An existing file starts out
    /// with its logical size equal to its physical length.
    pub fn open(path: &Path, chunk_size: u64, fill_byte: u8, resize_interval: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let actual = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            pool: HandlePool::seeded(path, file, resize_interval),
            extent: Mutex::new(Extent {
                logical: actual,
                actual,
            }),
            logical: AtomicU64::new(actual),
            actual: AtomicU64::new(actual),
            chunk_size: chunk_size.max(1),
            fill_byte,
        })
    }

    /// Reserve `size` contiguous bytes and return their offset
    pub fn allocate(&self, size: u64) -> Result<u64> {
        let mut extent = self.extent.lock();

        let address = extent.logical;
        let end = address + size;
        if end > extent.actual {
            let grow = quantize(end - extent.actual, self.chunk_size);
            self.fill(extent.actual, grow)
                .map_err(|source| GenCacheError::CannotGrow {
                    path: self.path.clone(),
                    source,
                })?;
            extent.actual += grow;
            self.actual.store(extent.actual, Ordering::Release);
            debug!(path = %self.path.display(), actual = extent.actual, "extended file");
        }

        extent.logical = end;
        self.logical.store(end, Ordering::Release);
        trace!(address, size, "allocated");
        Ok(address)
    }

    /// Pull the logical end back to `size`. Only ever moves downward; used
    /// at load time once the real end of the live data is known.
    pub fn truncate_logical(&self, size: u64) {
        let mut extent = self.extent.lock();
        if size < extent.logical {
            debug!(
                path = %self.path.display(),
                from = extent.logical,
                to = size,
                "reset logical size"
            );
            extent.logical = size;
            self.logical.store(size, Ordering::Release);
        }
    }

    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        self.pool.get()?.read_exact_at(buf, offset)
    }

    pub fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.pool.get()?.write_all_at(buf, offset)
    }

    /// Bytes handed out so far
    pub fn logical_size(&self) -> u64 {
        self.logical.load(Ordering::Acquire)
    }

    /// Bytes physically present
    pub fn actual_size(&self) -> u64 {
        self.actual.load(Ordering::Acquire)
    }

    /// Handles currently open on this file
    pub fn pool_size(&self) -> usize {
        self.pool.total()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and release every handle
    pub fn close(&self) -> Result<()> {
        if self.pool.is_closed() {
            return Ok(());
        }
        let synced = self.pool.get().and_then(|handle| handle.sync_data());
        self.pool.close();
        synced?;
        Ok(())
    }

    fn fill(&self, from: u64, len: u64) -> io::Result<()> {
        let buffer = vec![self.fill_byte; FILL_BUFFER_SIZE.min(len as usize)];
        let handle = self.pool.get()?;

        let mut offset = from;
        let end = from + len;
        while offset < end {
            let n = (end - offset).min(buffer.len() as u64) as usize;
            handle.write_all_at(&buffer[..n], offset)?;
            offset += n as u64;
        }
        Ok(())
    }
}

/// Round a shortfall up to whole chunks, always leaving some headroom
pub fn quantize(needed: u64, chunk_size: u64) -> u64 {
    ((needed / chunk_size) + 1) * chunk_size
}
