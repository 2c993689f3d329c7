//! Handle Pool
//!
//! Lends positional file handles over one backing file.
//!
//! ## Responsibilities
//! - Hand out a handle per operation; open a fresh one when none is idle
//! - Take handles back, closing any that no longer fit in the idle queue
//! - Periodically resize the idle queue to the observed concurrency
//!
//! ## Concurrency:
//! - `idle`: lock-free `ArrayQueue`; the surrounding RwLock is only taken
//!   exclusively when the queue is swapped for a resized one
//! - counters are atomics, a handle is owned by exactly one borrower

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam::queue::ArrayQueue;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// Idle capacity of a fresh pool
pub const INITIAL_POOL_CAPACITY: usize = 10;

/// Resized capacities are rounded up to a multiple of this
const POOL_QUANTUM: usize = 10;

/// Pool of read/write handles for a single file
pub struct HandlePool {
    path: PathBuf,
    idle: RwLock<ArrayQueue<File>>,
    in_use: AtomicUsize,
    /// High-water mark of `in_use` since the last resize
    max_in_use: AtomicUsize,
    last_resize: Mutex<Instant>,
    resize_interval: Duration,
    closed: AtomicBool,
}

impl HandlePool {
    /// Create a pool whose idle queue starts with `seed`
    pub fn seeded(path: &Path, seed: File, resize_interval: Duration) -> Self {
        let idle = ArrayQueue::new(INITIAL_POOL_CAPACITY);
        let _ = idle.push(seed);

        Self {
            path: path.to_path_buf(),
            idle: RwLock::new(idle),
            in_use: AtomicUsize::new(0),
            max_in_use: AtomicUsize::new(0),
            last_resize: Mutex::new(Instant::now()),
            resize_interval,
            closed: AtomicBool::new(false),
        }
    }

    /// Borrow a handle. It goes back to the pool when the guard drops.
    pub fn get(&self) -> io::Result<PooledHandle<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("handle pool for {} is closed", self.path.display()),
            ));
        }

        self.maybe_resize();

        let now_in_use = self.in_use.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_use.fetch_max(now_in_use, Ordering::AcqRel);

        let pooled = self.idle.read().pop();
        let file = match pooled {
            Some(file) => file,
            None => match self.open_handle() {
                Ok(file) => file,
                Err(e) => {
                    self.in_use.fetch_sub(1, Ordering::AcqRel);
                    return Err(e);
                }
            },
        };

        Ok(PooledHandle {
            pool: self,
            file: Some(file),
        })
    }

    /// Number of handles currently open (idle + borrowed)
    pub fn total(&self) -> usize {
        self.idle.read().len() + self.in_use.load(Ordering::Acquire)
    }

    /// Current idle capacity
    pub fn capacity(&self) -> usize {
        self.idle.read().capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close every idle handle; borrowed ones are closed as they come back
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let idle = self.idle.write();
        while idle.pop().is_some() {}
    }

    fn release(&self, file: File) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        // a full queue hands the file back and it is dropped (closed) here
        let _ = self.idle.read().push(file);
    }

    fn open_handle(&self) -> io::Result<File> {
        OpenOptions::new().read(true).write(true).open(&self.path)
    }

    fn maybe_resize(&self) {
        let mut last = match self.last_resize.try_lock() {
            Some(guard) => guard,
            None => return,
        };
        if last.elapsed() < self.resize_interval {
            return;
        }
        *last = Instant::now();

        let high_water = self
            .max_in_use
            .swap(self.in_use.load(Ordering::Acquire), Ordering::AcqRel);
        let capacity = quantize_capacity(high_water);

        let mut idle = self.idle.write();
        if idle.capacity() == capacity {
            return;
        }

        let resized = ArrayQueue::new(capacity);
        while let Some(file) = idle.pop() {
            // overflow handles are dropped
            let _ = resized.push(file);
        }
        debug!(
            path = %self.path.display(),
            old = idle.capacity(),
            new = capacity,
            "resized handle pool"
        );
        *idle = resized;
    }
}

/// Round a usage high-water mark up to the pool quantum (minimum one quantum)
pub fn quantize_capacity(high_water: usize) -> usize {
    let quanta = high_water.max(1).div_ceil(POOL_QUANTUM);
    quanta * POOL_QUANTUM
}

/// A borrowed handle; returned to its pool on drop
pub struct PooledHandle<'a> {
    pool: &'a HandlePool,
    file: Option<File>,
}

impl PooledHandle<'_> {
    fn file(&self) -> io::Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "handle already released"))
    }

    /// Fill `buf` from `offset`
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        positional::read_exact_at(self.file()?, buf, offset)
    }

    /// Write all of `buf` at `offset`
    pub fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        positional::write_all_at(self.file()?, buf, offset)
    }

    /// Flush file data to the device
    pub fn sync_data(&self) -> io::Result<()> {
        self.file()?.sync_data()
    }
}

impl Drop for PooledHandle<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.pool.release(file);
        }
    }
}

#[cfg(unix)]
mod positional {
    use std::fs::File;
    use std::io;
    use std::os::unix::fs::FileExt;

    pub fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
        file.read_exact_at(buf, offset)
    }

    pub fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
        file.write_all_at(buf, offset)
    }
}

#[cfg(windows)]
mod positional {
    use std::fs::File;
    use std::io;
    use std::os::windows::fs::FileExt;

    pub fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match file.seek_read(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match file.seek_write(buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole buffer",
                    ))
                }
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
