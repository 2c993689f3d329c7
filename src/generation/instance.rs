//! Generation
//!
//! One data file + index log pair and everything held in memory for it.
//!
//! ## State Machine
//! ```text
//!   open_existing ──► Loading ──load()──┐
//!                                       ▼
//!   create ───────────────────────────► Open ──close()──► Closing ──► Closed
//! ```
//! Operations register with a use counter before checking the state, so
//! `close` can wait for every operation that saw `Open` to finish before it
//! stops the writer and closes the files.
//!
//! ## Read Path
//! active pending put ─► entry (unwritten payload) ─► payload cache ─► disk

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, error, info, trace, warn};

use crate::clock;
use crate::config::Config;
use crate::error::{GenCacheError, Result};
use crate::file::BlockFile;
use crate::index::{
    replay, EntryRef, GroupIndex, IndexEntry, IndexLog, KeyIndex, LogEntry, PayloadCache, Slot,
};
use crate::pipeline::{spawn_writer, CoalescingQueue, PendingPut};
use crate::record::{LoadMode, Loaded, RecordCodec, DEAD_BYTE};

use super::header::{DataHeader, HEADER_SIZE};
use super::usage::{UseCounter, UseGuard};

// =============================================================================
// Public Types
// =============================================================================

/// Lifecycle of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GenerationState {
    Loading = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl GenerationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => GenerationState::Loading,
            1 => GenerationState::Open,
            2 => GenerationState::Closing,
            _ => GenerationState::Closed,
        }
    }
}

/// A stored payload and its absolute expiry (epoch millis)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    pub ttl: i64,
}

/// Result of looking a key up in one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(StoredObject),
    /// Removed here; older generations must not answer for this key
    Deleted,
    /// Present but past its TTL
    Expired,
    /// Not known to this generation
    Missing,
}

/// Point-in-time counters of one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationStats {
    pub name: String,
    pub creation: i64,
    pub checksums: bool,
    pub logical_size: u64,
    pub actual_size: u64,
    pub pool_size: usize,
    pub object_count: usize,
    pub index_size: i64,
    pub groups_size: i64,
    pub memory_gets: u64,
    pub disk_gets: u64,
    pub put_overflows: u64,
    pub queue_depth: usize,
    pub purged: u64,
    pub cached_bytes: usize,
}

/// The put currently being written, readable without the entry lock
struct ActivePut {
    key: String,
    data: Bytes,
    ttl: i64,
}

// =============================================================================
// Generation
// =============================================================================

pub struct Generation {
    name: String,
    data_path: PathBuf,
    index_path: PathBuf,
    creation: i64,
    state: AtomicU8,
    uses: UseCounter,

    data: Arc<BlockFile>,
    codec: RecordCodec,
    log: IndexLog,
    index: KeyIndex,
    groups: GroupIndex,
    cache: PayloadCache,

    queue: Option<Arc<CoalescingQueue>>,
    writer: Mutex<Option<JoinHandle<()>>>,
    active: Mutex<Option<Arc<ActivePut>>>,
    /// Failure of a queued write, reported to the next put
    pending_error: Mutex<Option<GenCacheError>>,

    memory_gets: AtomicU64,
    disk_gets: AtomicU64,
    put_overflows: AtomicU64,
    purged: AtomicU64,
}

impl Generation {
    /// Create a brand new, empty generation in `config.data_dir`
    pub fn create(config: &Config) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.data_dir)?;

        let creation = clock::now_millis();
        let mut stamp = creation as u64;
        let (data_path, index_path) = loop {
            let stem = generation_stem(&config.file_prefix, stamp);
            let data_path = config.data_dir.join(format!("{}{}", stem, config.data_extension));
            let index_path = config.data_dir.join(format!("{}{}", stem, config.index_extension));
            if !data_path.exists() && !index_path.exists() {
                break (data_path, index_path);
            }
            stamp += 1;
        };

        let data = Arc::new(BlockFile::open(
            &data_path,
            config.allocation_chunk_size,
            DEAD_BYTE,
            config.handle_pool_resize_interval,
        )?);
        let header = DataHeader::new(config.use_checksums, creation);
        header.write_to(&data)?;
        let log = IndexLog::open(
            &index_path,
            config.allocation_chunk_size,
            config.handle_pool_resize_interval,
        )?;

        let generation = Arc::new(Self::assemble(config, data_path, index_path, header, data, log));
        generation.start()?;
        info!(
            generation = %generation.name,
            checksums = header.checksums,
            "created generation"
        );
        Ok(generation)
    }

    /// Open an existing generation from its data file. The generation stays
    /// in `Loading` until [`Generation::load`] has replayed its index.
    pub fn open_existing(config: &Config, data_path: &Path) -> Result<Arc<Self>> {
        let index_path = data_path.with_extension(config.index_extension.trim_start_matches('.'));

        let data = Arc::new(BlockFile::open(
            data_path,
            config.allocation_chunk_size,
            DEAD_BYTE,
            config.handle_pool_resize_interval,
        )?);
        let header = DataHeader::read_from(&data, data_path)?;
        let log = IndexLog::open(
            &index_path,
            config.allocation_chunk_size,
            config.handle_pool_resize_interval,
        )?;

        let generation = Self::assemble(config, data_path.to_path_buf(), index_path, header, data, log);
        generation.state.store(GenerationState::Loading as u8, Ordering::Release);
        Ok(Arc::new(generation))
    }

    fn assemble(
        config: &Config,
        data_path: PathBuf,
        index_path: PathBuf,
        header: DataHeader,
        data: Arc<BlockFile>,
        log: IndexLog,
    ) -> Self {
        let name = data_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let queue = (config.background_put_length > 0)
            .then(|| Arc::new(CoalescingQueue::new(config.background_put_length)));

        Self {
            name,
            data_path,
            index_path,
            creation: header.creation,
            state: AtomicU8::new(GenerationState::Loading as u8),
            uses: UseCounter::new(),
            codec: RecordCodec::new(Arc::clone(&data), header.checksums),
            data,
            log,
            index: KeyIndex::new(),
            groups: GroupIndex::new(),
            cache: PayloadCache::new(config.payload_cache_bytes),
            queue,
            writer: Mutex::new(None),
            active: Mutex::new(None),
            pending_error: Mutex::new(None),
            memory_gets: AtomicU64::new(0),
            disk_gets: AtomicU64::new(0),
            put_overflows: AtomicU64::new(0),
            purged: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Replay the index log, find the end of the live data and start
    /// serving. `progress` receives percent done.
    pub fn load(self: &Arc<Self>, progress: &AtomicU32) -> Result<()> {
        if self.state() != GenerationState::Loading {
            progress.store(100, Ordering::Release);
            return Ok(());
        }

        let summary = replay(&self.index_path, progress, |entry| self.apply_logged(entry))?;
        self.log.set_logical_end(summary.logical_end);
        self.reclaim_tail(summary.max_address);
        self.start()?;

        info!(
            generation = %self.name,
            entries = summary.entries,
            objects = self.index.len(),
            logical_size = self.data.logical_size(),
            "loaded generation"
        );
        Ok(())
    }

    fn start(self: &Arc<Self>) -> Result<()> {
        if let Some(queue) = &self.queue {
            let generation = Arc::clone(self);
            let handle = spawn_writer(
                format!("{}-writer", self.name),
                Arc::clone(queue),
                move |put| generation.process_queued(put),
            )?;
            *self.writer.lock() = Some(handle);
        }
        self.state.store(GenerationState::Open as u8, Ordering::Release);
        Ok(())
    }

    fn apply_logged(&self, entry: LogEntry) {
        let LogEntry {
            key,
            address,
            ttl_delta,
            groups,
        } = entry;

        let previous = self
            .index
            .insert(&key, IndexEntry::from_log(address, ttl_delta, groups.clone()));
        let old_groups = previous
            .map(|previous| std::mem::take(&mut previous.lock().groups))
            .unwrap_or_default();
        self.groups.replace(&key, &old_groups, &groups);
    }

    /// Walk records past the highest logged address until the dead byte and
    /// pull the data file's logical size back to that point
    fn reclaim_tail(&self, max_address: Option<u64>) {
        let mut address = max_address.unwrap_or(0).max(HEADER_SIZE as u64);
        loop {
            match self.codec.load(address, LoadMode::SizesOnly) {
                Ok(Loaded::Dead) => break,
                Ok(loaded) => match loaded.record_size() {
                    Some(size) => address += size as u64,
                    None => break,
                },
                Err(error) => {
                    warn!(
                        generation = %self.name,
                        address,
                        %error,
                        "unreadable data past the index; not reusing the file tail"
                    );
                    return;
                }
            }
        }
        self.data.truncate_logical(address);
    }

    /// Wait for in-flight operations, drain the write queue and close both
    /// files. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let previous = GenerationState::from_u8(
            self.state
                .swap(GenerationState::Closing as u8, Ordering::AcqRel),
        );
        if matches!(previous, GenerationState::Closing | GenerationState::Closed) {
            self.state.store(previous as u8, Ordering::Release);
            return Ok(());
        }

        self.uses.wait_idle();

        if let Some(queue) = &self.queue {
            debug!(generation = %self.name, queued = queue.len(), "draining write queue");
            queue.close();
        }
        let writer = self.writer.lock().take();
        let joined = match writer {
            Some(handle) => handle
                .join()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "writer thread panicked")),
            None => Ok(()),
        };

        let data = self.data.close();
        let log = self.log.close();
        self.cache.clear();
        self.state.store(GenerationState::Closed as u8, Ordering::Release);
        debug!(generation = %self.name, "closed generation");

        joined?;
        data?;
        log?;
        Ok(())
    }

    /// Close, then unlink both files
    pub fn delete(&self) -> Result<()> {
        self.close()?;
        for path in [&self.index_path, &self.data_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(GenCacheError::DeleteFailed {
                        path: path.clone(),
                        source,
                    })
                }
            }
        }
        info!(generation = %self.name, "deleted generation");
        Ok(())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Look up `key`
    pub fn get(&self, key: &str) -> Result<Lookup> {
        let _use = match self.enter() {
            Some(guard) => guard,
            None => return Ok(Lookup::Missing),
        };

        let active = self.active.lock().clone();
        if let Some(active) = active {
            if active.key == key {
                self.memory_gets.fetch_add(1, Ordering::Relaxed);
                return Ok(Lookup::Found(StoredObject {
                    data: active.data.clone(),
                    ttl: active.ttl,
                }));
            }
        }

        let entry = match self.index.get(key) {
            Some(entry) => entry,
            None => return Ok(Lookup::Missing),
        };
        let mut e = entry.lock();
        if e.detached {
            return Ok(Lookup::Missing);
        }
        if e.slot == Slot::Absent {
            return Ok(Lookup::Deleted);
        }
        let ttl = e.absolute_ttl(self.creation);
        if e.is_expired(self.creation, clock::now_millis()) {
            return Ok(Lookup::Expired);
        }

        if let Some(data) = e.latest.clone().or_else(|| self.cache.get(key)) {
            self.memory_gets.fetch_add(1, Ordering::Relaxed);
            return Ok(Lookup::Found(StoredObject { data, ttl }));
        }

        let address = match e.slot {
            Slot::At(address) => address,
            _ => {
                warn!(generation = %self.name, key, "pending entry without a payload");
                return Ok(Lookup::Missing);
            }
        };

        match self.codec.load(address, LoadMode::Full)? {
            Loaded::Live(record) => {
                if record.key.as_deref() != Some(key) {
                    return Err(GenCacheError::Corruption(format!(
                        "record at address {} of {} belongs to another key",
                        address, self.name
                    )));
                }
                let data = record.payload.unwrap_or_default();
                self.cache.insert(key, data.clone());
                self.disk_gets.fetch_add(1, Ordering::Relaxed);
                Ok(Lookup::Found(StoredObject { data, ttl }))
            }
            Loaded::Deleted { .. } | Loaded::Dead => {
                trace!(generation = %self.name, key, address, "record was deleted on disk");
                e.slot = Slot::Absent;
                Ok(Lookup::Deleted)
            }
        }
    }

    /// Store `data` under `key`. The index is updated before returning; the
    /// record is written here or by the writer thread. A failure of an
    /// earlier queued write is returned from this call.
    pub fn put(&self, key: &str, data: Bytes, ttl: i64, groups: &[i64]) -> Result<()> {
        if key.is_empty() {
            return Err(GenCacheError::EmptyKey);
        }
        if data.is_empty() {
            return Err(GenCacheError::EmptyPayload);
        }
        let _use = self.enter().ok_or(GenCacheError::Closed)?;

        let ttl_delta = self.ttl_delta(ttl);
        let mut groups = groups.to_vec();
        groups.sort_unstable();
        groups.dedup();

        let written = loop {
            let (entry, created) = self.index.get_or_insert(key, || IndexEntry::new(ttl_delta));
            let mut e = entry.lock();
            if e.detached {
                continue;
            }

            let mut add_to_log = created;
            if e.ttl_delta != ttl_delta {
                e.ttl_delta = ttl_delta;
                add_to_log = true;
            }
            if e.groups != groups {
                self.groups.replace(key, &e.groups, &groups);
                e.groups = groups.clone();
                add_to_log = true;
            }

            let previous = match e.slot {
                Slot::At(_) if e.latest.is_none() => self.cache.get(key),
                _ => None,
            };
            if e.slot == Slot::Absent {
                e.slot = Slot::Pending;
            }
            e.seq += 1;
            e.latest = Some(data.clone());
            e.log_dirty |= add_to_log;
            self.cache.remove(key);

            let put = PendingPut {
                key: key.to_string(),
                entry: Arc::clone(&entry),
                seq: e.seq,
                data: data.clone(),
                groups: groups.clone(),
                add_to_log,
                previous,
            };
            let overflow = match &self.queue {
                Some(queue) => match queue.offer(put) {
                    Ok(()) => None,
                    Err(put) => {
                        self.put_overflows.fetch_add(1, Ordering::Relaxed);
                        Some(put)
                    }
                },
                None => Some(put),
            };

            break match overflow {
                Some(put) => self.write_locked(&mut e, &put),
                None => Ok(()),
            };
        };
        written?;

        if let Some(error) = self.pending_error.lock().take() {
            return Err(GenCacheError::BackgroundWrite(Box::new(error)));
        }
        Ok(())
    }

    /// Tombstone `key`. A removed on-disk record also gets a logged
    /// "removed" entry so its groups are not replayed. With
    /// `remember_absence`, a key this generation has no record for is logged
    /// the same way so it keeps shadowing older generations after a restart.
    pub fn remove(&self, key: &str, remember_absence: bool) -> Result<()> {
        let _use = match self.enter() {
            Some(guard) => guard,
            None => return Ok(()),
        };

        loop {
            let entry = if remember_absence {
                self.index.get_or_insert(key, || IndexEntry::new(0)).0
            } else {
                match self.index.get(key) {
                    Some(entry) => entry,
                    None => return Ok(()),
                }
            };
            let mut e = entry.lock();
            if e.detached {
                continue;
            }

            let on_disk = match e.slot {
                Slot::At(address) => {
                    self.codec.mark_deleted(address)?;
                    true
                }
                _ => false,
            };
            let groups = std::mem::take(&mut e.groups);
            self.groups.remove_key(key, &groups);
            e.slot = Slot::Absent;
            e.ttl_delta = 0;
            e.latest = None;
            e.log_dirty = false;
            e.seq += 1;
            self.cache.remove(key);

            if remember_absence || on_disk {
                self.log.append(key, Slot::Absent.report(), 0, &[])?;
            }
            trace!(generation = %self.name, key, on_disk, "removed");
            return Ok(());
        }
    }

    /// Forget `key` in memory only; the data file is untouched
    pub fn remove_from_index(&self, key: &str) {
        let _use = match self.enter() {
            Some(guard) => guard,
            None => return,
        };
        if let Some(entry) = self.index.remove(key) {
            self.detach(key, &entry);
        }
    }

    /// True if this generation holds a live entry for `key`
    pub fn has_key(&self, key: &str) -> bool {
        let _use = match self.enter() {
            Some(guard) => guard,
            None => return false,
        };
        match self.index.get(key) {
            Some(entry) => {
                let e = entry.lock();
                !e.detached && e.slot != Slot::Absent
            }
            None => false,
        }
    }

    /// Keys currently in `group`
    pub fn list_group(&self, group: i64) -> Vec<String> {
        match self.enter() {
            Some(_use) => self.groups.list(group),
            None => Vec::new(),
        }
    }

    /// Drop expired entries from memory. Entries with a non-positive TTL
    /// delta are left alone. Returns how many were dropped.
    pub fn remove_old_keys_from_index(&self) -> usize {
        let _use = match self.enter() {
            Some(guard) => guard,
            None => return 0,
        };

        let now = clock::now_millis();
        let creation = self.creation;
        let mut purged = 0;
        for key in self.index.keys() {
            let expired = self.index.remove_if(&key, |e| {
                e.ttl_delta > 0 && e.is_expired(creation, now)
            });
            if let Some(entry) = expired {
                self.detach(&key, &entry);
                purged += 1;
            }
        }

        if purged > 0 {
            self.purged.fetch_add(purged as u64, Ordering::Relaxed);
            debug!(generation = %self.name, purged, "purged expired keys from index");
        }
        purged
    }

    /// Every key with an index entry, including remembered removals
    pub fn indexed_keys(&self) -> Vec<String> {
        match self.enter() {
            Some(_use) => self.index.keys(),
            None => Vec::new(),
        }
    }

    /// Live keys fully matching `pattern`
    pub fn regex_find_keys(&self, pattern: &Regex) -> Vec<String> {
        let _use = match self.enter() {
            Some(guard) => guard,
            None => return Vec::new(),
        };
        self.index
            .snapshot()
            .into_iter()
            .filter(|(key, entry)| {
                pattern.is_match(key) && {
                    let e = entry.lock();
                    !e.detached && e.slot != Slot::Absent
                }
            })
            .map(|(key, _)| key)
            .collect()
    }

    /// One `path \t key \t address \t ttl` line per indexed key
    pub fn write_key_data(&self, out: &mut dyn Write) -> io::Result<()> {
        let _use = match self.enter() {
            Some(guard) => guard,
            None => return Ok(()),
        };
        for (key, entry) in self.index.snapshot() {
            let (address, ttl) = {
                let e = entry.lock();
                if e.detached {
                    continue;
                }
                (e.slot.report(), e.absolute_ttl(self.creation))
            };
            writeln!(
                out,
                "{}\t{}\t{}\t{}",
                self.data_path.display(),
                key.replace('\t', " "),
                address,
                ttl
            )?;
        }
        Ok(())
    }

    pub fn stats(&self) -> GenerationStats {
        GenerationStats {
            name: self.name.clone(),
            creation: self.creation,
            checksums: self.codec.checksums(),
            logical_size: self.data.logical_size(),
            actual_size: self.data.actual_size(),
            pool_size: self.data.pool_size(),
            object_count: self.index.len(),
            index_size: self.index.approximate_size(),
            groups_size: self.groups.approximate_size(),
            memory_gets: self.memory_gets.load(Ordering::Relaxed),
            disk_gets: self.disk_gets.load(Ordering::Relaxed),
            put_overflows: self.put_overflows.load(Ordering::Relaxed),
            queue_depth: self.queue.as_ref().map_or(0, |queue| queue.len()),
            purged: self.purged.load(Ordering::Relaxed),
            cached_bytes: self.cache.bytes(),
        }
    }

    /// Human-readable diagnostics, one line per item
    pub fn dump_stats(&self, verbose: bool) -> Vec<String> {
        let stats = self.stats();
        let total_gets = (stats.memory_gets + stats.disk_gets).max(1);

        let mut lines = vec![
            stats.name.clone(),
            format!("\tCreated:        {}", clock::format_millis(stats.creation)),
            format!("\tCRCs:           {}", if stats.checksums { "on" } else { "off" }),
            format!("\tLogical Size:   {}", stats.logical_size),
            format!("\tActual Size:    {}", stats.actual_size),
            format!("\tFile Pool Size: {}", stats.pool_size),
            format!("\tObject Qty:     {}", stats.object_count),
            format!("\tIndex Size:     {} bytes (approx)", stats.index_size),
            format!("\tGroups Size:    {} bytes (approx)", stats.groups_size),
            format!("\tMemory Gets:    {}", stats.memory_gets),
            format!("\tDisk Gets:      {}", stats.disk_gets),
            format!("\tMem v Disk:     {}%", stats.memory_gets * 100 / total_gets),
            format!("\tPut Overflows:  {}", stats.put_overflows),
        ];
        if verbose {
            lines.push(format!("\tQueue Depth:    {}", stats.queue_depth));
            lines.push(format!("\tTTL Purged:     {}", stats.purged));
            lines.push(format!("\tCached Bytes:   {}", stats.cached_bytes));
            lines.push(format!("\tState:          {:?}", self.state()));
        }
        lines
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// File stem shared by the data file and index log
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Epoch millis this generation was created
    pub fn creation(&self) -> i64 {
        self.creation
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn state(&self) -> GenerationState {
        GenerationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn checksums(&self) -> bool {
        self.codec.checksums()
    }

    pub fn object_count(&self) -> usize {
        self.index.len()
    }

    pub fn index_size(&self) -> i64 {
        self.index.approximate_size()
    }

    pub fn groups_index_size(&self) -> i64 {
        self.groups.approximate_size()
    }

    pub fn logical_size(&self) -> u64 {
        self.data.logical_size()
    }

    pub fn actual_size(&self) -> u64 {
        self.data.actual_size()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.as_ref().map_or(0, |queue| queue.len())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn enter(&self) -> Option<UseGuard<'_>> {
        let guard = self.uses.enter();
        (self.state() == GenerationState::Open).then_some(guard)
    }

    /// Offset of `ttl` from creation, clamped into the stored 32-bit range
    fn ttl_delta(&self, ttl: i64) -> i32 {
        let delta = ttl.saturating_sub(self.creation);
        i32::try_from(delta).unwrap_or_else(|_| {
            debug!(generation = %self.name, ttl, "TTL out of range for this generation, clamping");
            if delta > 0 {
                i32::MAX
            } else {
                i32::MIN
            }
        })
    }

    fn detach(&self, key: &str, entry: &EntryRef) {
        let groups = {
            let mut e = entry.lock();
            e.detached = true;
            e.latest = None;
            std::mem::take(&mut e.groups)
        };
        self.groups.remove_key(key, &groups);
        self.cache.remove(key);
    }

    /// Writer thread entry point
    fn process_queued(&self, put: PendingPut) {
        let current = self.index.get(&put.key);
        if !current.is_some_and(|current| Arc::ptr_eq(&current, &put.entry)) {
            trace!(generation = %self.name, key = %put.key, "key replaced or removed, dropping queued put");
            return;
        }

        let mut e = put.entry.lock();
        if let Err(error) = self.write_locked(&mut e, &put) {
            error!(generation = %self.name, key = %put.key, %error, "background write failed");
            *self.pending_error.lock() = Some(error);
        }
    }

    /// Persist `put` while holding its entry lock. Superseded or removed
    /// puts are skipped.
    fn write_locked(&self, e: &mut IndexEntry, put: &PendingPut) -> Result<()> {
        if e.detached || e.slot == Slot::Absent || e.seq != put.seq {
            return Ok(());
        }

        let marker = Arc::new(ActivePut {
            key: put.key.clone(),
            data: put.data.clone(),
            ttl: e.absolute_ttl(self.creation),
        });
        *self.active.lock() = Some(Arc::clone(&marker));

        let result = self.store(e, put);

        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|current| Arc::ptr_eq(current, &marker)) {
            *active = None;
        }
        result
    }

    fn store(&self, e: &mut IndexEntry, put: &PendingPut) -> Result<()> {
        let mut add_to_log = put.add_to_log || e.log_dirty;

        let unchanged = matches!(e.slot, Slot::At(_)) && put.previous.as_ref() == Some(&put.data);
        if unchanged {
            trace!(generation = %self.name, key = %put.key, "payload unchanged, skipping write");
        } else {
            let in_place = match e.slot {
                Slot::At(address) => Some(address),
                _ => None,
            };
            let written = self.codec.write(&put.key, &put.data, &put.groups, in_place)?;
            if !written.in_place {
                add_to_log = true;
            }
            e.slot = Slot::At(written.address);
        }

        if add_to_log {
            self.log
                .append(&put.key, e.slot.report(), e.ttl_delta, &e.groups)?;
            e.log_dirty = false;
        }

        e.latest = None;
        self.cache.insert(&put.key, put.data.clone());
        Ok(())
    }
}

/// File stem for a generation stamp
pub fn generation_stem(prefix: &str, stamp: u64) -> String {
    format!("{}{:020}", prefix, stamp)
}

/// Stamp of a data file name, if `path` names one for this configuration
/// ("gencache00000001700000000000.db" -> Some(1700000000000))
pub fn parse_stamp(config: &Config, path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let stamp = name
        .strip_prefix(config.file_prefix.as_str())?
        .strip_suffix(config.data_extension.as_str())?;
    if stamp.is_empty() || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stamp.parse().ok()
}
