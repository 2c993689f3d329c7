//! Storage Manager
//!
//! Owns the chain of generations and decides, per operation, which of them
//! take part.
//!
//! ## Responsibilities
//! - Discover existing generations on startup, drop stale ones, load the rest
//! - Search generations newest → oldest for reads
//! - Send every write to the newest generation and purge older copies
//! - Rotate: start a new generation once the newest is half `max_age` old,
//!   delete the oldest beyond `max_instances`
//!
//! ## Chain
//! ```text
//!   chain: [ oldest, ..., newest ]
//!                           ▲
//!            put / remove ──┘      get scans ◄── newest to oldest
//! ```
//! Rotation and close take the chain's write lock; everything else takes the
//! read lock and only touches generation-internal state.

use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::clock;
use crate::config::Config;
use crate::error::{GenCacheError, Result};
use crate::generation::{parse_stamp, Generation, Lookup, StoredObject};

use super::driver::{StorageDriver, TracingDriver};
use super::loader::for_each_parallel;
use super::maintenance::Maintenance;

/// The storage engine
///
/// ## Concurrency:
/// - `chain`: RwLock (operations share it, rotation/close take it exclusively)
/// - counters: atomics
/// - All methods use `&self`
pub struct Storage {
    shared: Arc<Shared>,
    maintenance: Mutex<Option<Maintenance>>,
}

/// State shared with the maintenance thread
struct Shared {
    config: Config,
    driver: Arc<dyn StorageDriver>,

    /// Generations ordered oldest → newest
    chain: RwLock<Vec<Arc<Generation>>>,
    closed: AtomicBool,

    total_gets: AtomicU64,
    successful_gets: AtomicU64,
    puts: AtomicU64,
}

impl Storage {
    /// Open or create storage in `config.data_dir`, reporting through
    /// `tracing`
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_driver(config, Arc::new(TracingDriver::new()))
    }

    /// Open or create storage, reporting through `driver`
    ///
    /// On startup:
    /// 1. Discover `{prefix}{stamp}{data_extension}` files
    /// 2. Skip files written in another format version
    /// 3. Delete generations older than twice `max_age`, then the oldest
    ///    beyond `max_instances`
    /// 4. Replay every remaining index log in parallel
    /// 5. Forget keys in older generations that a newer one also indexes
    /// 6. Create a generation if none survived
    pub fn open_with_driver(config: Config, driver: Arc<dyn StorageDriver>) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let mut generations = discover(&config, driver.as_ref())?;

        let max_age = i64::try_from(config.max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = clock::now_millis().saturating_sub(max_age.saturating_mul(2));
        let (stale, kept): (Vec<_>, Vec<_>) = generations
            .drain(..)
            .partition(|generation| generation.creation() < cutoff);
        generations = kept;
        for generation in stale {
            driver.log(
                &format!("Deleting expired generation {}", generation.name()),
                None,
                true,
            );
            if let Err(e) = generation.delete() {
                close_all(&generations);
                return Err(e);
            }
        }

        generations.sort_by_key(|generation| generation.creation());
        while generations.len() > config.max_instances {
            let oldest = generations.remove(0);
            driver.log(
                &format!("Deleting surplus generation {}", oldest.name()),
                None,
                true,
            );
            if let Err(e) = oldest.delete() {
                close_all(&generations);
                return Err(e);
            }
        }

        let results = for_each_parallel(
            "Loading",
            &generations,
            config.load_progress_interval,
            driver.as_ref(),
            |generation, progress| generation.load(progress),
        );
        if let Some(e) = results.into_iter().find_map(|result| result.err()) {
            driver.log("Load failed", Some(&e), true);
            close_all(&generations);
            return Err(e);
        }

        let shadowed = shadow_older_copies(&generations);
        if shadowed > 0 {
            debug!(shadowed, "dropped stale copies from older generations");
        }

        if generations.is_empty() {
            generations.push(Generation::create(&config)?);
        }

        info!(
            data_dir = %config.data_dir.display(),
            generations = generations.len(),
            "storage opened"
        );

        let shared = Arc::new(Shared {
            config,
            driver,
            chain: RwLock::new(generations),
            closed: AtomicBool::new(false),
            total_gets: AtomicU64::new(0),
            successful_gets: AtomicU64::new(0),
            puts: AtomicU64::new(0),
        });

        let maintenance = {
            let task_shared = Arc::clone(&shared);
            Maintenance::start(
                shared.config.first_maintenance_delay,
                shared.config.maintenance_interval,
                move || task_shared.run_maintenance(),
            )
        };
        let maintenance = match maintenance {
            Ok(maintenance) => maintenance,
            Err(e) => {
                close_all(&shared.chain.read());
                return Err(e.into());
            }
        };

        Ok(Self {
            shared,
            maintenance: Mutex::new(Some(maintenance)),
        })
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Get the live object stored under `key`
    ///
    /// Once a generation reports the key deleted, every older generation
    /// forgets its copy so it cannot come back on a later lookup.
    pub fn get(&self, key: &str) -> Result<Option<StoredObject>> {
        self.shared.ensure_open()?;
        self.shared.total_gets.fetch_add(1, Ordering::Relaxed);

        let chain = self.shared.chain.read();
        let mut deleted = false;
        for generation in chain.iter().rev() {
            if deleted {
                generation.remove_from_index(key);
                continue;
            }
            match generation.get(key)? {
                Lookup::Found(object) => {
                    self.shared.successful_gets.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(object));
                }
                Lookup::Deleted => deleted = true,
                Lookup::Expired => return Ok(None),
                Lookup::Missing => {}
            }
        }
        Ok(None)
    }

    /// Store `data` under `key` until `ttl` (epoch millis), tagged with
    /// `groups`
    pub fn put(&self, key: &str, data: impl Into<Bytes>, ttl: i64, groups: &[i64]) -> Result<()> {
        let data = data.into();
        if key.is_empty() {
            return Err(GenCacheError::EmptyKey);
        }
        if data.is_empty() {
            return Err(GenCacheError::EmptyPayload);
        }
        self.shared.ensure_open()?;
        self.shared.puts.fetch_add(1, Ordering::Relaxed);

        let chain = self.shared.chain.read();
        let (newest, older) = chain.split_last().ok_or(GenCacheError::Closed)?;
        let result = newest.put(key, data, ttl, groups);
        for generation in older {
            generation.remove_from_index(key);
        }

        if let Err(e) = &result {
            if e.is_space_exhaustion() {
                self.shared.driver.set_error_state("Out of disk space");
            }
        }
        result
    }

    /// Remove `key`. The newest generation records the removal; older ones
    /// only forget the key in memory.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.shared.ensure_open()?;

        let chain = self.shared.chain.read();
        let (newest, older) = chain.split_last().ok_or(GenCacheError::Closed)?;
        let shadows_older = older.iter().any(|generation| generation.has_key(key));
        newest.remove(key, shadows_older)?;
        for generation in older {
            generation.remove_from_index(key);
        }
        Ok(())
    }

    /// Keys in `group` across every generation, sorted
    pub fn list_group(&self, group: i64) -> Vec<String> {
        let chain = self.shared.chain.read();
        let keys: BTreeSet<String> = chain
            .iter()
            .flat_map(|generation| generation.list_group(group))
            .collect();
        keys.into_iter().collect()
    }

    /// Remove every key in `group`; the driver is told about each one.
    /// Returns the removed keys, sorted.
    pub fn remove_group(&self, group: i64) -> Result<Vec<String>> {
        self.shared.ensure_open()?;

        let keys = self.list_group(group);
        for key in &keys {
            self.remove(key)?;
            self.shared.driver.remove(key);
        }
        debug!(group, removed = keys.len(), "removed group");
        Ok(keys)
    }

    /// Live keys that fully match `pattern`, sorted
    pub fn regex_find_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = Regex::new(&format!("^(?:{})$", pattern))?;
        let chain = self.shared.chain.read();
        let keys: BTreeSet<String> = chain
            .iter()
            .flat_map(|generation| generation.regex_find_keys(&pattern))
            .collect();
        Ok(keys.into_iter().collect())
    }

    /// Diagnostics for every generation (newest first) followed by totals
    pub fn dump_stats(&self, verbose: bool) -> Vec<String> {
        let mut lines = Vec::new();
        {
            let chain = self.shared.chain.read();
            for generation in chain.iter().rev() {
                lines.extend(generation.dump_stats(verbose));
            }
        }

        let total_gets = self.shared.total_gets.load(Ordering::Relaxed);
        let successful_gets = self.shared.successful_gets.load(Ordering::Relaxed);
        let puts = self.shared.puts.load(Ordering::Relaxed);
        let total = successful_gets + puts;

        lines.push(String::new());
        lines.push(format!("Total Gets:  {}", total_gets));
        lines.push(format!("Gets:        {}", successful_gets));
        lines.push(format!("Puts:        {}", puts));
        if total > 0 {
            lines.push(format!("Gets v Puts: {}%", successful_gets * 100 / total));
        }
        lines
    }

    /// Write a tab-delimited report of every indexed key to `path`
    pub fn write_key_data(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "File\tCacheKey\tAddress\tTTL")?;
        {
            let chain = self.shared.chain.read();
            for generation in chain.iter() {
                generation.write_key_data(&mut out)?;
            }
        }
        out.flush()?;
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Start a new generation now, deleting the oldest beyond
    /// `max_instances`
    pub fn rotate(&self) -> Result<()> {
        self.shared.rotate()
    }

    /// Drop expired keys from every generation's index. Returns how many
    /// were dropped.
    pub fn purge_expired(&self) -> usize {
        self.shared.purge_expired()
    }

    /// One maintenance pass: rotate if due, then purge expired keys
    pub fn run_maintenance(&self) {
        self.shared.run_maintenance();
    }

    /// Stop maintenance and close every generation. Closing twice is a
    /// no-op.
    pub fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(mut maintenance) = self.maintenance.lock().take() {
            maintenance.stop();
        }

        let generations = std::mem::take(&mut *self.shared.chain.write());
        let results = for_each_parallel(
            "Closing",
            &generations,
            self.shared.config.load_progress_interval,
            self.shared.driver.as_ref(),
            |generation, progress| {
                let result = generation.close();
                progress.store(100, Ordering::Release);
                result
            },
        );
        info!(generations = generations.len(), "storage closed");
        results.into_iter().collect()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn generation_count(&self) -> usize {
        self.shared.chain.read().len()
    }

    /// Snapshot of the chain, oldest first
    pub fn generations(&self) -> Vec<Arc<Generation>> {
        self.shared.chain.read().clone()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.shared.driver
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "error closing storage");
        }
    }
}

impl Shared {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GenCacheError::Closed);
        }
        Ok(())
    }

    fn rotate(&self) -> Result<()> {
        self.ensure_open()?;
        let fresh = Generation::create(&self.config)?;

        let retired: Vec<Arc<Generation>> = {
            let mut chain = self.chain.write();
            if self.closed.load(Ordering::Acquire) {
                drop(chain);
                fresh.delete()?;
                return Err(GenCacheError::Closed);
            }
            chain.push(Arc::clone(&fresh));
            let excess = chain.len().saturating_sub(self.config.max_instances);
            chain.drain(..excess).collect()
        };

        self.driver.log(
            &format!("Started generation {}", fresh.name()),
            None,
            true,
        );

        let mut first_error = None;
        for generation in retired {
            self.driver.log(
                &format!("Deleting generation {}", generation.name()),
                None,
                true,
            );
            if let Err(e) = generation.delete() {
                warn!(generation = %generation.name(), error = %e, "failed to delete generation");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn purge_expired(&self) -> usize {
        let chain = self.chain.read();
        chain
            .iter()
            .map(|generation| generation.remove_old_keys_from_index())
            .sum()
    }

    fn rotation_due(&self) -> bool {
        let chain = self.chain.read();
        let rotation_age = i64::try_from(self.config.rotation_age().as_millis()).unwrap_or(i64::MAX);
        chain
            .last()
            .map_or(true, |newest| clock::now_millis() - newest.creation() >= rotation_age)
    }

    fn run_maintenance(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        if self.rotation_due() {
            if let Err(e) = self.rotate() {
                self.driver.notify_exception(&e);
            }
        }
        let purged = self.purge_expired();
        debug!(purged, "maintenance pass finished");
    }
}

/// Open every generation data file in `config.data_dir`. Files written in
/// another format version are logged and left alone.
fn discover(config: &Config, driver: &dyn StorageDriver) -> Result<Vec<Arc<Generation>>> {
    let mut found: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(&config.data_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(stamp) = parse_stamp(config, &path) {
            found.push((stamp, path));
        }
    }
    found.sort();

    let mut generations = Vec::with_capacity(found.len());
    for (_, path) in found {
        match Generation::open_existing(config, &path) {
            Ok(generation) => generations.push(generation),
            Err(GenCacheError::OldFormat { path, version }) => {
                driver.log(
                    &format!(
                        "Skipping {} (format version {})",
                        path.display(),
                        version
                    ),
                    None,
                    true,
                );
            }
            Err(e) => {
                close_all(&generations);
                return Err(e);
            }
        }
    }
    Ok(generations)
}

/// Older generations reload copies that a newer put or remove superseded;
/// drop them from memory so reads and group listings only see the newest.
/// `generations` is ordered oldest → newest.
fn shadow_older_copies(generations: &[Arc<Generation>]) -> usize {
    let mut seen: HashSet<String> = HashSet::new();
    let mut shadowed = 0;
    for generation in generations.iter().rev() {
        for key in generation.indexed_keys() {
            if seen.contains(&key) {
                generation.remove_from_index(&key);
                shadowed += 1;
            } else {
                seen.insert(key);
            }
        }
    }
    shadowed
}

fn close_all(generations: &[Arc<Generation>]) {
    for generation in generations {
        if let Err(e) = generation.close() {
            warn!(generation = %generation.name(), error = %e, "error closing generation");
        }
    }
}
