//! Key Index
//!
//! Sharded map from key to its entry. Each entry carries its own mutex so
//! operations on one key are totally ordered while different keys proceed
//! independently.
//!
//! Lock order: map shard, then entry. Never touch the map while holding an
//! entry lock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::entry::IndexEntry;

/// Approximate per-key overhead counted by `approximate_size`
pub const INDEX_BASE_SIZE: i64 = 16;

pub type EntryRef = Arc<Mutex<IndexEntry>>;

#[derive(Default)]
pub struct KeyIndex {
    map: DashMap<String, EntryRef>,
    size: AtomicI64,
}

impl KeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<EntryRef> {
        self.map.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Fetch the entry for `key`, inserting `init()` if absent.
    /// Returns the entry and whether it was just created.
    pub fn get_or_insert(&self, key: &str, init: impl FnOnce() -> IndexEntry) -> (EntryRef, bool) {
        if let Some(entry) = self.get(key) {
            return (entry, false);
        }

        let mut created = false;
        let entry = self
            .map
            .entry(key.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(init()))
            })
            .value()
            .clone();
        if created {
            self.account(key, true);
        }
        (entry, created)
    }

    /// Insert or replace, returning the previous entry
    pub fn insert(&self, key: &str, entry: IndexEntry) -> Option<EntryRef> {
        let previous = self
            .map
            .insert(key.to_string(), Arc::new(Mutex::new(entry)));
        if previous.is_none() {
            self.account(key, true);
        }
        previous
    }

    /// Remove `key`, returning its entry. The caller is expected to detach it.
    pub fn remove(&self, key: &str) -> Option<EntryRef> {
        let (key, entry) = self.map.remove(key)?;
        self.account(&key, false);
        Some(entry)
    }

    /// Remove `key` only if `predicate` holds for its entry
    pub fn remove_if(&self, key: &str, predicate: impl FnOnce(&IndexEntry) -> bool) -> Option<EntryRef> {
        let (key, entry) = self.map.remove_if(key, |_, entry| predicate(&entry.lock()))?;
        self.account(&key, false);
        Some(entry)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Point-in-time copy of every key and its entry handle
    pub fn snapshot(&self) -> Vec<(String, EntryRef)> {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Rough memory held by the index, in bytes
    pub fn approximate_size(&self) -> i64 {
        self.size.load(Ordering::Relaxed)
    }

    fn account(&self, key: &str, add: bool) {
        let size = key.len() as i64 + INDEX_BASE_SIZE;
        if add {
            self.size.fetch_add(size, Ordering::Relaxed);
        } else {
            self.size.fetch_sub(size, Ordering::Relaxed);
        }
    }
}
