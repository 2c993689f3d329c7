//! Group Index
//!
//! group id -> keys whose most recent put carried that group. Sets are
//! only touched while holding their map shard, so a set is never emptied
//! and dropped underneath a concurrent insert.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;

/// Approximate cost of one membership beyond the key bytes
const MEMBERSHIP_BASE_SIZE: i64 = 8;

#[derive(Default)]
pub struct GroupIndex {
    groups: DashMap<i64, Mutex<HashSet<String>>>,
    size: AtomicI64,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: &str, groups: &[i64]) {
        for group in groups {
            let set = self.groups.entry(*group).or_default();
            if set.lock().insert(key.to_string()) {
                self.account(key, true);
            }
        }
    }

    pub fn remove_key(&self, key: &str, groups: &[i64]) {
        for group in groups {
            let removed = match self.groups.get(group) {
                Some(set) => set.lock().remove(key),
                None => false,
            };
            if removed {
                self.account(key, false);
                self.groups.remove_if(group, |_, set| set.lock().is_empty());
            }
        }
    }

    /// Move `key` from the `old` groups to the `new` ones
    pub fn replace(&self, key: &str, old: &[i64], new: &[i64]) {
        let dropped: Vec<i64> = old.iter().copied().filter(|g| !new.contains(g)).collect();
        self.remove_key(key, &dropped);
        self.add(key, new);
    }

    /// Copy of the group's current members
    pub fn list(&self, group: i64) -> Vec<String> {
        match self.groups.get(&group) {
            Some(set) => set.lock().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn approximate_size(&self) -> i64 {
        self.size.load(Ordering::Relaxed)
    }

    fn account(&self, key: &str, add: bool) {
        let size = key.len() as i64 + MEMBERSHIP_BASE_SIZE;
        if add {
            self.size.fetch_add(size, Ordering::Relaxed);
        } else {
            self.size.fetch_sub(size, Ordering::Relaxed);
        }
    }
}
