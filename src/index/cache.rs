//! Payload Cache
//!
//! Bounded cache of decoded payloads keyed by record key. A miss is never
//! a correctness problem: the caller reloads from disk.
//!
//! Eviction is FIFO with a second chance: an entry read since it was last
//! considered is moved to the back once instead of being dropped.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use parking_lot::Mutex;

struct Cached {
    data: Bytes,
    referenced: bool,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Cached>,
    /// Insertion order; may hold keys that were since removed
    order: VecDeque<String>,
    bytes: usize,
}

pub struct PayloadCache {
    capacity: usize,
    state: Mutex<CacheState>,
}

impl PayloadCache {
    /// Create a cache holding at most `capacity` payload bytes; 0 disables it
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut state = self.state.lock();
        let cached = state.entries.get_mut(key)?;
        cached.referenced = true;
        Some(cached.data.clone())
    }

    pub fn insert(&self, key: &str, data: Bytes) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if data.len() > self.capacity {
            Self::remove_locked(state, key);
            return;
        }

        let added = data.len();
        match state.entries.get_mut(key) {
            Some(cached) => {
                let replaced = cached.data.len();
                cached.data = data;
                cached.referenced = true;
                state.bytes = state.bytes - replaced + added;
            }
            None => {
                state.entries.insert(
                    key.to_string(),
                    Cached {
                        data,
                        referenced: false,
                    },
                );
                state.order.push_back(key.to_string());
                state.bytes += added;
            }
        }

        self.evict(state);
    }

    pub fn remove(&self, key: &str) {
        let mut guard = self.state.lock();
        Self::remove_locked(&mut guard, key);
        Self::compact(&mut guard);
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes currently held
    pub fn bytes(&self) -> usize {
        self.state.lock().bytes
    }

    pub fn clear(&self) {
        *self.state.lock() = CacheState::default();
    }

    fn remove_locked(state: &mut CacheState, key: &str) {
        if let Some(cached) = state.entries.remove(key) {
            state.bytes -= cached.data.len();
        }
    }

    fn evict(&self, state: &mut CacheState) {
        while state.bytes > self.capacity {
            let key = match state.order.pop_front() {
                Some(key) => key,
                None => break,
            };
            let second_chance = match state.entries.get_mut(&key) {
                Some(cached) if cached.referenced => {
                    cached.referenced = false;
                    true
                }
                Some(_) => false,
                None => continue,
            };
            if second_chance {
                state.order.push_back(key);
            } else {
                Self::remove_locked(state, &key);
            }
        }
        Self::compact(state);
    }

    /// Drop stale and duplicate keys from the order queue once it has grown
    /// well past the live entry count
    fn compact(state: &mut CacheState) {
        if state.order.len() <= state.entries.len() * 2 + 16 {
            return;
        }
        let mut seen = HashSet::with_capacity(state.entries.len());
        let CacheState { entries, order, .. } = state;
        order.retain(|key| entries.contains_key(key) && seen.insert(key.clone()));
    }
}
