//! Coalescing queue of pending puts

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::index::EntryRef;

/// A put accepted into the index but not yet written to disk
pub struct PendingPut {
    pub key: String,
    /// Entry the put was applied to; a different entry under the same key
    /// means the key was removed and re-added since
    pub entry: EntryRef,
    /// `IndexEntry::seq` at the time of the put
    pub seq: u64,
    pub data: Bytes,
    pub groups: Vec<i64>,
    /// The put changed metadata that the index log must record
    pub add_to_log: bool,
    /// Payload known to be on disk when the put was made, if any
    pub previous: Option<Bytes>,
}

impl PendingPut {
    /// Take the place of an older queued put for the same key
    pub fn supersede(&mut self, newer: PendingPut) {
        let add_to_log = self.add_to_log || newer.add_to_log;
        let previous = self.previous.take();
        *self = newer;
        self.add_to_log = add_to_log;
        if self.previous.is_none() {
            self.previous = previous;
        }
    }
}

struct QueueState {
    order: VecDeque<String>,
    pending: HashMap<String, PendingPut>,
    closed: bool,
}

/// Bounded FIFO keyed by record key. A put for a key already queued
/// replaces the queued one in place instead of taking a new slot.
pub struct CoalescingQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    available: Condvar,
}

impl CoalescingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                pending: HashMap::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Queue a put without blocking. The put is handed back when the queue
    /// is full or closed.
    ///
    /// A full queue never blocks the producer: callers hold the key's entry
    /// lock here and the writer needs that lock to drain, so the caller
    /// writes the handed-back put itself and pays the disk latency instead.
    pub fn offer(&self, put: PendingPut) -> std::result::Result<(), PendingPut> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(put);
        }

        if let Some(queued) = state.pending.get_mut(&put.key) {
            queued.supersede(put);
            return Ok(());
        }

        if state.pending.len() >= self.capacity {
            return Err(put);
        }

        state.order.push_back(put.key.clone());
        state.pending.insert(put.key.clone(), put);
        self.available.notify_one();
        Ok(())
    }

    /// Next put in queue order. Blocks while empty; returns `None` once the
    /// queue is closed and drained.
    pub fn take(&self) -> Option<PendingPut> {
        let mut state = self.state.lock();
        loop {
            while let Some(key) = state.order.pop_front() {
                if let Some(put) = state.pending.remove(&key) {
                    return Some(put);
                }
            }
            if state.closed {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Stop accepting puts and wake the consumer so it can drain and exit
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
