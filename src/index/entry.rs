//! In-memory index entry

use bytes::Bytes;

/// Where a key's record lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Removed in this generation, or a put that never reached disk
    Absent,
    /// First put accepted; record not written yet
    Pending,
    /// Record at this data file offset
    At(u64),
}

impl Slot {
    /// Value used in index logs and key reports: -1 absent, -2 pending
    pub fn report(&self) -> i64 {
        match self {
            Slot::Absent => -1,
            Slot::Pending => -2,
            Slot::At(address) => *address as i64,
        }
    }

    /// Slot for an address read back from the index log
    pub fn from_logged(address: i64) -> Self {
        if address >= 0 {
            Slot::At(address as u64)
        } else {
            Slot::Absent
        }
    }
}

/// One key's state within a generation. Always accessed under its own lock.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub slot: Slot,
    /// Expiry as an offset from the generation's creation time
    pub ttl_delta: i32,
    /// Group tags of the most recent put
    pub groups: Vec<i64>,
    /// Payload of the newest put until the writer has persisted it
    pub latest: Option<Bytes>,
    /// Bumped on every put; lets the writer skip superseded records
    pub seq: u64,
    /// Metadata changed since the last index log append
    pub log_dirty: bool,
    /// Dropped from the key index; holders of a stale handle must retry
    pub detached: bool,
}

impl IndexEntry {
    pub fn new(ttl_delta: i32) -> Self {
        Self {
            slot: Slot::Absent,
            ttl_delta,
            groups: Vec::new(),
            latest: None,
            seq: 0,
            log_dirty: false,
            detached: false,
        }
    }

    /// Entry rebuilt from an index log record
    pub fn from_log(address: i64, ttl_delta: i32, groups: Vec<i64>) -> Self {
        Self {
            slot: Slot::from_logged(address),
            ttl_delta,
            groups,
            ..Self::new(ttl_delta)
        }
    }

    pub fn absolute_ttl(&self, creation: i64) -> i64 {
        creation + self.ttl_delta as i64
    }

    pub fn is_expired(&self, creation: i64, now: i64) -> bool {
        now >= self.absolute_ttl(creation)
    }
}
