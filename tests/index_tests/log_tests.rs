//! Tests for IndexLog and replay
//!
//! These tests verify:
//! - Appended entries replay in order with all their fields
//! - Replay stops at the null fill and reports the logical end
//! - A reopened log appends after the replayed end
//! - Bad markers and truncated entries fail the replay

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use gencache::index::{encode_entry, replay, IndexLog, LogEntry, MAGIC_BYTE, MAGIC_INT};
use gencache::GenCacheError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_log() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gen.idx");
    (temp_dir, path)
}

fn open_log(path: &PathBuf) -> IndexLog {
    IndexLog::open(path, 4096, Duration::from_secs(300)).unwrap()
}

fn replay_all(path: &PathBuf) -> (Vec<LogEntry>, gencache::index::ReplaySummary) {
    let progress = AtomicU32::new(0);
    let mut entries = Vec::new();
    let summary = replay(path, &progress, |entry| entries.push(entry)).unwrap();
    assert_eq!(progress.load(Ordering::Acquire), 100);
    (entries, summary)
}

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_entry_layout() {
    let bytes = encode_entry("ab", 1024, -5, &[9]);

    assert_eq!(bytes[0], MAGIC_BYTE);
    assert_eq!(&bytes[1..5], &MAGIC_INT.to_be_bytes());
    assert_eq!(&bytes[5..9], &2i32.to_be_bytes());
    assert_eq!(&bytes[9..11], b"ab");
    assert_eq!(&bytes[11..19], &1024i64.to_be_bytes());
    assert_eq!(&bytes[19..23], &(-5i32).to_be_bytes());
    assert_eq!(&bytes[23..27], &1i32.to_be_bytes());
    assert_eq!(&bytes[27..35], &9i64.to_be_bytes());
    assert_eq!(bytes.len(), 35);
}

// =============================================================================
// Append / Replay Tests
// =============================================================================

#[test]
fn test_replay_returns_entries_in_order() {
    let (_temp, path) = setup_temp_log();
    let log = open_log(&path);
    log.append("a", 1024, 100, &[]).unwrap();
    log.append("b", 2048, 200, &[1, 2]).unwrap();
    log.append("a", -1, 0, &[]).unwrap();
    log.close().unwrap();

    let (entries, summary) = replay_all(&path);
    assert_eq!(
        entries,
        vec![
            LogEntry { key: "a".into(), address: 1024, ttl_delta: 100, groups: vec![] },
            LogEntry { key: "b".into(), address: 2048, ttl_delta: 200, groups: vec![1, 2] },
            LogEntry { key: "a".into(), address: -1, ttl_delta: 0, groups: vec![] },
        ]
    );
    assert_eq!(summary.entries, 3);
    assert_eq!(summary.max_address, Some(2048));
}

#[test]
fn test_replay_stops_at_null_fill() {
    let (_temp, path) = setup_temp_log();
    let log = open_log(&path);
    log.append("key", 1024, 1, &[]).unwrap();
    let end = log.logical_size();
    log.close().unwrap();

    // the file is a whole chunk, mostly null fill
    assert_eq!(fs::metadata(&path).unwrap().len(), 4096);

    let (entries, summary) = replay_all(&path);
    assert_eq!(entries.len(), 1);
    assert_eq!(summary.logical_end, end);
}

#[test]
fn test_reopened_log_appends_after_replayed_end() {
    let (_temp, path) = setup_temp_log();
    {
        let log = open_log(&path);
        log.append("first", 1024, 1, &[]).unwrap();
        log.close().unwrap();
    }

    let (_, summary) = replay_all(&path);
    {
        let log = open_log(&path);
        log.set_logical_end(summary.logical_end);
        log.append("second", 2048, 2, &[]).unwrap();
        log.close().unwrap();
    }

    let (entries, summary) = replay_all(&path);
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["first", "second"]);
    assert_eq!(summary.max_address, Some(2048));
}

#[test]
fn test_missing_log_is_empty() {
    let (_temp, path) = setup_temp_log();

    let (entries, summary) = replay_all(&path);
    assert!(entries.is_empty());
    assert_eq!(summary.entries, 0);
    assert_eq!(summary.max_address, None);
}

#[test]
fn test_removed_entries_do_not_count_toward_max_address() {
    let (_temp, path) = setup_temp_log();
    let log = open_log(&path);
    log.append("gone", -1, 0, &[]).unwrap();
    log.close().unwrap();

    let (_, summary) = replay_all(&path);
    assert_eq!(summary.entries, 1);
    assert_eq!(summary.max_address, None);
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_bad_magic_byte_fails_replay() {
    let (_temp, path) = setup_temp_log();
    let mut bytes = encode_entry("a", 1024, 1, &[]).to_vec();
    bytes.push(0x77);
    fs::write(&path, &bytes).unwrap();

    let progress = AtomicU32::new(0);
    let result = replay(&path, &progress, |_| {});
    assert!(matches!(result, Err(GenCacheError::Corruption(_))));
}

#[test]
fn test_bad_magic_int_fails_replay() {
    let (_temp, path) = setup_temp_log();
    let mut bytes = encode_entry("a", 1024, 1, &[]).to_vec();
    bytes[2] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let progress = AtomicU32::new(0);
    let result = replay(&path, &progress, |_| {});
    assert!(matches!(result, Err(GenCacheError::Corruption(_))));
}

#[test]
fn test_truncated_entry_fails_replay() {
    let (_temp, path) = setup_temp_log();
    let bytes = encode_entry("truncated", 1024, 1, &[5]).to_vec();
    fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let progress = AtomicU32::new(0);
    let mut applied = 0;
    let result = replay(&path, &progress, |_| applied += 1);
    assert!(matches!(result, Err(GenCacheError::Corruption(_))));
    assert_eq!(applied, 0);
}

#[test]
fn test_huge_group_count_fails_replay() {
    let (_temp, path) = setup_temp_log();
    let mut bytes = encode_entry("a", 1024, 1, &[]).to_vec();
    let mut bad = encode_entry("b", 2048, 1, &[]).to_vec();
    let count_at = bad.len() - 4;
    bad[count_at..].copy_from_slice(&i32::MAX.to_be_bytes());
    bytes.extend_from_slice(&bad);
    fs::write(&path, &bytes).unwrap();

    let progress = AtomicU32::new(0);
    let mut applied = Vec::new();
    let result = replay(&path, &progress, |entry| applied.push(entry.key));
    assert!(matches!(result, Err(GenCacheError::Corruption(_))));
    assert_eq!(applied, vec!["a"]);
}

#[test]
fn test_huge_key_length_fails_replay() {
    let (_temp, path) = setup_temp_log();
    let mut bytes = encode_entry("key", 1024, 1, &[]).to_vec();
    bytes[5..9].copy_from_slice(&i32::MAX.to_be_bytes());
    fs::write(&path, &bytes).unwrap();

    let progress = AtomicU32::new(0);
    let result = replay(&path, &progress, |_| {});
    assert!(matches!(result, Err(GenCacheError::Corruption(_))));
}
