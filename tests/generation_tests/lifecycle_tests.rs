//! Tests for Generation lifecycle
//!
//! These tests verify:
//! - Creating writes a header and names both files after the stamp
//! - Reopening replays the index log and finds the end of the data
//! - Close drains queued writes and is idempotent
//! - Delete removes both files
//! - Files written in another format version are refused

use std::fs;
use std::sync::atomic::AtomicU32;

use bytes::Bytes;
use gencache::file::BlockFile;
use gencache::generation::{
    generation_stem, parse_stamp, DataHeader, Generation, GenerationState, Lookup, HEADER_SIZE,
};
use gencache::record::DEAD_BYTE;
use gencache::GenCacheError;
use tempfile::TempDir;

use super::common::{config, in_an_hour, reopen};

// =============================================================================
// Create Tests
// =============================================================================

#[test]
fn test_create_writes_header_and_names_files() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);

    let generation = Generation::create(&config).unwrap();

    assert_eq!(generation.state(), GenerationState::Open);
    assert!(generation.data_path().exists());
    assert!(generation.index_path().exists());
    assert_eq!(generation.logical_size(), HEADER_SIZE as u64);
    assert_eq!(
        parse_stamp(&config, generation.data_path()),
        Some(generation.creation() as u64)
    );
    assert!(generation.name().starts_with("gencache"));
    assert!(generation.index_path().to_string_lossy().ends_with(".idx"));
}

#[test]
fn test_create_twice_picks_distinct_names() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);

    let first = Generation::create(&config).unwrap();
    let second = Generation::create(&config).unwrap();

    assert_ne!(first.data_path(), second.data_path());
}

#[test]
fn test_stem_and_parse_stamp() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);

    let stem = generation_stem("gencache", 1_700_000_000_000);
    assert_eq!(stem, "gencache00000001700000000000");

    let path = temp.path().join(format!("{}.db", stem));
    assert_eq!(parse_stamp(&config, &path), Some(1_700_000_000_000));

    assert_eq!(parse_stamp(&config, &temp.path().join(format!("{}.idx", stem))), None);
    assert_eq!(parse_stamp(&config, &temp.path().join("other123.db")), None);
    assert_eq!(parse_stamp(&config, &temp.path().join("gencache12ab.db")), None);
    assert_eq!(parse_stamp(&config, &temp.path().join("gencache.db")), None);
}

#[test]
fn test_checksum_flag_comes_from_config() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp, 0);
    config.use_checksums = true;

    let generation = Generation::create(&config).unwrap();
    assert!(generation.checksums());

    // the flag stored in the file wins over the current config on reopen
    config.use_checksums = false;
    let reopened = reopen(&config, &generation);
    assert!(reopened.checksums());
}

// =============================================================================
// Reopen Tests
// =============================================================================

#[test]
fn test_reopen_restores_objects() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);
    let ttl = in_an_hour();

    let generation = Generation::create(&config).unwrap();
    generation.put("a", Bytes::from_static(b"alpha"), ttl, &[1]).unwrap();
    generation.put("b", Bytes::from_static(b"beta"), ttl, &[1, 2]).unwrap();

    let reopened = reopen(&config, &generation);
    assert_eq!(reopened.state(), GenerationState::Open);
    assert_eq!(reopened.object_count(), 2);

    match reopened.get("a").unwrap() {
        Lookup::Found(object) => {
            assert_eq!(object.data, Bytes::from_static(b"alpha"));
            assert_eq!(object.ttl, ttl);
        }
        other => panic!("expected a hit, got {:?}", other),
    }

    let mut members = reopened.list_group(1);
    members.sort();
    assert_eq!(members, vec!["a", "b"]);
    assert_eq!(reopened.list_group(2), vec!["b"]);
}

#[test]
fn test_reopen_keeps_latest_overwrite() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);

    let generation = Generation::create(&config).unwrap();
    generation.put("k", Bytes::from_static(b"short"), in_an_hour(), &[]).unwrap();
    generation
        .put("k", Bytes::from_static(b"a much longer payload"), in_an_hour(), &[])
        .unwrap();

    let reopened = reopen(&config, &generation);
    match reopened.get("k").unwrap() {
        Lookup::Found(object) => assert_eq!(object.data, Bytes::from_static(b"a much longer payload")),
        other => panic!("expected a hit, got {:?}", other),
    }
}

#[test]
fn test_reopen_reclaims_data_tail() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);

    let generation = Generation::create(&config).unwrap();
    for i in 0..10 {
        generation
            .put(&format!("key{}", i), Bytes::from(vec![i as u8 + 1; 100]), in_an_hour(), &[])
            .unwrap();
    }
    let end = generation.logical_size();
    assert!(generation.actual_size() > end);

    let reopened = reopen(&config, &generation);
    assert_eq!(reopened.logical_size(), end);

    // new records continue from the old end, inside the allocated chunk
    let actual = reopened.actual_size();
    reopened.put("more", Bytes::from_static(b"data"), in_an_hour(), &[]).unwrap();
    assert!(reopened.logical_size() > end);
    assert_eq!(reopened.actual_size(), actual);
}

#[test]
fn test_unlogged_tail_records_are_skipped() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);

    let generation = Generation::create(&config).unwrap();
    generation.put("logged", Bytes::from_static(b"1"), in_an_hour(), &[]).unwrap();
    let data_path = generation.data_path().to_path_buf();
    let index_path = generation.index_path().to_path_buf();
    generation.close().unwrap();

    // forget the index log: every record is now past the logged end
    fs::remove_file(&index_path).unwrap();

    let reopened = Generation::open_existing(&config, &data_path).unwrap();
    reopened.load(&AtomicU32::new(0)).unwrap();
    assert_eq!(reopened.object_count(), 0);
    assert!(reopened.logical_size() > HEADER_SIZE as u64);
}

#[test]
fn test_corrupt_index_log_fails_load() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);

    let generation = Generation::create(&config).unwrap();
    generation.put("k", Bytes::from_static(b"v"), in_an_hour(), &[]).unwrap();
    let data_path = generation.data_path().to_path_buf();
    let index_path = generation.index_path().to_path_buf();
    generation.close().unwrap();

    let mut bytes = fs::read(&index_path).unwrap();
    bytes[0] = 0x13;
    fs::write(&index_path, &bytes).unwrap();

    let reopened = Generation::open_existing(&config, &data_path).unwrap();
    let result = reopened.load(&AtomicU32::new(0));
    assert!(matches!(result, Err(GenCacheError::Corruption(_))));
    reopened.close().unwrap();
}

#[test]
fn test_old_format_is_refused() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);
    let path = temp.path().join(format!("{}.db", generation_stem("gencache", 42)));

    {
        let file = BlockFile::open(&path, 4096, DEAD_BYTE, config.handle_pool_resize_interval).unwrap();
        let mut header = DataHeader::new(false, 42);
        header.version = 10;
        header.write_to(&file).unwrap();
        file.close().unwrap();
    }

    let result = Generation::open_existing(&config, &path);
    assert!(matches!(result, Err(GenCacheError::OldFormat { version: 10, .. })));
}

// =============================================================================
// Close / Delete Tests
// =============================================================================

#[test]
fn test_close_drains_queued_writes() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 1000);

    let generation = Generation::create(&config).unwrap();
    for i in 0..200 {
        generation
            .put(&format!("key{:03}", i), Bytes::from(format!("value{}", i)), in_an_hour(), &[])
            .unwrap();
    }

    let reopened = reopen(&config, &generation);
    assert_eq!(reopened.object_count(), 200);
    for i in [0, 99, 199] {
        match reopened.get(&format!("key{:03}", i)).unwrap() {
            Lookup::Found(object) => assert_eq!(object.data, Bytes::from(format!("value{}", i))),
            other => panic!("key{:03} lost: {:?}", i, other),
        }
    }
}

#[test]
fn test_close_is_idempotent_and_refuses_operations() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);

    let generation = Generation::create(&config).unwrap();
    generation.put("k", Bytes::from_static(b"v"), in_an_hour(), &[]).unwrap();
    generation.close().unwrap();
    generation.close().unwrap();

    assert_eq!(generation.state(), GenerationState::Closed);
    assert_eq!(generation.get("k").unwrap(), Lookup::Missing);
    assert!(matches!(
        generation.put("k", Bytes::from_static(b"v"), in_an_hour(), &[]),
        Err(GenCacheError::Closed)
    ));
    assert!(!generation.has_key("k"));
}

#[test]
fn test_delete_removes_both_files() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, 0);

    let generation = Generation::create(&config).unwrap();
    generation.put("k", Bytes::from_static(b"v"), in_an_hour(), &[]).unwrap();
    generation.delete().unwrap();

    assert!(!generation.data_path().exists());
    assert!(!generation.index_path().exists());
}
