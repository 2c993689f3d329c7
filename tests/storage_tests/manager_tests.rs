//! Tests for Storage operations
//!
//! These tests verify:
//! - get/put/remove against a single generation
//! - Reads scan newest → oldest and writes go to the newest
//! - Removals shadow older generations, also after a restart
//! - Group and regex queries union every generation
//! - Stats and key reports

use std::fs;
use std::sync::Arc;
use std::thread;

use gencache::{clock, GenCacheError};
use tempfile::TempDir;

use super::common::{config, in_an_hour, open, value, HOUR_MS};

// =============================================================================
// Basic Operation Tests
// =============================================================================

#[test]
fn test_put_get_remove() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));
    let ttl = in_an_hour();

    storage.put("a", "hello", ttl, &[]).unwrap();
    let object = storage.get("a").unwrap().unwrap();
    assert_eq!(&object.data[..], b"hello");
    assert_eq!(object.ttl, ttl);

    storage.remove("a").unwrap();
    assert_eq!(value(&storage, "a"), None);
}

#[test]
fn test_missing_key_is_none() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    assert!(storage.get("nothing").unwrap().is_none());
}

#[test]
fn test_expired_key_is_none() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    storage.put("old", "v", clock::now_millis() - HOUR_MS, &[]).unwrap();
    assert_eq!(value(&storage, "old"), None);
}

#[test]
fn test_invalid_puts_are_rejected() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    assert!(matches!(storage.put("", "v", in_an_hour(), &[]), Err(GenCacheError::EmptyKey)));
    assert!(matches!(
        storage.put("k", Vec::new(), in_an_hour(), &[]),
        Err(GenCacheError::EmptyPayload)
    ));
}

#[test]
fn test_data_survives_restart() {
    let temp = TempDir::new().unwrap();
    {
        let (storage, _driver) = open(config(&temp));
        for i in 0..50 {
            storage
                .put(&format!("key{}", i), format!("value{}", i), in_an_hour(), &[])
                .unwrap();
        }
        storage.close().unwrap();
    }

    let (storage, _driver) = open(config(&temp));
    assert_eq!(storage.generation_count(), 1);
    for i in 0..50 {
        assert_eq!(
            value(&storage, &format!("key{}", i)),
            Some(format!("value{}", i).into_bytes())
        );
    }
}

// =============================================================================
// Generation Chain Tests
// =============================================================================

#[test]
fn test_get_falls_back_to_older_generation() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    storage.put("k", "old gen", in_an_hour(), &[]).unwrap();
    storage.rotate().unwrap();
    assert_eq!(storage.generation_count(), 2);

    assert_eq!(value(&storage, "k"), Some(b"old gen".to_vec()));
}

#[test]
fn test_put_goes_to_newest_and_purges_older() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    storage.put("k", "first", in_an_hour(), &[]).unwrap();
    storage.rotate().unwrap();
    storage.put("k", "second", in_an_hour(), &[]).unwrap();

    let generations = storage.generations();
    assert!(!generations[0].has_key("k"));
    assert!(generations[1].has_key("k"));
    assert_eq!(value(&storage, "k"), Some(b"second".to_vec()));
}

#[test]
fn test_remove_shadows_older_generation() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    storage.put("k", "stale", in_an_hour(), &[]).unwrap();
    storage.rotate().unwrap();
    storage.remove("k").unwrap();

    assert_eq!(value(&storage, "k"), None);
    assert!(!storage.generations()[0].has_key("k"));
}

#[test]
fn test_remove_shadows_older_generation_after_restart() {
    let temp = TempDir::new().unwrap();
    {
        let (storage, _driver) = open(config(&temp));
        storage.put("k", "stale", in_an_hour(), &[]).unwrap();
        storage.rotate().unwrap();
        storage.remove("k").unwrap();
        storage.close().unwrap();
    }

    let (storage, _driver) = open(config(&temp));
    assert_eq!(storage.generation_count(), 2);
    // the newer generation's removal shadows the reloaded copy
    assert!(!storage.generations()[0].has_key("k"));
    assert_eq!(value(&storage, "k"), None);
}

#[test]
fn test_overwritten_groups_stay_exact_after_restart() {
    let temp = TempDir::new().unwrap();
    {
        let (storage, _driver) = open(config(&temp));
        storage.put("k", "1", in_an_hour(), &[1]).unwrap();
        storage.rotate().unwrap();
        storage.put("k", "2", in_an_hour(), &[2]).unwrap();
        storage.close().unwrap();
    }

    let (storage, _driver) = open(config(&temp));
    assert!(storage.list_group(1).is_empty());
    assert_eq!(storage.list_group(2), vec!["k"]);
    assert_eq!(value(&storage, "k"), Some(b"2".to_vec()));
}

#[test]
fn test_put_after_cross_generation_remove() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    storage.put("k", "one", in_an_hour(), &[]).unwrap();
    storage.rotate().unwrap();
    storage.remove("k").unwrap();
    storage.put("k", "two", in_an_hour(), &[]).unwrap();

    assert_eq!(value(&storage, "k"), Some(b"two".to_vec()));
}

// =============================================================================
// Group Tests
// =============================================================================

#[test]
fn test_list_group_unions_generations() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    storage.put("b", "1", in_an_hour(), &[7]).unwrap();
    storage.rotate().unwrap();
    storage.put("a", "2", in_an_hour(), &[7]).unwrap();
    storage.put("c", "3", in_an_hour(), &[8]).unwrap();

    assert_eq!(storage.list_group(7), vec!["a", "b"]);
    assert_eq!(storage.list_group(8), vec!["c"]);
    assert!(storage.list_group(9).is_empty());
}

#[test]
fn test_group_moves_with_latest_put_across_generations() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    storage.put("k", "1", in_an_hour(), &[1]).unwrap();
    storage.rotate().unwrap();
    storage.put("k", "2", in_an_hour(), &[2]).unwrap();

    assert!(storage.list_group(1).is_empty());
    assert_eq!(storage.list_group(2), vec!["k"]);
}

#[test]
fn test_remove_group_removes_and_notifies() {
    let temp = TempDir::new().unwrap();
    let (storage, driver) = open(config(&temp));

    storage.put("b", "1", in_an_hour(), &[7]).unwrap();
    storage.rotate().unwrap();
    storage.put("a", "2", in_an_hour(), &[7]).unwrap();
    storage.put("keep", "3", in_an_hour(), &[8]).unwrap();

    let removed = storage.remove_group(7).unwrap();
    assert_eq!(removed, vec!["a", "b"]);
    assert_eq!(*driver.removed.lock(), vec!["a", "b"]);

    assert_eq!(value(&storage, "a"), None);
    assert_eq!(value(&storage, "b"), None);
    assert_eq!(value(&storage, "keep"), Some(b"3".to_vec()));
    assert!(storage.list_group(7).is_empty());
}

// =============================================================================
// Search Tests
// =============================================================================

#[test]
fn test_regex_find_keys_is_anchored_and_sorted() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    for key in ["user:2", "user:1", "user:12", "admin:user:1"] {
        storage.put(key, "v", in_an_hour(), &[]).unwrap();
    }
    storage.rotate().unwrap();
    storage.put("user:3", "v", in_an_hour(), &[]).unwrap();

    assert_eq!(
        storage.regex_find_keys(r"user:\d").unwrap(),
        vec!["user:1", "user:2", "user:3"]
    );
    assert_eq!(storage.regex_find_keys("user:1|user:12").unwrap(), vec!["user:1", "user:12"]);
}

#[test]
fn test_invalid_pattern_is_an_error() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    assert!(matches!(
        storage.regex_find_keys("user:("),
        Err(GenCacheError::InvalidPattern(_))
    ));
}

// =============================================================================
// Report Tests
// =============================================================================

#[test]
fn test_dump_stats_totals() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    storage.put("a", "1", in_an_hour(), &[]).unwrap();
    storage.put("b", "2", in_an_hour(), &[]).unwrap();
    storage.get("a").unwrap();
    storage.get("missing").unwrap();

    let lines = storage.dump_stats(false);
    assert!(lines.contains(&"Total Gets:  2".to_string()));
    assert!(lines.contains(&"Gets:        1".to_string()));
    assert!(lines.contains(&"Puts:        2".to_string()));
    assert!(lines.contains(&"Gets v Puts: 33%".to_string()));
    assert!(lines.contains(&String::new()));
}

#[test]
fn test_dump_stats_without_traffic_has_no_ratio() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    let lines = storage.dump_stats(true);
    assert!(lines.contains(&"Total Gets:  0".to_string()));
    assert!(!lines.iter().any(|line| line.starts_with("Gets v Puts")));
}

#[test]
fn test_write_key_data_report() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));

    storage.put("a", "1", in_an_hour(), &[]).unwrap();
    storage.rotate().unwrap();
    storage.put("b", "2", in_an_hour(), &[]).unwrap();

    let report = temp.path().join("keys.tsv");
    storage.write_key_data(&report).unwrap();

    let text = fs::read_to_string(&report).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "File\tCacheKey\tAddress\tTTL");
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().any(|line| line.split('\t').nth(1) == Some("a")));
    assert!(lines.iter().any(|line| line.split('\t').nth(1) == Some("b")));
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_close_is_idempotent_and_refuses_operations() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));
    storage.put("k", "v", in_an_hour(), &[]).unwrap();

    storage.close().unwrap();
    storage.close().unwrap();

    assert!(storage.is_closed());
    assert!(matches!(storage.get("k"), Err(GenCacheError::Closed)));
    assert!(matches!(storage.put("k", "v", in_an_hour(), &[]), Err(GenCacheError::Closed)));
    assert!(matches!(storage.remove("k"), Err(GenCacheError::Closed)));
    assert!(matches!(storage.rotate(), Err(GenCacheError::Closed)));
    assert_eq!(storage.generation_count(), 0);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_clients() {
    let temp = TempDir::new().unwrap();
    let (storage, _driver) = open(config(&temp));
    let storage = Arc::new(storage);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let storage = Arc::clone(&storage);
            thread::spawn(move || {
                for i in 0..100 {
                    let key = format!("k{}", i % 20);
                    storage.put(&key, format!("{}-{}", t, i), in_an_hour(), &[t]).unwrap();
                    storage.get(&key).unwrap();
                    if i % 10 == 0 {
                        storage.remove(&key).unwrap();
                    }
                }
            })
        })
        .collect();

    // rotate underneath the clients
    storage.rotate().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }

    let mut total = 0;
    for group in 0..8 {
        total += storage.list_group(group).len();
    }
    let live = (0..20)
        .filter(|i| storage.get(&format!("k{}", i)).unwrap().is_some())
        .count();
    // every live key sits in exactly one group
    assert_eq!(total, live);
}
