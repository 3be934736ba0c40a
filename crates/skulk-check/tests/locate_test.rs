//! Integration tests for the point locator.

mod common;

use common::{write_tsm, MemorySource};
use skulk_check::check::{CheckConfig, LocateMatch, LocateQuery, Locator};
use skulk_check::tsm::{SeriesKey, ValueType};
use skulk_check::{RegionManager, TsmError};
use tempfile::TempDir;

#[test]
fn test_single_block_match() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.tsm");
    let entries = write_tsm(
        &path,
        &[
            ("cpu", ValueType::Integer, &[0, 10, 20]),
            ("cpu", ValueType::Integer, &[30, 40]),
            ("mem", ValueType::Integer, &[5, 15]),
        ],
    );

    let manager = RegionManager::new();
    let locator = Locator::with_manager(manager.clone());
    let matches = locator.locate_file(&path, &LocateQuery::new(40)).unwrap();
    assert_eq!(
        matches,
        vec![LocateMatch {
            key: SeriesKey::from("cpu"),
            offset: entries[1].offset,
            block_min: 30,
            block_max: 40,
        }]
    );
    assert_eq!(manager.snapshot().total(), 0);
}

#[test]
fn test_absent_timestamp_yields_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.tsm");
    write_tsm(&path, &[("cpu", ValueType::Integer, &[0, 10, 20])]);

    let matches = Locator::new().locate_file(&path, &LocateQuery::new(15)).unwrap();
    assert!(matches.is_empty());
}

#[test]
fn test_value_type_filter() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.tsm");
    write_tsm(
        &path,
        &[
            ("requests", ValueType::Integer, &[100, 200]),
            ("latency", ValueType::Float, &[100, 300]),
            ("status", ValueType::String, &[50, 100]),
        ],
    );

    let locator = Locator::new();
    let all = locator.locate_file(&path, &LocateQuery::new(100)).unwrap();
    let keys: Vec<_> = all.iter().map(|m| m.key.to_string()).collect();
    assert_eq!(keys, vec!["requests", "latency", "status"]);

    let ints = locator
        .locate_file(&path, &LocateQuery::new(100).with_value_type(ValueType::Integer))
        .unwrap();
    assert_eq!(ints.len(), 1);
    assert_eq!(ints[0].key, SeriesKey::from("requests"));
}

#[test]
fn test_duplicate_timestamps_match_once() {
    let source = MemorySource::new(0, 10)
        .key("cpu", ValueType::Integer)
        .block(0, 10, &[0, 7, 7, 7, 10]);

    let matches = Locator::new().locate(&source, &LocateQuery::new(7)).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!((matches[0].block_min, matches[0].block_max), (0, 10));
}

#[test]
fn test_match_outside_declared_bounds_is_found() {
    // The index claims [0, 5], but the block really holds 9.
    let source = MemorySource::new(0, 5)
        .key("cpu", ValueType::Integer)
        .block(0, 5, &[0, 9, 5]);

    let matches = Locator::new().locate(&source, &LocateQuery::new(9)).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].offset, source.offset_of("cpu", 0));
}

#[test]
fn test_undecodable_blocks_are_skipped() {
    let source = MemorySource::new(0, 20)
        .key("cpu", ValueType::Integer)
        .corrupt_block(0, 10, "column truncated")
        .block(10, 20, &[10, 20]);

    let matches = Locator::new().locate(&source, &LocateQuery::new(10)).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].offset, source.offset_of("cpu", 1));
}

#[test]
fn test_entry_failure_is_an_error() {
    let source = MemorySource::new(0, 10)
        .key("cpu", ValueType::Integer)
        .block(0, 10, &[0, 10])
        .break_entries("cpu");

    assert!(matches!(
        Locator::new().locate(&source, &LocateQuery::new(0)),
        Err(TsmError::IndexDecode(_))
    ));
}

#[test]
fn test_locate_all_uses_configured_query() {
    let dir = TempDir::new().unwrap();
    let shard = dir.path().join("db").join("rp").join("1");
    std::fs::create_dir_all(&shard).unwrap();
    let hit = shard.join("000002.tsm");
    let entries = write_tsm(
        &hit,
        &[
            ("requests", ValueType::Integer, &[100, 200]),
            ("latency", ValueType::Float, &[100, 300]),
        ],
    );
    write_tsm(&shard.join("000001.tsm"), &[("requests", ValueType::Integer, &[1, 2])]);
    std::fs::write(shard.join("000003.tsm"), b"").unwrap();

    let locator = Locator::new();
    assert!(locator.locate_all(&CheckConfig::new(dir.path())).unwrap().is_empty());

    let config = CheckConfig::new(dir.path())
        .with_locate_timestamp(100)
        .with_locate_value_type(ValueType::Integer);
    let found = locator.locate_all(&config).unwrap();
    assert_eq!(
        found,
        vec![(
            hit,
            vec![LocateMatch {
                key: SeriesKey::from("requests"),
                offset: entries[0].offset,
                block_min: 100,
                block_max: 200,
            }]
        )]
    );
}
