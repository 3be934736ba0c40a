//! Integration tests for the integrity verifier.

mod common;

use common::{write_tsm, MemorySource};
use skulk_check::check::{Anomaly, AnomalyKind, Bound, CancelToken, CheckConfig, Scope, Verifier};
use skulk_check::tsm::{SeriesKey, TimeBounds, ValueType};
use skulk_check::{RegionManager, TsmError};
use std::fs;
use tempfile::TempDir;

fn verifier() -> Verifier {
    Verifier::new(CheckConfig::default())
}

#[test]
fn test_contiguous_entries_are_clean() {
    let source = MemorySource::new(0, 30)
        .key("cpu", ValueType::Integer)
        .block(0, 10, &[0, 4, 10])
        .block(10, 20, &[10, 15, 20])
        .block(20, 30, &[20, 30]);

    let report = verifier().verify(&source).unwrap();
    assert!(report.is_clean(), "{:?}", report.anomalies);
    assert_eq!(report.keys.len(), 1);
    assert_eq!(report.keys[0].index_bounds, Some(TimeBounds::new(0, 30)));
    assert_eq!(report.keys[0].observed_bounds, Some(TimeBounds::new(0, 30)));
    assert_eq!(report.observed, Some(TimeBounds::new(0, 30)));
}

#[test]
fn test_overlapping_entry_flagged_once() {
    let source = MemorySource::new(0, 15)
        .key("cpu", ValueType::Integer)
        .block(0, 10, &[0, 10])
        .block(5, 15, &[5, 15]);

    let report = verifier().verify(&source).unwrap();
    assert_eq!(report.counts().ordering, 1);
    assert_eq!(report.counts().total(), 1);
    match &report.anomalies[0] {
        Anomaly::Ordering {
            offset,
            violations,
            previous,
            ..
        } => {
            assert_eq!(*offset, source.offset_of("cpu", 1));
            assert_eq!(*previous, TimeBounds::new(0, 10));
            assert!(violations.min_before_previous_max);
            assert!(!violations.min_before_previous_min);
            assert!(!violations.max_before_previous_max);
        }
        other => panic!("unexpected anomaly {:?}", other),
    }
}

#[test]
fn test_regressing_entry_records_every_predicate() {
    let source = MemorySource::new(0, 20)
        .key("cpu", ValueType::Integer)
        .block(10, 20, &[10, 20])
        .block(0, 5, &[0, 5]);

    let report = verifier().verify(&source).unwrap();
    assert_eq!(report.counts().ordering, 1);
    let Anomaly::Ordering { violations, .. } = &report.anomalies[0] else {
        panic!("expected ordering anomaly");
    };
    assert!(violations.min_before_previous_min);
    assert!(violations.min_before_previous_max);
    assert!(violations.max_before_previous_max);
}

#[test]
fn test_equal_bounds_between_entries_are_allowed() {
    let source = MemorySource::new(5, 5)
        .key("cpu", ValueType::Integer)
        .block(5, 5, &[5])
        .block(5, 5, &[5, 5]);

    assert!(verifier().verify(&source).unwrap().is_clean());
}

#[test]
fn test_declared_min_below_decoded_first() {
    let source = MemorySource::new(0, 7)
        .key("cpu", ValueType::Integer)
        .block(0, 7, &[5, 6, 7]);

    let report = verifier().verify(&source).unwrap();
    let key = SeriesKey::from("cpu");
    let block_level: Vec<_> = report.anomalies_for(&key).collect();
    assert_eq!(
        block_level,
        vec![&Anomaly::BoundsMismatch {
            scope: Scope::Block {
                key: key.clone(),
                offset: source.offset_of("cpu", 0),
            },
            bound: Bound::Min,
            observed: 5,
            expected: 0,
        }]
    );

    // The header also claims 0, but no decoded sample is below 5.
    assert!(report.anomalies.contains(&Anomaly::BoundsMismatch {
        scope: Scope::File,
        bound: Bound::Min,
        observed: 5,
        expected: 0,
    }));
    assert_eq!(report.counts().bounds_mismatch, 2);
}

#[test]
fn test_regression_inside_block() {
    let source = MemorySource::new(1, 2)
        .key("cpu", ValueType::Integer)
        .block(1, 1, &[1, 2, 1]);

    let report = verifier().verify(&source).unwrap();
    assert_eq!(
        report.anomalies,
        vec![Anomaly::Monotonicity {
            key: SeriesKey::from("cpu"),
            offset: source.offset_of("cpu", 0),
            position: 2,
            value: 1,
            previous: 2,
        }]
    );
}

#[test]
fn test_decode_failure_is_recorded_and_skipped() {
    let source = MemorySource::new(0, 30)
        .key("cpu", ValueType::Float)
        .block(0, 10, &[0, 10])
        .corrupt_block(10, 20, "block checksum mismatch")
        .block(20, 30, &[20, 30]);

    let report = verifier().verify(&source).unwrap();
    assert_eq!(report.counts().block_decode, 1);
    assert_eq!(report.counts().total(), 1);
    assert_eq!(report.anomalies[0].offset(), Some(source.offset_of("cpu", 1)));
    assert_eq!(report.keys[0].block_count, 3);
    assert_eq!(report.keys[0].point_count, 4);
}

#[test]
fn test_empty_block_is_a_decode_anomaly() {
    let source = MemorySource::new(0, 10)
        .key("flag", ValueType::Boolean)
        .block(0, 0, &[])
        .block(0, 10, &[0, 10]);

    let report = verifier().verify(&source).unwrap();
    assert_eq!(report.counts().block_decode, 1);
    assert_eq!(report.observed, Some(TimeBounds::new(0, 10)));
}

#[test]
fn test_entry_list_failure_is_fatal() {
    let source = MemorySource::new(0, 10)
        .key("cpu", ValueType::Integer)
        .block(0, 10, &[0, 10])
        .break_entries("cpu");

    let err = verifier().verify(&source).unwrap_err();
    assert!(matches!(err, TsmError::IndexDecode(_)));
    assert!(err.is_fatal_for_file());
}

#[test]
fn test_fatal_block_read_aborts_file() {
    let source = MemorySource::new(0, 10)
        .key("cpu", ValueType::Integer)
        .unreadable_block(0, 10);

    assert!(matches!(verifier().verify(&source), Err(TsmError::IoError(_))));
}

#[test]
fn test_anomalies_follow_key_ordinal_order() {
    let source = MemorySource::new(0, 10)
        .key("zeta", ValueType::Integer)
        .block(0, 10, &[0, 10])
        .block(0, 10, &[0, 10])
        .key("alpha", ValueType::String)
        .block(0, 10, &[0, 5, 10])
        .block(0, 5, &[0, 5]);

    let report = verifier().verify(&source).unwrap();
    let keys: Vec<_> = report.anomalies.iter().filter_map(Anomaly::key).cloned().collect();
    assert_eq!(keys, vec![SeriesKey::from("zeta"), SeriesKey::from("alpha")]);
    assert_eq!(report.keys[0].key, SeriesKey::from("zeta"));
}

#[test]
fn test_target_key_skips_other_keys_and_file_bounds() {
    let source = MemorySource::new(0, 100)
        .key("a", ValueType::Integer)
        .block(10, 5, &[10, 5])
        .key("b", ValueType::Integer)
        .block(0, 10, &[0, 10]);

    let verifier = Verifier::new(CheckConfig::default().with_target_key("b"));
    let report = verifier.verify(&source).unwrap();
    assert_eq!(report.key_count, 2);
    assert_eq!(report.keys.len(), 1);
    assert!(report.is_clean());
}

#[test]
fn test_cancel_stops_between_keys() {
    let source = MemorySource::new(0, 10)
        .key("a", ValueType::Integer)
        .block(0, 10, &[0, 10]);

    let cancel = CancelToken::new();
    let verifier = Verifier::new(CheckConfig::default()).with_cancel_token(cancel.clone());
    cancel.cancel();

    let report = verifier.verify(&source).unwrap();
    assert!(report.cancelled);
    assert!(report.anomalies.is_empty());
    assert!(report.observed.is_none());
}

#[test]
fn test_scan_file_detects_corrupted_block() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.tsm");
    let entries = write_tsm(
        &path,
        &[
            ("a", ValueType::Integer, &[0, 5, 10]),
            ("a", ValueType::Integer, &[20, 25, 30]),
            ("b", ValueType::Float, &[0, 30]),
        ],
    );

    let mut bytes = fs::read(&path).unwrap();
    bytes[entries[0].offset as usize + 11] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let report = verifier().scan_file(&path).unwrap();
    let counts = report.counts();
    assert_eq!(counts.block_decode, 1);
    assert_eq!(counts.checksum_mismatch, 1);
    assert_eq!(counts.total(), 2);
    let skipped = report
        .anomalies
        .iter()
        .find(|a| a.kind() == AnomalyKind::BlockDecode)
        .unwrap();
    assert_eq!(skipped.offset(), Some(entries[0].offset));

    let unchecked = Verifier::new(CheckConfig::default().with_verify_checksum(false))
        .scan_file(&path)
        .unwrap();
    assert!(unchecked.checksum.is_none());
    assert_eq!(unchecked.counts().total(), 1);
}

#[test]
fn test_scan_file_detects_unordered_index() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.tsm");
    let entries = write_tsm(
        &path,
        &[
            ("cpu", ValueType::Unsigned, &[10, 20]),
            ("cpu", ValueType::Unsigned, &[0, 5]),
        ],
    );

    let report = verifier().scan_file(&path).unwrap();
    assert_eq!(report.counts().ordering, 1);
    assert_eq!(report.anomalies[0].offset(), Some(entries[1].offset));
}

#[test]
fn test_scan_file_rejects_repeated_index_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("000001.tsm");
    let entries = write_tsm(
        &path,
        &[
            ("aa", ValueType::Integer, &[10, 20]),
            ("aa", ValueType::Integer, &[0, 5]),
            ("ab", ValueType::Integer, &[30, 40]),
        ],
    );
    assert_eq!(verifier().scan_file(&path).unwrap().counts().ordering, 1);

    // The index follows the last block; "ab" is the second key record.
    let index_offset = (entries[2].offset + u64::from(entries[2].size)) as usize;
    let key_at = index_offset + 4 + (2 + 2 + 1 + 4 + 2 * 28) + 2;
    let mut bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[key_at..key_at + 2], b"ab");
    bytes[key_at + 1] = b'a';
    fs::write(&path, &bytes).unwrap();

    let err = verifier().scan_file(&path).unwrap_err();
    assert!(matches!(err, TsmError::IndexDecode(_)), "{err}");
}

#[test]
fn test_scan_all_isolates_failures() {
    let dir = TempDir::new().unwrap();
    let shard = dir.path().join("db").join("rp").join("1");
    fs::create_dir_all(&shard).unwrap();

    write_tsm(&shard.join("000003.tsm"), &[("cpu", ValueType::Integer, &[1, 2, 3])]);
    fs::write(shard.join("000001.tsm"), vec![0u8; 200]).unwrap();
    fs::write(shard.join("000002.tsm"), b"").unwrap();
    fs::write(shard.join("fields.idx"), b"not a tsm file").unwrap();

    let manager = RegionManager::new();
    let verifier = Verifier::with_manager(CheckConfig::new(dir.path()), manager.clone());
    let outcomes = verifier.scan_all().unwrap();

    assert_eq!(outcomes.len(), 3);
    assert!(matches!(outcomes[0].result, Err(TsmError::InvalidMagic(_))));
    assert!(matches!(outcomes[1].result, Err(TsmError::IndexDecode(_))));
    let report = outcomes[2].result.as_ref().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.path.as_deref(), Some(shard.join("000003.tsm").as_path()));

    assert_eq!(manager.snapshot().total(), 0);
}

#[test]
fn test_scan_all_honours_cancellation() {
    let dir = TempDir::new().unwrap();
    write_tsm(&dir.path().join("000001.tsm"), &[("cpu", ValueType::Integer, &[1])]);

    let cancel = CancelToken::new();
    cancel.cancel();
    let verifier = Verifier::new(CheckConfig::new(dir.path())).with_cancel_token(cancel);
    assert!(verifier.scan_all().unwrap().is_empty());
}

#[test]
fn test_scan_all_missing_root() {
    let dir = TempDir::new().unwrap();
    let verifier = Verifier::new(CheckConfig::new(dir.path().join("absent")));
    assert!(matches!(verifier.scan_all(), Err(TsmError::Open { .. })));
}
