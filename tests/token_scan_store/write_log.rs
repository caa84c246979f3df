//! Write log of merges performed by store writers

use std::time::Duration;

use crate::common::*;
use chrono::Utc;
use tokenscan::{RangeKey, WriteLog, WriteLogKind, RANGE_SIZE};
use tokenscan_storage::write_log::{list_segments, read_all};

fn logged(config: ScanStoreConfig) -> ScanStoreConfig {
    config.with_write_log("writelog").with_rotation_threshold(1024)
}

#[test]
fn merges_are_replayable() {
    let test = TestStore::with_config(logged(ScanStoreConfig::for_testing()));
    test.add(3, &[1, 2]);
    test.write(EntityTokenUpdate::token_changes(3, &[1, 2], &[2]));

    let records = read_all(&test.dir.path().join("writelog")).unwrap();
    let merges: Vec<_> = records
        .iter()
        .filter(|r| r.kind == WriteLogKind::Merge && r.key == RangeKey::new(1, 0))
        .collect();
    assert_eq!(merges.len(), 2);
    assert_eq!(merges[0].result.offsets().collect::<Vec<_>>(), vec![3]);
    assert!(merges[1].result.is_empty());
    assert_eq!(merges[1].clear.offsets().collect::<Vec<_>>(), vec![3]);

    let opens = records
        .iter()
        .filter(|r| r.kind == WriteLogKind::SessionOpen)
        .count();
    let closes = records
        .iter()
        .filter(|r| r.kind == WriteLogKind::SessionClose)
        .count();
    assert_eq!(opens, closes);
    assert!(opens >= 2);
}

#[test]
fn segments_rotate_at_threshold() {
    let test = TestStore::with_config(logged(ScanStoreConfig::for_testing()));
    let mut writer = test.store.new_writer().unwrap();
    for entity in 0..200u64 {
        writer
            .write(&EntityTokenUpdate::added(entity * RANGE_SIZE, &[1]))
            .unwrap();
    }
    writer.close().unwrap();

    let dir = test.dir.path().join("writelog");
    let segments = list_segments(&dir).unwrap();
    assert!(segments.len() > 1);
    for (_, path) in &segments {
        assert!(std::fs::metadata(path).unwrap().len() <= 1024);
    }
    let merges = read_all(&dir)
        .unwrap()
        .into_iter()
        .filter(|r| r.kind == WriteLogKind::Merge)
        .count();
    assert_eq!(merges, 200);
}

#[test]
fn restart_continues_with_next_segment() {
    let test = TestStore::with_config(logged(ScanStoreConfig::for_testing()));
    test.add(1, &[1]);
    let dir = test.dir.path().join("writelog");
    let last_before = list_segments(&dir).unwrap().last().unwrap().0;

    let test = test.restart();
    test.add(2, &[1]);
    let segments = list_segments(&dir).unwrap();
    assert_eq!(segments.last().unwrap().0, last_before + 1);
    assert!(segments.iter().any(|(number, _)| *number == last_before));
}

#[test]
fn prune_keeps_current_segment() {
    let test = TestStore::with_config(logged(ScanStoreConfig::for_testing()));
    test.add(1, &[1]);
    test.store.shutdown().unwrap();
    let dir = test.dir.path().join("writelog");

    let log = WriteLog::open(&dir, 1024, Duration::from_secs(3600)).unwrap();
    let before = list_segments(&dir).unwrap().len();
    assert!(before > 1);

    let pruned = log
        .prune_older_than(Utc::now() + chrono::Duration::seconds(1))
        .unwrap();
    assert_eq!(pruned, before - 1);
    let remaining = list_segments(&dir).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].0, log.current_segment());
}

#[test]
fn disabled_log_writes_nothing() {
    let test = TestStore::new();
    test.add(1, &[1]);
    assert!(!test.dir.path().join("writelog").exists());
}

#[test]
fn read_only_store_opens_no_log() {
    let test = TestStore::new();
    test.add(1, &[1]);
    test.store.shutdown().unwrap();

    let test = test.reopen_with(|config| logged(config).with_read_only(true));
    assert_eq!(test.ids(1, None), vec![1]);
    assert!(!test.dir.path().join("writelog").exists());
}
