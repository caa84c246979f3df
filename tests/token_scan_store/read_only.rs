//! Stores opened read-only

use std::sync::Arc;

use crate::common::*;
use tempfile::TempDir;
use tokenscan::StoreFile;

fn read_only(config: ScanStoreConfig) -> ScanStoreConfig {
    config.with_read_only(true)
}

#[test]
fn writer_is_refused() {
    let test = TestStore::new();
    test.add(1, &[1]);
    test.store.shutdown().unwrap();

    let test = test.reopen_with(read_only);
    let err = test.store.new_writer().unwrap_err();
    assert!(matches!(err, TokenScanError::ReadOnly(_)));
    assert!(err.to_string().contains("Label scan store"));
    assert_eq!(test.ids(1, None), vec![1]);
}

#[test]
fn force_and_shutdown_leave_file_untouched() {
    let test = TestStore::new();
    test.add(2, &[5]);
    test.store.shutdown().unwrap();
    let before = std::fs::read(test.store_file()).unwrap();

    let test = test.reopen_with(read_only);
    test.store.force().unwrap();
    test.store.shutdown().unwrap();
    assert_eq!(std::fs::read(test.store_file()).unwrap(), before);
}

#[test]
fn missing_file_fails_init() {
    let dir = TempDir::new().unwrap();
    let test = TestStore::unstarted(
        dir,
        Arc::new(GroundTruth::new()),
        read_only(ScanStoreConfig::for_testing()),
    );

    let err = test.store.init().unwrap_err();
    assert!(matches!(err, TokenScanError::StoreNotFound { .. }));
    assert!(err.to_string().contains("Label scan store"));
    assert_eq!(test.store.state(), StoreState::Closed);
    assert!(!test.store_file().exists());
}

#[test]
fn dirty_file_is_served_without_rebuild() {
    let test = TestStore::new();
    test.add(8, &[3]);
    test.store.force().unwrap();
    // entity 9 exists only in the ground truth
    test.truth.set(9, &[3]);

    let test = test.reopen_with(read_only);
    assert!(test.store.is_dirty());
    assert!(!test.monitor.saw(&MonitorEvent::Rebuilding));
    assert_eq!(test.ids(3, None), vec![8]);
    assert!(!StoreFile::new(test.store_file()).read_header().unwrap().clean);
}
