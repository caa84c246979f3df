//! Dirty detection and rebuild from the change stream

use crate::common::*;
use rand::SeedableRng;

fn populate(test: &TestStore, entities: u64, seed: u64) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut writer = test.store.new_writer().unwrap();
    for entity in 0..entities {
        let tokens = random_tokens(&mut rng, 6);
        test.truth.set(entity, &tokens);
        writer.write(&EntityTokenUpdate::added(entity, &tokens)).unwrap();
    }
    writer.close().unwrap();
}

fn assert_matches_truth(test: &TestStore) {
    for token in test.truth.all_tokens() {
        assert_eq!(test.ids(token, None), test.truth.entities_with(token), "token {}", token);
    }
    let report = test.store.check_consistency().unwrap();
    assert!(report.is_consistent(), "{:?}", report);
}

#[test]
fn crash_is_detected_and_rebuilt() {
    let test = TestStore::new();
    populate(&test, 1_000, 1);
    test.store.force().unwrap();
    // not persisted before the crash
    test.add(5_000, &[2]);

    let test = test.crash_and_restart();
    assert!(test.monitor.saw(&MonitorEvent::Rebuilding));
    assert!(test
        .monitor
        .events()
        .iter()
        .any(|event| matches!(event, MonitorEvent::Rebuilt(n) if *n > 0)));
    assert!(!test.store.is_dirty());
    assert_matches_truth(&test);
}

#[test]
fn zero_length_file_is_rebuilt() {
    let test = TestStore::new();
    populate(&test, 300, 2);
    test.store.shutdown().unwrap();
    std::fs::write(test.store_file(), b"").unwrap();

    let test = test.reopen_with(|config| config);
    assert!(test
        .monitor
        .events()
        .iter()
        .any(|event| matches!(event, MonitorEvent::NotValidIndex(_))));
    assert!(test.monitor.saw(&MonitorEvent::Rebuilding));
    assert_matches_truth(&test);
}

#[test]
fn scrambled_file_is_rebuilt() {
    let test = TestStore::new();
    populate(&test, 500, 3);
    test.store.shutdown().unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    scramble_file(&test.store_file(), &mut rng);

    let test = test.reopen_with(|config| config);
    assert!(test.monitor.saw(&MonitorEvent::Rebuilding));
    assert_matches_truth(&test);
}

#[test]
fn deleted_file_is_rebuilt() {
    let test = TestStore::new();
    populate(&test, 100, 4);
    test.store.shutdown().unwrap();
    std::fs::remove_file(test.store_file()).unwrap();

    let test = test.reopen_with(|config| config);
    assert!(test.monitor.saw(&MonitorEvent::NoIndex));
    assert_matches_truth(&test);
}

#[test]
fn panicked_database_rebuilds_on_next_start() {
    let test = TestStore::new();
    populate(&test, 200, 5);
    test.store.shutdown().unwrap();

    let test = test.reopen_with(|config| config);
    assert!(!test.monitor.saw(&MonitorEvent::Rebuilding));
    test.add(900, &[1]);
    test.health.panic("disk full");
    test.store.shutdown().unwrap();
    assert!(test
        .monitor
        .saw(&MonitorEvent::ShutdownWithoutFlush(Some("disk full".to_string()))));

    let test = test.reopen_with(|config| config);
    assert!(test.monitor.saw(&MonitorEvent::Rebuilding));
    assert_eq!(test.ids(1, Some(899)), vec![900]);
    assert_matches_truth(&test);
}

#[test]
fn clean_store_initialised_but_never_started_stays_clean() {
    let test = TestStore::new();
    populate(&test, 50, 6);
    test.store.shutdown().unwrap();

    let test = test.reopen_unstarted();
    test.store.init().unwrap();
    assert_eq!(test.store.state(), StoreState::Clean);
    test.store.shutdown().unwrap();

    let test = test.reopen_with(|config| config);
    assert!(!test.monitor.saw(&MonitorEvent::Rebuilding));
    assert_matches_truth(&test);
}

#[test]
fn dirty_store_initialised_but_never_started_is_rebuilt_later() {
    let test = TestStore::new();
    populate(&test, 50, 7);

    let test = test.reopen_unstarted();
    test.store.init().unwrap();
    assert_eq!(test.store.state(), StoreState::Dirty);
    test.store.shutdown().unwrap();

    let test = test.reopen_with(|config| config);
    assert!(test.monitor.saw(&MonitorEvent::Rebuilding));
    assert_matches_truth(&test);
}

#[test]
fn unsorted_change_stream_fails_rebuild_until_fixed() {
    let test = TestStore::new();
    populate(&test, 20, 8);
    test.truth.set(21, &[4, 1]);

    let test = test.reopen_unstarted();
    test.store.init().unwrap();
    let err = test.store.start().unwrap_err();
    assert!(err.is_unsorted());
    assert_eq!(test.store.state(), StoreState::Dirty);
    assert!(test.store.new_reader().is_err());

    test.truth.set(21, &[1, 4]);
    test.store.start().unwrap();
    assert_eq!(test.store.state(), StoreState::Started);
    assert_matches_truth(&test);
}
