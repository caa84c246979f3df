//! Writing token changes and querying them back

use crate::common::*;
use proptest::prelude::*;
use rand::{Rng, SeedableRng};

#[test]
fn label_change_moves_entity() {
    let test = TestStore::new();
    test.add(0, &[1]);
    test.write(EntityTokenUpdate::token_changes(0, &[1], &[2]));

    assert!(test.ids(1, None).is_empty());
    assert_eq!(test.ids(2, None), vec![0]);
}

#[test]
fn added_labels_accumulate() {
    let test = TestStore::new();
    test.add(0, &[1]);
    test.write(EntityTokenUpdate::token_changes(0, &[1], &[1, 2, 3]));

    for token in [1, 2, 3] {
        assert_eq!(test.ids(token, None), vec![0]);
    }
}

#[test]
fn removed_labels_disappear() {
    let test = TestStore::new();
    test.add(0, &[1, 2, 3]);
    test.write(EntityTokenUpdate::token_changes(0, &[1, 2, 3], &[2]));

    assert!(test.ids(1, None).is_empty());
    assert_eq!(test.ids(2, None), vec![0]);
    assert!(test.ids(3, None).is_empty());
}

#[test]
fn deleted_entity_leaves_no_empty_ranges() {
    let test = TestStore::new();
    test.add(130, &[4]);
    test.write(EntityTokenUpdate::token_changes(130, &[4], &[]));

    assert!(test.ids(4, None).is_empty());
    let ranges = test.store.all_entity_token_ranges().unwrap();
    assert_eq!(ranges.count(), 0);
}

#[test]
fn neighbours_in_one_range_are_independent() {
    let test = TestStore::new();
    test.add(64, &[1]);
    test.add(65, &[1]);
    test.write(EntityTokenUpdate::token_changes(64, &[1], &[]));

    assert_eq!(test.ids(1, None), vec![65]);
}

#[test]
fn unsorted_update_applies_nothing() {
    let test = TestStore::new();
    test.add(5, &[1, 2]);

    let mut writer = test.store.new_writer().unwrap();
    let err = writer
        .write(&EntityTokenUpdate::token_changes(5, &[2, 1], &[3]))
        .unwrap_err();
    assert!(err.to_string().contains("unsorted"));
    assert!(err.to_string().contains("before"));
    writer.close().unwrap();

    assert_eq!(test.ids(1, None), vec![5]);
    assert_eq!(test.ids(2, None), vec![5]);
    assert!(test.ids(3, None).is_empty());
}

#[test]
fn any_and_all_over_stored_tokens() {
    let test = TestStore::new();
    test.add(0, &[1, 3]);
    test.add(2, &[1]);
    test.add(1, &[2, 3]);
    test.add(u64::MAX, &[1, 2, 3]);

    let reader = test.store.new_reader().unwrap();
    let mut any = reader.entities_with_any_of_tokens(&[1, 2]).unwrap();
    assert_eq!(collect_ids(&mut any).unwrap(), vec![0, 1, 2, u64::MAX]);

    let mut all = reader.entities_with_all_of_tokens(&[1, 3]).unwrap();
    assert_eq!(collect_ids(&mut all).unwrap(), vec![0, u64::MAX]);

    let mut none = reader.entities_with_all_of_tokens(&[]).unwrap();
    assert_eq!(none.next_id().unwrap(), None);

    let mut missing = reader.entities_with_all_of_tokens(&[1, 99]).unwrap();
    assert_eq!(missing.next_id().unwrap(), None);
}

#[test]
fn reader_close_releases_open_sequences() {
    let test = TestStore::new();
    for entity in 0..200 {
        test.add(entity, &[1, 2]);
    }

    let reader = test.store.new_reader().unwrap();
    let mut first = reader.entities_with_token(1, None).unwrap();
    let mut composite = reader.entities_with_any_of_tokens(&[1, 2]).unwrap();
    assert_eq!(first.next_id().unwrap(), Some(0));
    assert_eq!(composite.next_id().unwrap(), Some(0));
    assert_eq!(reader.open_cursors(), 3);

    reader.close();
    assert_eq!(reader.open_cursors(), 0);
    first.close().unwrap();
    composite.close().unwrap();
}

#[test]
fn many_random_entities_read_back_in_order() {
    let test = TestStore::with_config(ScanStoreConfig::for_testing().with_writer_batch_size(100));
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

    let mut writer = test.store.new_writer().unwrap();
    for entity in 0..10_000u64 {
        let tokens = random_tokens(&mut rng, 8);
        test.truth.set(entity, &tokens);
        writer.write(&EntityTokenUpdate::added(entity, &tokens)).unwrap();
    }
    writer.close().unwrap();

    for token in 0..8 {
        assert_eq!(test.ids(token, None), test.truth.entities_with(token));
    }
}

#[test]
fn bit_set_iff_entity_reported() {
    let test = TestStore::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    for _ in 0..300 {
        let entity = rng.gen_range(0..5_000u64);
        test.add(entity, &[7]);
    }

    let reported = test.ids(7, None);
    let reader = test.store.all_entity_token_ranges().unwrap();
    let mut from_bits = Vec::new();
    for range in reader {
        let range = range.unwrap();
        from_bits.extend(range.entities().filter(|e| range.tokens(*e).contains(&7)));
    }
    assert_eq!(reported, from_bits);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn after_returns_strict_suffix(
        entities in prop::collection::btree_set(0u64..2_000, 0..80),
        after in 0u64..2_100,
    ) {
        let test = TestStore::new();
        let mut writer = test.store.new_writer().unwrap();
        for entity in &entities {
            writer.write(&EntityTokenUpdate::added(*entity, &[3])).unwrap();
        }
        writer.close().unwrap();

        let full = test.ids(3, None);
        let expected: Vec<EntityId> = full.iter().copied().filter(|e| *e > after).collect();
        prop_assert_eq!(test.ids(3, Some(after)), expected);
        prop_assert_eq!(full, entities.into_iter().collect::<Vec<_>>());
    }
}

#[test]
fn readers_alongside_writer_thread() {
    let test = TestStore::new();
    test.add(1, &[1]);
    let reader = test.store.new_reader().unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            let mut writer = test.store.new_writer().unwrap();
            for entity in 2..500 {
                writer.write(&EntityTokenUpdate::added(entity, &[1])).unwrap();
            }
            writer.close().unwrap();
        });
        for _ in 0..10 {
            let mut sequence = reader.entities_with_token(1, None).unwrap();
            let ids = collect_ids(&mut sequence).unwrap();
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(ids.first(), Some(&1));
        }
    });

    let mut sequence = reader.entities_with_token(1, None).unwrap();
    assert_eq!(collect_ids(&mut sequence).unwrap().len(), 499);
}

#[test]
fn open_sequence_ignores_later_writes() {
    let test = TestStore::new();
    for range in 0..=64u64 {
        test.add(range * 64, &[1]);
    }

    let reader = test.store.new_reader().unwrap();
    let mut sequence = reader.entities_with_token(1, None).unwrap();
    assert_eq!(sequence.next_id().unwrap(), Some(0));

    test.add(1_000_000, &[1]);
    test.write(EntityTokenUpdate::token_changes(4096, &[1], &[]));

    let rest = collect_ids(&mut sequence).unwrap();
    assert_eq!(rest, (1..=64u64).map(|range| range * 64).collect::<Vec<_>>());

    let now = test.ids(1, None);
    assert!(now.contains(&1_000_000));
    assert!(!now.contains(&4096));
}
