//! Full scans grouped by entity range

use crate::common::*;
use rand::SeedableRng;
use tokenscan::{EntityTokenRange, RANGE_SIZE};

fn scan(test: &TestStore) -> Vec<EntityTokenRange> {
    test.store
        .all_entity_token_ranges()
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn empty_store_has_no_ranges() {
    let test = TestStore::new();
    let reader = test.store.all_entity_token_ranges().unwrap();
    assert_eq!(reader.max_count().unwrap(), 0);
    assert!(scan(&test).is_empty());
}

#[test]
fn single_range_lists_each_entity_with_its_tokens() {
    let test = TestStore::new();
    test.add(1, &[0, 1]);
    test.add(3, &[1]);
    test.add(63, &[4]);

    let ranges = scan(&test);
    assert_eq!(ranges.len(), 1);
    let range = &ranges[0];
    assert_eq!(range.range_id(), 0);
    assert_eq!(range.entities().collect::<Vec<_>>(), vec![1, 3, 63]);
    assert_eq!(range.tokens(1), &[0, 1]);
    assert_eq!(range.tokens(3), &[1]);
    assert_eq!(range.tokens(63), &[4]);
    assert!(range.tokens(2).is_empty());
}

#[test]
fn only_entity_zero() {
    let test = TestStore::new();
    test.add(0, &[9]);

    let ranges = scan(&test);
    assert_eq!(ranges.len(), 1);
    assert_eq!(ranges[0].entities().collect::<Vec<_>>(), vec![0]);
    assert_eq!(ranges[0].tokens(0), &[9]);
    assert_eq!(
        test.store.all_entity_token_ranges().unwrap().max_count().unwrap(),
        RANGE_SIZE
    );
}

#[test]
fn ranges_come_in_ascending_order_and_skip_gaps() {
    let test = TestStore::new();
    test.add(5 * RANGE_SIZE + 2, &[1]);
    test.add(2, &[2]);
    test.add(RANGE_SIZE, &[1, 2]);

    let ranges = scan(&test);
    let ids: Vec<u64> = ranges.iter().map(|r| r.range_id()).collect();
    assert_eq!(ids, vec![0, 1, 5]);
    assert_eq!(ranges[1].tokens(RANGE_SIZE), &[1, 2]);

    let reader = test.store.all_entity_token_ranges().unwrap();
    assert_eq!(reader.max_count().unwrap(), 6 * RANGE_SIZE);
    assert_eq!(reader.distinct_tokens().unwrap(), vec![1, 2]);
}

#[test]
fn scan_agrees_with_ground_truth() {
    let test = TestStore::new();
    let mut rng = rand::rngs::StdRng::seed_from_u64(21);
    for entity in (0..3_000u64).step_by(7) {
        let tokens = random_tokens(&mut rng, 5);
        test.write(EntityTokenUpdate::added(entity, &tokens));
    }

    let mut seen = 0;
    for range in scan(&test) {
        for entity in range.entities() {
            assert_eq!(range.tokens(entity), test.truth.tokens(entity).as_slice());
            assert_eq!(entity / RANGE_SIZE, range.range_id());
            seen += 1;
        }
    }
    let expected = (0..3_000u64)
        .step_by(7)
        .filter(|e| !test.truth.tokens(*e).is_empty())
        .count();
    assert_eq!(seen, expected);
}

#[test]
fn closed_scan_yields_nothing() {
    let test = TestStore::new();
    test.add(1, &[1]);
    test.add(200, &[2]);

    let mut reader = test.store.all_entity_token_ranges().unwrap();
    assert!(reader.next_range().unwrap().is_some());
    reader.close();
    assert_eq!(reader.open_cursors(), 0);
    assert!(reader.next_range().unwrap().is_none());
}
