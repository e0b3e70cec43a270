//! Bounded vitals cache behaviour at full capacity and under random input

mod common;

use common::*;
use proptest::prelude::*;
use std::collections::HashMap;
use vitals_core::cache::VitalsCache;
use vitals_core::constants::cache::DEFAULT_VITALS_CAPACITY;
use vitals_core::models::SourceId;

#[test]
fn test_three_day_cache_evicts_exactly_one_record_when_overfilled() {
    let cache = VitalsCache::new(DEFAULT_VITALS_CAPACITY, 4);
    let total = DEFAULT_VITALS_CAPACITY + 1;

    for i in 0..total as i64 {
        assert!(cache.append(full_record(1, EPOCH_MS + i * SECOND_MS)));
    }

    assert_eq!(cache.eviction_count(), 1);
    assert_eq!(cache.len(), DEFAULT_VITALS_CAPACITY);

    let survivors = cache.get_range(i64::MIN, i64::MAX);
    assert_eq!(survivors.len(), DEFAULT_VITALS_CAPACITY);
    assert_eq!(survivors[0].timestamp_ms(), EPOCH_MS + SECOND_MS);
    assert_eq!(
        survivors.last().map(|r| r.timestamp_ms()),
        Some(EPOCH_MS + (total as i64 - 1) * SECOND_MS)
    );

    // The evicted record is gone from any window that covered it
    assert!(cache.get_range(EPOCH_MS, EPOCH_MS).is_empty());
    let window = cache.get_range(EPOCH_MS + 100 * SECOND_MS, EPOCH_MS + 199 * SECOND_MS);
    assert_eq!(window.len(), 100);
    assert!(window
        .windows(2)
        .all(|pair| pair[1].timestamp_ms() - pair[0].timestamp_ms() == SECOND_MS));
}

#[test]
fn test_out_of_order_record_is_rejected_without_side_effects() {
    let cache = VitalsCache::new(16, 2);
    assert!(cache.append(full_record(1, EPOCH_MS + 10)));
    assert!(!cache.append(full_record(1, EPOCH_MS)));
    // Equal timestamps are accepted
    assert!(cache.append(full_record(1, EPOCH_MS + 10)));
    // Ordering is tracked per source
    assert!(cache.append(full_record(2, EPOCH_MS)));

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.last_sequence(), 3);
}

#[test]
fn test_source_table_is_bounded() {
    let cache = VitalsCache::new(16, 2);
    assert!(cache.append(full_record(1, EPOCH_MS)));
    assert!(cache.append(full_record(2, EPOCH_MS)));
    assert!(!cache.append(full_record(3, EPOCH_MS)));
    assert_eq!(cache.len(), 2);
}

proptest! {
    #[test]
    fn prop_size_bounded_and_oldest_evicted(
        capacity in 1usize..64,
        steps in timestamp_steps_strategy(200),
    ) {
        let cache = VitalsCache::new(capacity, 1);
        let mut ts = EPOCH_MS;
        let mut appended = Vec::with_capacity(steps.len());
        for step in &steps {
            ts += step;
            let record = full_record(1, ts);
            prop_assert!(cache.append(record));
            appended.push(record);
            prop_assert!(cache.len() <= capacity);
        }

        let expected_len = appended.len().min(capacity);
        prop_assert_eq!(cache.len(), expected_len);
        prop_assert_eq!(
            cache.eviction_count(),
            (appended.len() - expected_len) as u64
        );

        let survivors = cache.get_range(i64::MIN, i64::MAX);
        prop_assert_eq!(&survivors[..], &appended[appended.len() - expected_len..]);
    }

    #[test]
    fn prop_per_source_order_is_preserved(appends in multi_source_strategy(300)) {
        let cache = VitalsCache::new(128, 4);
        let mut clocks: HashMap<u32, i64> = HashMap::new();
        for (source, step) in &appends {
            let ts = clocks.entry(*source).or_insert(EPOCH_MS);
            *ts += step;
            prop_assert!(cache.append(hr_record(*source, *ts, 72.0)));
        }

        let mut last_seen: HashMap<SourceId, i64> = HashMap::new();
        for record in cache.get_range(i64::MIN, i64::MAX) {
            if let Some(previous) = last_seen.insert(record.source_id(), record.timestamp_ms()) {
                prop_assert!(previous <= record.timestamp_ms());
            }
        }
    }

    #[test]
    fn prop_mark_persisted_is_idempotent(
        steps in timestamp_steps_strategy(100),
        cut in 0usize..100,
    ) {
        let cache = VitalsCache::new(256, 1);
        let mut ts = EPOCH_MS;
        let mut timestamps = Vec::new();
        for step in &steps {
            ts += step + 1;
            cache.append(full_record(1, ts));
            timestamps.push(ts);
        }
        let upto = timestamps[cut.min(timestamps.len() - 1)];

        cache.mark_persisted(upto);
        let watermark = cache.watermark();
        let unpersisted = cache.get_unpersisted();

        cache.mark_persisted(upto);
        prop_assert_eq!(cache.watermark(), watermark);
        prop_assert_eq!(cache.get_unpersisted(), unpersisted.clone());

        // Moving backwards changes nothing either
        cache.mark_persisted(EPOCH_MS);
        prop_assert_eq!(cache.watermark(), watermark);
        prop_assert!(unpersisted.iter().all(|r| r.timestamp_ms() > upto));
    }
}
