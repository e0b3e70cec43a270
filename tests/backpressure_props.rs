//! Drop-oldest on the persistence channel never loses a cached record or
//! an alarm revision: shed vitals are backfilled from the cache before the
//! final flush, shed alarm snapshots are redelivered, and nothing is
//! written twice.

mod common;

use common::*;
use proptest::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use vitals_core::channels::OverflowPolicy;
use vitals_core::config::{ChannelConfig, PersistenceConfig};
use vitals_core::models::SourceId;
use vitals_core::persistence::{DurableStore, InMemoryStore};
use vitals_core::pipeline::PipelineBootstrap;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_every_record_stored_exactly_once(
        channel_capacity in 1usize..16,
        flush_threshold in 1usize..64,
        poll_every in 1usize..40,
        appends in multi_source_strategy(400),
    ) {
        let store = Arc::new(InMemoryStore::new());
        let mut h = SchedulerHarness::new(
            PersistenceConfig {
                flush_threshold,
                chunk_size: 7,
                max_pending: 10_000,
                ..PersistenceConfig::default()
            },
            channel_capacity,
            store.clone() as Arc<dyn DurableStore>,
        );

        // One shared, strictly increasing timestamp base for every source
        let mut ts = EPOCH_MS;
        let mut expected = BTreeSet::new();
        let mut written = 0u64;

        for (index, (source, step)) in appends.iter().enumerate() {
            ts += step + 1;
            h.ingest(hr_record(*source, ts, 72.0));
            expected.insert((SourceId(*source), ts));

            if (index + 1) % poll_every == 0 {
                if let Some(report) = tokio_test::block_on(h.scheduler.poll_once()) {
                    written += report.vitals_written;
                }
            }
        }

        let report = tokio_test::block_on(h.scheduler.shutdown()).unwrap();
        written += report.vitals_written;

        prop_assert_eq!(written, expected.len() as u64);
        prop_assert_eq!(store.vitals_table().len(), expected.len());
        for (source, timestamp) in &expected {
            prop_assert!(store.vitals_table().get((*source, *timestamp)).is_some());
        }
        prop_assert!(h.cache.get_unpersisted().is_empty());
    }

    #[test]
    fn prop_skewed_source_clocks_are_backfilled(
        channel_capacity in 1usize..8,
        flush_threshold in 1usize..32,
        poll_every in 1usize..20,
        offsets in source_offsets_strategy(),
        appends in multi_source_strategy(200),
    ) {
        let store = Arc::new(InMemoryStore::new());
        let mut h = SchedulerHarness::new(
            PersistenceConfig {
                flush_threshold,
                chunk_size: 5,
                max_pending: 10_000,
                ..PersistenceConfig::default()
            },
            channel_capacity,
            store.clone() as Arc<dyn DurableStore>,
        );

        // Every source runs on its own clock
        let mut clocks = offsets.map(|offset| EPOCH_MS + offset);
        let mut expected = BTreeSet::new();

        for (index, (source, step)) in appends.iter().enumerate() {
            let ts = &mut clocks[(*source - 1) as usize];
            *ts += step + 1;
            h.ingest(hr_record(*source, *ts, 72.0));
            expected.insert((SourceId(*source), *ts));

            if (index + 1) % poll_every == 0 {
                tokio_test::block_on(h.scheduler.poll_once());
            }
        }
        tokio_test::block_on(h.scheduler.shutdown()).unwrap();

        prop_assert_eq!(store.vitals_table().len(), expected.len());
        for (source, timestamp) in &expected {
            prop_assert!(store.vitals_table().get((*source, *timestamp)).is_some());
        }
        prop_assert!(h.cache.get_unpersisted().is_empty());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_store_ends_with_every_final_alarm_revision(
        persistence_capacity in 1usize..8,
        flush_threshold in 1usize..32,
        offsets in source_offsets_strategy(),
        traffic in alarm_traffic_strategy(160),
    ) {
        let store = Arc::new(InMemoryStore::new());
        let clock = manual_clock();
        let mut config = memory_config();
        config.channels.persistence =
            ChannelConfig::new(persistence_capacity, OverflowPolicy::DropOldest);
        config.channels.notification = ChannelConfig::new(16_384, OverflowPolicy::DropOldest);
        config.persistence.flush_threshold = flush_threshold;
        config.persistence.chunk_size = 8;

        let mut pipeline = PipelineBootstrap::new(config)
            .with_store(store.clone() as Arc<dyn DurableStore>)
            .with_clock(clock.clone())
            .start()
            .unwrap();
        let mut ingress = pipeline.take_ingress().unwrap();
        let notifications = pipeline.take_notifications().unwrap();

        let mut clocks = offsets.map(|offset| EPOCH_MS + offset);
        let mut expected = BTreeSet::new();
        for (source, step, heart_rate, resync_after) in &traffic {
            let ts = &mut clocks[(*source - 1) as usize];
            *ts += step;
            ingress.submit_vital(hr_record(*source, *ts, *heart_rate)).unwrap();
            expected.insert((SourceId(*source), *ts));

            if *resync_after {
                clock.advance(Duration::from_secs(31));
                std::thread::sleep(Duration::from_millis(10));
            }
        }

        let report = pipeline.shutdown();
        prop_assert!(report.is_clean(), "{:?}", report.failures);

        let mut final_revisions: HashMap<Uuid, u32> = HashMap::new();
        for envelope in notifications.drain() {
            if let Some(alarm) = envelope.notification.as_alarm() {
                let revision = final_revisions.entry(alarm.alarm_id()).or_insert(0);
                *revision = (*revision).max(alarm.revision());
            }
        }

        prop_assert_eq!(store.vitals_table().len(), expected.len());
        prop_assert_eq!(store.alarms_table().len(), final_revisions.len());
        for (alarm_id, revision) in &final_revisions {
            let stored = store.alarms_table().get(*alarm_id).map(|alarm| alarm.revision());
            prop_assert_eq!(stored, Some(*revision));
        }
    }
}

#[test]
fn test_overflowing_channel_reports_drops_and_backfills() {
    let store = Arc::new(InMemoryStore::new());
    let mut h = SchedulerHarness::new(
        PersistenceConfig::default(),
        4,
        store.clone() as Arc<dyn DurableStore>,
    );

    for i in 0..100i64 {
        h.ingest(full_record(1, EPOCH_MS + i * SECOND_MS));
    }
    assert_eq!(h.sender.stats().dropped(), 96);

    let report = tokio_test::block_on(h.scheduler.shutdown()).unwrap();
    assert_eq!(report.vitals_written, 100);
    assert_eq!(report.backfilled, 100);
    assert_eq!(report.skipped, 4);
    assert_eq!(h.health.snapshot().records_backfilled, 100);
}
