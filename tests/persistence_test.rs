//! Flush scheduling against the durable store contract

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use vitals_core::config::PersistenceConfig;
use vitals_core::models::SourceId;
use vitals_core::persistence::{
    DurableStore, FlushTrigger, InMemoryStore, InjectedFault, PersistenceItem,
};
use vitals_core::monitoring::{DegradedReason, SystemStatus};

fn scenario_config() -> PersistenceConfig {
    PersistenceConfig {
        flush_interval_seconds: 600,
        flush_threshold: 10_000,
        chunk_size: 500,
        poll_interval_ms: 100,
        max_pending: 100_000,
    }
}

fn harness(store: &Arc<InMemoryStore>) -> SchedulerHarness {
    SchedulerHarness::new(scenario_config(), 16_384, store.clone() as Arc<dyn DurableStore>)
}

#[tokio::test]
async fn test_count_threshold_flushes_before_interval() {
    let store = Arc::new(InMemoryStore::new());
    let mut h = harness(&store);

    // 10,001 records spread over one minute
    for i in 0..10_001i64 {
        h.ingest(full_record(1, EPOCH_MS + i * 6));
    }
    h.clock.advance(Duration::from_secs(60));

    let report = h.scheduler.poll_once().await.expect("threshold flush");
    assert_eq!(report.trigger, FlushTrigger::Threshold);
    assert_eq!(report.vitals_written, 10_001);
    assert_eq!(report.chunks, 21);

    assert_eq!(store.vitals_table().len(), 10_001);
    let batches = store.vitals_table().batch_sizes();
    assert_eq!(batches.len(), 21);
    assert!(batches.iter().all(|size| *size <= 500));
    assert_eq!(h.scheduler.pending_vitals(), 0);
    assert_eq!(h.cache.watermark(), Some(EPOCH_MS + 10_000 * 6));
    assert!(h.cache.get_unpersisted().is_empty());
}

#[tokio::test]
async fn test_below_threshold_waits_for_interval() {
    let store = Arc::new(InMemoryStore::new());
    let mut h = harness(&store);

    for i in 0..9_999i64 {
        h.ingest(full_record(1, EPOCH_MS + i));
    }
    h.clock.advance(Duration::from_secs(60));
    assert!(h.scheduler.poll_once().await.is_none());
    assert_eq!(h.scheduler.pending_vitals(), 9_999);
    assert!(store.vitals_table().is_empty());

    h.clock.advance(Duration::from_secs(540));
    let report = h.scheduler.poll_once().await.expect("interval flush");
    assert_eq!(report.trigger, FlushTrigger::Interval);
    assert_eq!(report.vitals_written, 9_999);
}

#[tokio::test]
async fn test_duplicate_delivery_is_skipped() {
    let store = Arc::new(InMemoryStore::new());
    let mut h = harness(&store);

    let records: Vec<_> = (0..50).map(|i| full_record(1, EPOCH_MS + i * SECOND_MS)).collect();
    for record in &records {
        h.ingest(*record);
    }
    h.scheduler.drain_channel();
    let first = h.scheduler.flush(FlushTrigger::Interval).await.unwrap();
    assert_eq!(first.vitals_written, 50);

    // The same records arrive again, e.g. after a resync
    for record in &records {
        h.sender.send(PersistenceItem::Vital(*record)).unwrap();
    }
    h.scheduler.drain_channel();
    let second = h.scheduler.flush(FlushTrigger::Interval).await.unwrap();
    assert_eq!(second.vitals_written, 0);
    assert_eq!(second.skipped, 50);
    assert_eq!(store.vitals_table().len(), 50);
}

#[tokio::test]
async fn test_lagging_source_clock_is_backfilled() {
    let store = Arc::new(InMemoryStore::new());
    let mut h = SchedulerHarness::new(
        PersistenceConfig::default(),
        2,
        store.clone() as Arc<dyn DurableStore>,
    );

    for i in 0..5i64 {
        h.ingest(full_record(1, EPOCH_MS + 10_000 + i));
    }
    h.scheduler.drain_channel();
    let first = h.scheduler.flush(FlushTrigger::Interval).await.unwrap();
    assert_eq!(first.vitals_written, 5);

    // Second monitor's clock runs five seconds behind the first
    for i in 0..10i64 {
        h.ingest(full_record(2, EPOCH_MS + 5_000 + i));
    }
    assert!(h.sender.stats().dropped() >= 8);

    let report = h.scheduler.shutdown().await.unwrap();
    assert_eq!(report.vitals_written, 10);
    assert_eq!(store.vitals_table().len(), 15);
    assert_eq!(h.cache.source_watermark(SourceId(2)), Some(EPOCH_MS + 5_009));
    assert!(h.cache.get_unpersisted().is_empty());
}

#[tokio::test]
async fn test_alarm_revisions_upsert() {
    let store = Arc::new(InMemoryStore::new());
    let mut h = harness(&store);

    let resolved = resolved_alarms(2, EPOCH_MS);
    assert_eq!(resolved.len(), 2);
    for alarm in &resolved {
        h.sender.send(PersistenceItem::Alarm(*alarm)).unwrap();
    }
    h.scheduler.drain_channel();
    let report = h.scheduler.flush(FlushTrigger::Interval).await.unwrap();
    assert_eq!(report.alarms_written, 2);

    // Re-sending the same revision changes nothing
    h.sender.send(PersistenceItem::Alarm(resolved[0])).unwrap();
    h.scheduler.drain_channel();
    h.scheduler.flush(FlushTrigger::Interval).await.unwrap();
    assert_eq!(store.alarms_table().len(), 2);
    let stored = store.alarms_table().get(resolved[0].alarm_id()).unwrap();
    assert_eq!(stored.revision(), resolved[0].revision());
}

#[tokio::test]
async fn test_failed_flush_keeps_records_and_retries_next_interval() {
    let store = Arc::new(InMemoryStore::new());
    let mut h = harness(&store);

    for i in 0..10i64 {
        h.ingest(full_record(1, EPOCH_MS + i * SECOND_MS));
    }
    store.fail_next_writes(InjectedFault::Transient, 1);
    h.clock.advance(Duration::from_secs(600));

    assert!(h.scheduler.poll_once().await.is_none());
    assert_eq!(h.scheduler.pending_vitals(), 10);
    assert_eq!(h.health.snapshot().flush_failures, 1);
    assert!(matches!(
        h.health.status(),
        SystemStatus::Degraded { ref reasons } if reasons.contains(&DegradedReason::PersistenceFailing)
    ));

    // No retry inside the back-off window
    h.clock.advance(Duration::from_secs(300));
    assert!(h.scheduler.poll_once().await.is_none());

    h.clock.advance(Duration::from_secs(300));
    let report = h.scheduler.poll_once().await.expect("retry flush");
    assert_eq!(report.vitals_written, 10);
    assert_eq!(store.vitals_table().len(), 10);
}

#[tokio::test]
async fn test_shutdown_flushes_and_closes_store() {
    let store = Arc::new(InMemoryStore::new());
    let mut h = harness(&store);

    for i in 0..3i64 {
        h.ingest(full_record(1, EPOCH_MS + i));
    }
    let report = h.scheduler.shutdown().await.unwrap();
    assert_eq!(report.trigger, FlushTrigger::Shutdown);
    assert_eq!(report.vitals_written, 3);
    assert!(store.is_closed());
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use vitals_core::config::{StorageBackend, StorageConfig};
    use vitals_core::persistence::{Repository, SqliteStore};

    #[tokio::test]
    async fn test_scheduler_round_trip_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Sqlite,
            database_url: format!("sqlite://{}", dir.path().join("vitals.db").display()),
            max_connections: 1,
        };
        let store = Arc::new(SqliteStore::connect(&config).await.unwrap());
        let mut h = SchedulerHarness::new(
            PersistenceConfig {
                chunk_size: 7,
                ..scenario_config()
            },
            1_024,
            store.clone() as Arc<dyn DurableStore>,
        );

        let records: Vec<_> = (0..20).map(|i| full_record(1, EPOCH_MS + i * SECOND_MS)).collect();
        for record in &records {
            h.ingest(*record);
        }
        for alarm in resolved_alarms(1, EPOCH_MS) {
            h.sender.send(PersistenceItem::Alarm(alarm)).unwrap();
        }

        h.scheduler.drain_channel();
        let report = h.scheduler.flush(FlushTrigger::Interval).await.unwrap();
        assert_eq!(report.vitals_written, 20);
        assert_eq!(report.alarms_written, 1);
        // Three vitals chunks and one alarm chunk
        assert_eq!(report.chunks, 4);

        let stored = store
            .vitals()
            .get_range(EPOCH_MS, EPOCH_MS + 19 * SECOND_MS)
            .await
            .unwrap();
        assert_eq!(stored, records);
        assert_eq!(store.alarms().count().await.unwrap(), 1);

        let report = h.scheduler.shutdown().await.unwrap();
        assert_eq!(report.vitals_written, 0);
    }
}
