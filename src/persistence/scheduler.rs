//! Storage-thread flush scheduling.
//!
//! The scheduler drains the persistence channel into pending buffers and
//! flushes them to the durable store when the pending count reaches the
//! threshold or the flush interval elapses, whichever comes first. Writes
//! commit in chunks of `chunk_size`. Per-source watermarks make flushes
//! idempotent, so backfilling from the vitals cache never duplicates rows.
//!
//! Vitals are keyed by (source, timestamp). When one flush holds several
//! records for a key, the most recently received one is written; a key that
//! is already stored is never rewritten.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::errors::StorageError;
use super::repository::DurableStore;
use crate::cache::VitalsCache;
use crate::channels::BoundedReceiver;
use crate::config::PersistenceConfig;
use crate::logging::{log_error, log_storage_operation};
use crate::models::{AlarmSnapshot, SourceId, VitalRecord};
use crate::monitoring::HealthMonitor;
use crate::utils::Clock;

/// Unit of work carried from the real-time thread to the storage thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PersistenceItem {
    Vital(VitalRecord),
    Alarm(AlarmSnapshot),
}

/// What caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Threshold,
    Interval,
    Shutdown,
}

/// Outcome of one successful flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub trigger: FlushTrigger,
    pub vitals_written: u64,
    pub alarms_written: u64,
    /// Records at or below an already persisted watermark
    pub skipped: u64,
    pub backfilled: u64,
    pub chunks: u32,
}

/// Drains the persistence channel and flushes to the durable store
pub struct PersistenceScheduler {
    config: PersistenceConfig,
    receiver: BoundedReceiver<PersistenceItem>,
    cache: Arc<VitalsCache>,
    store: Arc<dyn DurableStore>,
    health: Arc<HealthMonitor>,
    clock: Arc<dyn Clock>,
    pending_vitals: Vec<VitalRecord>,
    pending_alarms: Vec<AlarmSnapshot>,
    drain_buffer: Vec<PersistenceItem>,
    persisted: HashMap<SourceId, i64>,
    last_flush_ms: i64,
    /// No scheduled flush before this time after a failure
    retry_after_ms: Option<i64>,
    drops_seen: u64,
}

impl std::fmt::Debug for PersistenceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceScheduler")
            .field("pending_vitals", &self.pending_vitals.len())
            .field("pending_alarms", &self.pending_alarms.len())
            .field("last_flush_ms", &self.last_flush_ms)
            .finish_non_exhaustive()
    }
}

impl PersistenceScheduler {
    pub fn new(
        config: PersistenceConfig,
        receiver: BoundedReceiver<PersistenceItem>,
        cache: Arc<VitalsCache>,
        store: Arc<dyn DurableStore>,
        health: Arc<HealthMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let last_flush_ms = clock.now_ms();
        Self {
            drain_buffer: Vec::with_capacity(config.chunk_size.max(1)),
            config,
            receiver,
            cache,
            store,
            health,
            clock,
            pending_vitals: Vec::new(),
            pending_alarms: Vec::new(),
            persisted: HashMap::new(),
            last_flush_ms,
            retry_after_ms: None,
            drops_seen: 0,
        }
    }

    pub fn pending_vitals(&self) -> usize {
        self.pending_vitals.len()
    }

    pub fn pending_alarms(&self) -> usize {
        self.pending_alarms.len()
    }

    /// Newest persisted timestamp for a source
    pub fn persisted_watermark(&self, source_id: SourceId) -> Option<i64> {
        self.persisted.get(&source_id).copied()
    }

    /// Move everything currently in the channel into the pending buffers,
    /// stopping once `max_pending` vitals are buffered
    pub fn drain_channel(&mut self) -> usize {
        let mut drained = 0;
        while self.pending_vitals.len() < self.config.max_pending {
            let room = self.config.max_pending - self.pending_vitals.len();
            let batch = self.drain_buffer.capacity().min(room).max(1);
            let received = self.receiver.drain_into(&mut self.drain_buffer, batch);
            if received == 0 {
                break;
            }
            for item in self.drain_buffer.drain(..) {
                match item {
                    PersistenceItem::Vital(record) => self.pending_vitals.push(record),
                    PersistenceItem::Alarm(snapshot) => self.pending_alarms.push(snapshot),
                }
            }
            drained += received;
        }
        drained
    }

    /// Which trigger, if any, is due at `now_ms`
    pub fn due_trigger(&self, now_ms: i64) -> Option<FlushTrigger> {
        if self.retry_after_ms.is_some_and(|retry_at| now_ms < retry_at) {
            return None;
        }
        if self.pending_vitals.len() + self.pending_alarms.len() >= self.config.flush_threshold {
            return Some(FlushTrigger::Threshold);
        }
        let interval_ms = self.config.flush_interval().as_millis() as i64;
        let has_work = !self.pending_vitals.is_empty()
            || !self.pending_alarms.is_empty()
            || self.receiver.stats().dropped() > self.drops_seen;
        if has_work && now_ms - self.last_flush_ms >= interval_ms {
            return Some(FlushTrigger::Interval);
        }
        None
    }

    /// One scheduling step: drain, then flush if a trigger is due
    pub async fn poll_once(&mut self) -> Option<FlushReport> {
        self.drain_channel();
        let trigger = self.due_trigger(self.clock.now_ms())?;
        self.flush(trigger).await.ok()
    }

    /// Write all pending work. On failure the unwritten remainder stays
    /// pending and the next attempt waits for the next interval.
    pub async fn flush(&mut self, trigger: FlushTrigger) -> Result<FlushReport, StorageError> {
        let started = Instant::now();
        let now_ms = self.clock.now_ms();
        let backfilled = self.backfill(trigger);
        let skipped = self.prepare_vitals();

        let mut report = FlushReport {
            trigger,
            vitals_written: 0,
            alarms_written: 0,
            skipped,
            backfilled,
            chunks: 0,
        };

        let outcome = self.write_pending(&mut report).await;
        self.last_flush_ms = now_ms;

        match outcome {
            Ok(()) => {
                self.retry_after_ms = None;
                for (source, watermark) in &self.persisted {
                    self.cache.mark_source_persisted(*source, *watermark);
                }
                self.health
                    .record_flush_success(report.vitals_written, report.alarms_written);
                log_storage_operation(
                    "flush",
                    None,
                    Some((report.vitals_written + report.alarms_written) as usize),
                    "completed",
                    Some(started.elapsed().as_millis() as u64),
                    Some(&format!("{trigger:?}")),
                );
                Ok(report)
            }
            Err(err) => {
                self.retry_after_ms = Some(now_ms + self.config.flush_interval().as_millis() as i64);
                self.health.record_flush_failure();
                if err.is_exhausted() {
                    self.health.signal_storage_pressure();
                }
                log_error(
                    "persistence",
                    "flush",
                    &err.to_string(),
                    Some(&format!(
                        "pending_vitals={} pending_alarms={}",
                        self.pending_vitals.len(),
                        self.pending_alarms.len()
                    )),
                );
                Err(err)
            }
        }
    }

    /// Drain, backfill from the cache, final flush, release the store
    pub async fn shutdown(&mut self) -> Result<FlushReport, StorageError> {
        self.drain_channel();
        let result = self.flush(FlushTrigger::Shutdown).await;
        if let Err(err) = self.store.close().await {
            warn!(error = %err, "Durable store did not close cleanly");
        }
        info!(
            pending_vitals = self.pending_vitals.len(),
            pending_alarms = self.pending_alarms.len(),
            "Persistence scheduler stopped"
        );
        result
    }

    /// Poll until shutdown is signalled, then run the shutdown sequence
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<FlushReport, StorageError> {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            flush_threshold = self.config.flush_threshold,
            chunk_size = self.config.chunk_size,
            "Persistence scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(report) = self.poll_once().await {
                        debug!(?report, "Scheduled flush completed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Pull records the channel dropped back out of the cache
    fn backfill(&mut self, trigger: FlushTrigger) -> u64 {
        let dropped = self.receiver.stats().dropped();
        if dropped == self.drops_seen && trigger != FlushTrigger::Shutdown {
            return 0;
        }
        self.drops_seen = dropped;

        let recovered = self.cache.get_unpersisted();
        let count = recovered.len() as u64;
        self.pending_vitals.extend(recovered);
        if count > 0 {
            self.health.record_backfill(count);
            debug!(records = count, "Backfilled vitals from cache");
        }
        count
    }

    /// Order pending vitals, drop anything already persisted and collapse
    /// duplicate keys to the latest arrival
    fn prepare_vitals(&mut self) -> u64 {
        let before = self.pending_vitals.len();
        let persisted = &self.persisted;
        self.pending_vitals.retain(|record| {
            persisted
                .get(&record.source_id())
                .map_or(true, |watermark| record.timestamp_ms() > *watermark)
        });
        // Newest first, so the stable sort keeps it ahead of older duplicates
        self.pending_vitals.reverse();
        self.pending_vitals
            .sort_by_key(|record| (record.timestamp_ms(), record.source_id()));
        self.pending_vitals
            .dedup_by_key(|record| (record.timestamp_ms(), record.source_id()));
        (before - self.pending_vitals.len()) as u64
    }

    async fn write_pending(&mut self, report: &mut FlushReport) -> Result<(), StorageError> {
        let chunk_size = self.config.chunk_size.max(1);

        let mut written = 0;
        let result = loop {
            if written >= self.pending_vitals.len() {
                break Ok(());
            }
            let end = (written + chunk_size).min(self.pending_vitals.len());
            let chunk = &self.pending_vitals[written..end];
            if let Err(err) = self.store.vitals().save_batch(chunk).await {
                break Err(err);
            }
            for record in chunk {
                let watermark = self.persisted.entry(record.source_id()).or_insert(i64::MIN);
                *watermark = (*watermark).max(record.timestamp_ms());
            }
            report.vitals_written += chunk.len() as u64;
            report.chunks += 1;
            written = end;
        };
        self.pending_vitals.drain(..written);
        result?;

        let mut written = 0;
        let result = loop {
            if written >= self.pending_alarms.len() {
                break Ok(());
            }
            let end = (written + chunk_size).min(self.pending_alarms.len());
            if let Err(err) = self.store.alarms().save_batch(&self.pending_alarms[written..end]).await {
                break Err(err);
            }
            report.alarms_written += (end - written) as u64;
            report.chunks += 1;
            written = end;
        };
        self.pending_alarms.drain(..written);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{bounded, BoundedSender, OverflowPolicy};
    use crate::config::ChannelConfig;
    use crate::constants::channels;
    use crate::persistence::{InMemoryStore, InjectedFault};
    use crate::utils::ManualClock;
    use std::time::Duration;

    struct Harness {
        sender: BoundedSender<PersistenceItem>,
        scheduler: PersistenceScheduler,
        cache: Arc<VitalsCache>,
        store: Arc<InMemoryStore>,
        health: Arc<HealthMonitor>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: PersistenceConfig, channel_capacity: usize) -> Harness {
        let (sender, receiver) = bounded(
            channels::PERSISTENCE,
            ChannelConfig::new(channel_capacity, OverflowPolicy::DropOldest),
        );
        let cache = Arc::new(VitalsCache::new(100_000, 4));
        let store = Arc::new(InMemoryStore::new());
        let health = Arc::new(HealthMonitor::new());
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = PersistenceScheduler::new(
            config,
            receiver,
            Arc::clone(&cache),
            store.clone(),
            Arc::clone(&health),
            clock.clone(),
        );
        Harness {
            sender,
            scheduler,
            cache,
            store,
            health,
            clock,
        }
    }

    fn record(ts: i64) -> VitalRecord {
        VitalRecord::measured(SourceId(1), ts, 75.0, 97.0, 15.0)
    }

    impl Harness {
        fn ingest(&self, ts: i64) {
            let record = record(ts);
            assert!(self.cache.append(record));
            self.sender.send(PersistenceItem::Vital(record)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_threshold_flush_before_interval() {
        let mut h = harness(
            PersistenceConfig {
                flush_threshold: 100,
                chunk_size: 40,
                ..PersistenceConfig::default()
            },
            1_000,
        );
        for ts in 1..100 {
            h.ingest(ts);
        }
        h.clock.advance(Duration::from_secs(1));
        assert!(h.scheduler.poll_once().await.is_none());

        h.ingest(100);
        let report = h.scheduler.poll_once().await.unwrap();
        assert_eq!(report.trigger, FlushTrigger::Threshold);
        assert_eq!(report.vitals_written, 100);
        assert_eq!(report.chunks, 3);
        assert_eq!(h.store.vitals_table().batch_sizes(), vec![40, 40, 20]);
        assert_eq!(h.cache.watermark(), Some(100));
        assert!(h.cache.get_unpersisted().is_empty());
    }

    #[tokio::test]
    async fn test_interval_flush() {
        let mut h = harness(PersistenceConfig::default(), 1_000);
        h.ingest(1);
        assert!(h.scheduler.poll_once().await.is_none());
        h.clock.advance(Duration::from_secs(600));
        let report = h.scheduler.poll_once().await.unwrap();
        assert_eq!(report.trigger, FlushTrigger::Interval);
        assert_eq!(report.vitals_written, 1);

        // Nothing pending: the interval alone does not flush
        h.clock.advance(Duration::from_secs(600));
        assert!(h.scheduler.poll_once().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_records_are_backfilled() {
        let mut h = harness(
            PersistenceConfig {
                flush_threshold: 10,
                ..PersistenceConfig::default()
            },
            4,
        );
        for ts in 1..=10 {
            h.ingest(ts);
        }
        assert_eq!(h.sender.stats().dropped(), 6);

        h.clock.advance(Duration::from_secs(600));
        let report = h.scheduler.poll_once().await.unwrap();
        assert_eq!(report.backfilled, 10);
        assert_eq!(report.vitals_written, 10);
        assert_eq!(h.store.vitals_table().len(), 10);
        assert_eq!(h.health.snapshot().records_backfilled, 10);
    }

    #[tokio::test]
    async fn test_failure_keeps_pending_and_retries_next_interval() {
        let mut h = harness(
            PersistenceConfig {
                flush_threshold: 5,
                chunk_size: 2,
                ..PersistenceConfig::default()
            },
            100,
        );
        for ts in 1..=5 {
            h.ingest(ts);
        }
        h.store.fail_next_writes(InjectedFault::Exhausted, 1);
        assert!(h.scheduler.poll_once().await.is_none());
        assert!(h.health.is_degraded());
        assert!(h.health.take_storage_pressure());
        assert_eq!(h.scheduler.pending_vitals(), 5);

        // Threshold still met, but retry waits for the next interval
        h.clock.advance(Duration::from_secs(1));
        assert!(h.scheduler.poll_once().await.is_none());

        h.clock.advance(Duration::from_secs(600));
        let report = h.scheduler.poll_once().await.unwrap();
        assert_eq!(report.vitals_written, 5);
        assert!(!h.health.is_degraded());
    }

    #[tokio::test]
    async fn test_latest_duplicate_wins_within_a_flush() {
        let mut h = harness(PersistenceConfig::default(), 100);
        let first = VitalRecord::measured(SourceId(1), 1_000, 75.0, 97.0, 15.0);
        let corrected = VitalRecord::measured(SourceId(1), 1_000, 82.0, 97.0, 15.0);
        for record in [first, corrected] {
            assert!(h.cache.append(record));
            h.sender.send(PersistenceItem::Vital(record)).unwrap();
        }
        h.scheduler.drain_channel();
        let report = h.scheduler.flush(FlushTrigger::Interval).await.unwrap();
        assert_eq!(report.vitals_written, 1);
        assert_eq!(report.skipped, 1);

        let stored = h.store.vitals_table().get((SourceId(1), 1_000)).unwrap();
        assert_eq!(stored.heart_rate(), Some(82.0));
    }

    #[tokio::test]
    async fn test_replayed_records_are_skipped() {
        let mut h = harness(
            PersistenceConfig {
                chunk_size: 2,
                ..PersistenceConfig::default()
            },
            100,
        );
        for ts in 1..=4 {
            h.ingest(ts);
        }
        h.scheduler.drain_channel();
        h.scheduler.flush(FlushTrigger::Interval).await.unwrap();
        assert_eq!(h.scheduler.persisted_watermark(SourceId(1)), Some(4));

        // Replayed records are skipped by the watermark
        h.sender.send(PersistenceItem::Vital(record(2))).unwrap();
        h.ingest(5);
        h.scheduler.drain_channel();
        let report = h.scheduler.flush(FlushTrigger::Interval).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.vitals_written, 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_closes() {
        let mut h = harness(PersistenceConfig::default(), 100);
        h.ingest(1);
        h.ingest(2);
        let report = h.scheduler.shutdown().await.unwrap();
        assert_eq!(report.trigger, FlushTrigger::Shutdown);
        assert_eq!(report.vitals_written, 2);
        assert!(h.store.is_closed());
    }
}
