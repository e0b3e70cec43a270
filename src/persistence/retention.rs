//! Rolling retention and emergency cleanup of the durable store.
//!
//! The daily run deletes vitals and resolved alarms past their windows in
//! bounded batches. A periodic size check enters emergency mode above the
//! ceiling (or on a storage-pressure signal from the scheduler), shortening
//! the vitals window, archiving old resolved alarms and compacting the store.
//! Emergency mode ends once the store shrinks below `ceiling × recovery_ratio`.

use chrono::{NaiveDate, Timelike};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::errors::StorageResult;
use super::repository::{DurableStore, Repository, StoredRecord};
use crate::config::RetentionConfig;
use crate::constants::realtime::MS_PER_DAY;
use crate::logging::{log_error, log_storage_operation};
use crate::monitoring::HealthMonitor;
use crate::utils::Clock;

/// Rows touched by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub vitals_deleted: u64,
    pub alarms_deleted: u64,
    pub alarms_archived: u64,
    pub compacted: bool,
    pub emergency: bool,
}

impl RetentionReport {
    pub fn rows_affected(&self) -> u64 {
        self.vitals_deleted + self.alarms_deleted + self.alarms_archived
    }
}

/// Retention policy enforcement on the storage thread
pub struct RetentionService {
    config: RetentionConfig,
    store: Arc<dyn DurableStore>,
    health: Arc<HealthMonitor>,
    clock: Arc<dyn Clock>,
    emergency: bool,
    last_daily_run: Option<NaiveDate>,
    last_size_check_ms: Option<i64>,
}

impl std::fmt::Debug for RetentionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionService")
            .field("emergency", &self.emergency)
            .field("last_daily_run", &self.last_daily_run)
            .finish_non_exhaustive()
    }
}

impl RetentionService {
    pub fn new(
        config: RetentionConfig,
        store: Arc<dyn DurableStore>,
        health: Arc<HealthMonitor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            health,
            clock,
            emergency: false,
            last_daily_run: None,
            last_size_check_ms: None,
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency
    }

    /// Vitals window currently in force, in days
    pub fn vitals_window_days(&self) -> u32 {
        if self.emergency {
            self.config.emergency_vitals_retention_days
        } else {
            self.config.vitals_retention_days
        }
    }

    /// True once per UTC day, during the configured hour
    pub fn is_daily_run_due(&self) -> bool {
        let now = self.clock.utc_now();
        now.hour() == self.config.run_at_hour_utc && self.last_daily_run != Some(now.date_naive())
    }

    fn is_size_check_due(&self, now_ms: i64) -> bool {
        let interval_ms = self.config.size_check_interval().as_millis() as i64;
        self.last_size_check_ms
            .map_or(true, |last| now_ms - last >= interval_ms)
    }

    /// Delete vitals and resolved alarms past their retention windows
    pub async fn run_daily(&mut self) -> StorageResult<RetentionReport> {
        let started = Instant::now();
        let now_ms = self.clock.now_ms();
        self.last_daily_run = Some(self.clock.utc_now().date_naive());

        let vitals_cutoff = now_ms - i64::from(self.vitals_window_days()) * MS_PER_DAY;
        let alarms_cutoff = now_ms - i64::from(self.config.alarms_retention_days) * MS_PER_DAY;

        let report = RetentionReport {
            vitals_deleted: self.purge(self.store.vitals(), vitals_cutoff).await?,
            alarms_deleted: self.purge(self.store.alarms(), alarms_cutoff).await?,
            emergency: self.emergency,
            ..RetentionReport::default()
        };

        self.health.record_retention_run(report.rows_affected());
        log_storage_operation(
            "retention_daily",
            None,
            Some(report.rows_affected() as usize),
            "completed",
            Some(started.elapsed().as_millis() as u64),
            None,
        );
        Ok(report)
    }

    /// Compare store size with the ceiling and enter or leave emergency
    /// mode. Returns a report when an emergency cleanup ran.
    pub async fn check_storage(&mut self) -> StorageResult<Option<RetentionReport>> {
        let now_ms = self.clock.now_ms();
        self.last_size_check_ms = Some(now_ms);
        let pressure_signalled = self.health.take_storage_pressure();
        let size = self.store.size_bytes().await?;

        if self.emergency && size < self.config.recovery_bytes() {
            self.set_emergency(false, size);
            return Ok(None);
        }

        if size <= self.config.size_ceiling_bytes && !pressure_signalled {
            debug!(size_bytes = size, "Durable store within size ceiling");
            return Ok(None);
        }

        if !self.emergency {
            self.set_emergency(true, size);
        }
        let report = self.emergency_cleanup(now_ms).await?;

        let size_after = self.store.size_bytes().await?;
        if size_after < self.config.recovery_bytes() {
            self.set_emergency(false, size_after);
        }
        Ok(Some(report))
    }

    /// One scheduling step. Failures are logged and reported on the health
    /// monitor, never returned.
    pub async fn tick(&mut self) -> Option<RetentionReport> {
        let now_ms = self.clock.now_ms();
        let mut last_report = None;

        if self.is_daily_run_due() {
            match self.run_daily().await {
                Ok(report) => last_report = Some(report),
                Err(err) => self.report_failure("daily", &err.to_string()),
            }
        }

        if self.is_size_check_due(now_ms) || self.health.storage_pressure_pending() {
            match self.check_storage().await {
                Ok(Some(report)) => last_report = Some(report),
                Ok(None) => {}
                Err(err) => self.report_failure("size_check", &err.to_string()),
            }
        }

        last_report
    }

    /// Tick until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>, poll: std::time::Duration) {
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            run_at_hour_utc = self.config.run_at_hour_utc,
            size_ceiling_bytes = self.config.size_ceiling_bytes,
            "Retention service started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Retention service stopped");
    }

    async fn emergency_cleanup(&mut self, now_ms: i64) -> StorageResult<RetentionReport> {
        let started = Instant::now();
        let vitals_cutoff = now_ms - i64::from(self.config.emergency_vitals_retention_days) * MS_PER_DAY;
        let archive_cutoff = now_ms - i64::from(self.config.emergency_alarm_archive_days) * MS_PER_DAY;

        let vitals_deleted = self.purge(self.store.vitals(), vitals_cutoff).await?;
        let alarms_archived = self.store.alarms().archive(archive_cutoff).await?;
        self.store.compact().await?;

        let report = RetentionReport {
            vitals_deleted,
            alarms_deleted: 0,
            alarms_archived,
            compacted: true,
            emergency: true,
        };
        self.health.record_retention_run(report.rows_affected());
        log_storage_operation(
            "retention_emergency",
            None,
            Some(report.rows_affected() as usize),
            "completed",
            Some(started.elapsed().as_millis() as u64),
            None,
        );
        Ok(report)
    }

    /// Delete everything aged past `cutoff_ms` in batches
    async fn purge<T: StoredRecord>(&self, repository: &dyn Repository<T>, cutoff_ms: i64) -> StorageResult<u64> {
        let batch_size = self.config.delete_batch_size.max(1);
        let mut total = 0;
        loop {
            let deleted = repository.delete_older_than(cutoff_ms, batch_size).await?;
            total += deleted;
            if deleted < batch_size as u64 {
                break;
            }
            tokio::task::yield_now().await;
        }
        Ok(total)
    }

    fn set_emergency(&mut self, active: bool, size_bytes: u64) {
        self.emergency = active;
        self.health.set_emergency_mode(active);
        if active {
            warn!(
                size_bytes,
                ceiling = self.config.size_ceiling_bytes,
                "Entering emergency retention mode"
            );
        } else {
            info!(size_bytes, "Leaving emergency retention mode");
        }
    }

    fn report_failure(&self, operation: &str, error: &str) {
        self.health.record_retention_failure();
        log_error("retention", operation, error, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetentionConfig;
    use crate::models::{SourceId, VitalRecord};
    use crate::persistence::{InMemoryStore, InjectedFault};
    use crate::utils::ManualClock;
    use chrono::{TimeZone, Utc};

    const DAY: i64 = MS_PER_DAY;

    fn at_hour(day: u32, hour: u32) -> i64 {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn service(store: &Arc<InMemoryStore>, clock: &Arc<ManualClock>, health: &Arc<HealthMonitor>) -> RetentionService {
        RetentionService::new(
            RetentionConfig {
                delete_batch_size: 4,
                size_ceiling_bytes: 10_000,
                ..RetentionConfig::default()
            },
            store.clone(),
            Arc::clone(health),
            clock.clone(),
        )
    }

    async fn seed_daily(store: &InMemoryStore, now_ms: i64, days: i64) {
        let records: Vec<_> = (0..days)
            .map(|d| VitalRecord::measured(SourceId(1), now_ms - d * DAY - 1, 70.0, 98.0, 12.0))
            .collect();
        store.vitals().save_batch(&records).await.unwrap();
    }

    #[tokio::test]
    async fn test_daily_run_deletes_in_batches() {
        let now = at_hour(20, 3);
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let health = Arc::new(HealthMonitor::new());
        seed_daily(&store, now, 20).await;

        let mut retention = service(&store, &clock, &health);
        assert!(retention.is_daily_run_due());
        let report = retention.run_daily().await.unwrap();
        // Ages 0..=6 days survive the 7-day window
        assert_eq!(report.vitals_deleted, 13);
        assert_eq!(store.vitals_table().len(), 7);
        assert!(!retention.is_daily_run_due());
        assert_eq!(health.snapshot().rows_purged, 13);
    }

    #[tokio::test]
    async fn test_daily_run_waits_for_configured_hour() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(at_hour(20, 2)));
        let health = Arc::new(HealthMonitor::new());
        let retention = service(&store, &clock, &health);
        assert!(!retention.is_daily_run_due());
        clock.set_ms(at_hour(20, 3));
        assert!(retention.is_daily_run_due());
    }

    #[tokio::test]
    async fn test_emergency_mode_enter_and_exit() {
        let now = at_hour(20, 12);
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let health = Arc::new(HealthMonitor::new());
        seed_daily(&store, now, 10).await;
        store.set_reported_size(Some(50_000));

        let mut retention = service(&store, &clock, &health);
        let report = retention.check_storage().await.unwrap().unwrap();
        assert!(report.emergency);
        assert_eq!(report.vitals_deleted, 7);
        assert_eq!(retention.vitals_window_days(), 3);
        assert_eq!(store.compaction_count(), 1);
        assert!(health.is_emergency_mode());
        assert!(health.is_degraded());

        store.set_reported_size(Some(7_000));
        assert!(retention.check_storage().await.unwrap().is_none());
        assert!(!retention.is_emergency());
        assert!(!health.is_degraded());
    }

    #[tokio::test]
    async fn test_pressure_signal_triggers_cleanup_below_ceiling() {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(at_hour(20, 12)));
        let health = Arc::new(HealthMonitor::new());
        let mut retention = service(&store, &clock, &health);

        health.signal_storage_pressure();
        let report = retention.tick().await.unwrap();
        assert!(report.emergency);
        // An empty store is far below the recovery threshold
        assert!(!retention.is_emergency());
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_returned() {
        let now = at_hour(20, 3);
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let health = Arc::new(HealthMonitor::new());
        let mut retention = service(&store, &clock, &health);

        store.fail_next_writes(InjectedFault::Transient, 1);
        retention.tick().await;
        assert_eq!(health.snapshot().retention_failures, 1);
        assert!(health.is_degraded());
    }
}
