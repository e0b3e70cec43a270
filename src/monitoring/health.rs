//! Pipeline health shared across threads.
//!
//! Every thread reports into one [`HealthMonitor`] through atomics, so the
//! real-time thread can count a reject or drop without locking. `status()`
//! folds the flags into the user-facing degraded indicator.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

use crate::constants::channels;

/// Why the pipeline reports itself degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// The last flush to the durable store failed
    PersistenceFailing,
    /// Emergency retention is active because the store is over its ceiling
    StoragePressure,
    /// Retention or emergency cleanup failed
    RetentionFailing,
    /// The telemetry sink is refusing batches
    TelemetryFailing,
}

impl fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PersistenceFailing => write!(f, "persistence_failing"),
            Self::StoragePressure => write!(f, "storage_pressure"),
            Self::RetentionFailing => write!(f, "retention_failing"),
            Self::TelemetryFailing => write!(f, "telemetry_failing"),
        }
    }
}

/// System status enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SystemStatus {
    Healthy,
    Degraded { reasons: Vec<DegradedReason> },
}

impl SystemStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Counter values at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub validation_rejects: u64,
    pub ingress_drops: u64,
    pub persistence_drops: u64,
    pub notification_drops: u64,
    pub telemetry_drops: u64,
    pub command_rejects: u64,
    pub telemetry_failures: u64,
    pub flush_failures: u64,
    pub records_persisted: u64,
    pub alarms_persisted: u64,
    pub records_backfilled: u64,
    pub retention_runs: u64,
    pub rows_purged: u64,
    pub emergency_activations: u64,
    pub retention_failures: u64,
    pub engine_faults: u64,
}

#[derive(Debug, Default)]
pub struct HealthMonitor {
    validation_rejects: AtomicU64,
    ingress_drops: AtomicU64,
    persistence_drops: AtomicU64,
    notification_drops: AtomicU64,
    telemetry_drops: AtomicU64,
    command_rejects: AtomicU64,
    telemetry_failures: AtomicU64,
    flush_failures: AtomicU64,
    records_persisted: AtomicU64,
    alarms_persisted: AtomicU64,
    records_backfilled: AtomicU64,
    retention_runs: AtomicU64,
    rows_purged: AtomicU64,
    emergency_activations: AtomicU64,
    retention_failures: AtomicU64,
    engine_faults: AtomicU64,

    persistence_degraded: AtomicBool,
    retention_degraded: AtomicBool,
    telemetry_degraded: AtomicBool,
    emergency_mode: AtomicBool,
    /// Raised by the scheduler on `StorageExhausted`, consumed by retention
    storage_pressure_signal: AtomicBool,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_validation_reject(&self) {
        self.validation_rejects.fetch_add(1, Ordering::Relaxed);
    }

    /// Count items dropped or rejected on a named channel
    #[inline]
    pub fn record_channel_drop(&self, channel: &'static str, count: u64) {
        let counter = match channel {
            channels::INGRESS => &self.ingress_drops,
            channels::PERSISTENCE => &self.persistence_drops,
            channels::NOTIFICATION => &self.notification_drops,
            channels::TELEMETRY => &self.telemetry_drops,
            _ => &self.command_rejects,
        };
        counter.fetch_add(count, Ordering::Relaxed);
    }

    /// Count an internal alarm engine fault that was clamped
    pub fn record_engine_fault(&self) {
        self.engine_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush_success(&self, vitals: u64, alarms: u64) {
        self.records_persisted.fetch_add(vitals, Ordering::Relaxed);
        self.alarms_persisted.fetch_add(alarms, Ordering::Relaxed);
        if self.persistence_degraded.swap(false, Ordering::AcqRel) {
            info!("Persistence recovered");
        }
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
        if !self.persistence_degraded.swap(true, Ordering::AcqRel) {
            warn!("Persistence degraded: flush failed");
        }
    }

    pub fn record_backfill(&self, records: u64) {
        self.records_backfilled.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_telemetry_result(&self, success: bool) {
        if success {
            self.telemetry_degraded.store(false, Ordering::Release);
        } else {
            self.telemetry_failures.fetch_add(1, Ordering::Relaxed);
            self.telemetry_degraded.store(true, Ordering::Release);
        }
    }

    pub fn record_retention_run(&self, rows_purged: u64) {
        self.retention_runs.fetch_add(1, Ordering::Relaxed);
        self.rows_purged.fetch_add(rows_purged, Ordering::Relaxed);
        self.retention_degraded.store(false, Ordering::Release);
    }

    pub fn record_retention_failure(&self) {
        self.retention_failures.fetch_add(1, Ordering::Relaxed);
        if !self.retention_degraded.swap(true, Ordering::AcqRel) {
            warn!("Retention degraded: cleanup failed");
        }
    }

    pub fn set_emergency_mode(&self, active: bool) {
        let was_active = self.emergency_mode.swap(active, Ordering::AcqRel);
        if active && !was_active {
            self.emergency_activations.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn is_emergency_mode(&self) -> bool {
        self.emergency_mode.load(Ordering::Acquire)
    }

    /// Ask the retention service to check the store immediately
    pub fn signal_storage_pressure(&self) {
        self.storage_pressure_signal.store(true, Ordering::Release);
    }

    pub fn storage_pressure_pending(&self) -> bool {
        self.storage_pressure_signal.load(Ordering::Acquire)
    }

    /// Consume a pending storage-pressure signal
    pub fn take_storage_pressure(&self) -> bool {
        self.storage_pressure_signal.swap(false, Ordering::AcqRel)
    }

    pub fn is_degraded(&self) -> bool {
        !self.status().is_healthy()
    }

    pub fn status(&self) -> SystemStatus {
        let mut reasons = Vec::new();
        if self.persistence_degraded.load(Ordering::Acquire) {
            reasons.push(DegradedReason::PersistenceFailing);
        }
        if self.emergency_mode.load(Ordering::Acquire) {
            reasons.push(DegradedReason::StoragePressure);
        }
        if self.retention_degraded.load(Ordering::Acquire) {
            reasons.push(DegradedReason::RetentionFailing);
        }
        if self.telemetry_degraded.load(Ordering::Acquire) {
            reasons.push(DegradedReason::TelemetryFailing);
        }

        if reasons.is_empty() {
            SystemStatus::Healthy
        } else {
            SystemStatus::Degraded { reasons }
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            validation_rejects: self.validation_rejects.load(Ordering::Relaxed),
            ingress_drops: self.ingress_drops.load(Ordering::Relaxed),
            persistence_drops: self.persistence_drops.load(Ordering::Relaxed),
            notification_drops: self.notification_drops.load(Ordering::Relaxed),
            telemetry_drops: self.telemetry_drops.load(Ordering::Relaxed),
            command_rejects: self.command_rejects.load(Ordering::Relaxed),
            telemetry_failures: self.telemetry_failures.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            records_persisted: self.records_persisted.load(Ordering::Relaxed),
            alarms_persisted: self.alarms_persisted.load(Ordering::Relaxed),
            records_backfilled: self.records_backfilled.load(Ordering::Relaxed),
            retention_runs: self.retention_runs.load(Ordering::Relaxed),
            rows_purged: self.rows_purged.load(Ordering::Relaxed),
            emergency_activations: self.emergency_activations.load(Ordering::Relaxed),
            retention_failures: self.retention_failures.load(Ordering::Relaxed),
            engine_faults: self.engine_faults.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_healthy() {
        let health = HealthMonitor::new();
        assert_eq!(health.status(), SystemStatus::Healthy);
        assert!(!health.is_degraded());
    }

    #[test]
    fn test_flush_failure_degrades_until_success() {
        let health = HealthMonitor::new();
        health.record_flush_failure();
        assert_eq!(
            health.status(),
            SystemStatus::Degraded {
                reasons: vec![DegradedReason::PersistenceFailing]
            }
        );

        health.record_flush_success(10, 1);
        assert!(!health.is_degraded());
        let snapshot = health.snapshot();
        assert_eq!(snapshot.flush_failures, 1);
        assert_eq!(snapshot.records_persisted, 10);
        assert_eq!(snapshot.alarms_persisted, 1);
    }

    #[test]
    fn test_channel_drops_are_routed() {
        let health = HealthMonitor::new();
        health.record_channel_drop(channels::PERSISTENCE, 3);
        health.record_channel_drop(channels::NOTIFICATION, 1);
        health.record_channel_drop(channels::COMMAND, 2);
        let snapshot = health.snapshot();
        assert_eq!(snapshot.persistence_drops, 3);
        assert_eq!(snapshot.notification_drops, 1);
        assert_eq!(snapshot.command_rejects, 2);
        // Drops alone do not degrade the pipeline
        assert!(!health.is_degraded());
    }

    #[test]
    fn test_emergency_mode_counts_activations_once() {
        let health = HealthMonitor::new();
        health.set_emergency_mode(true);
        health.set_emergency_mode(true);
        assert!(health.is_emergency_mode());
        assert_eq!(health.snapshot().emergency_activations, 1);
        assert!(health.is_degraded());

        health.set_emergency_mode(false);
        assert!(!health.is_degraded());
    }

    #[test]
    fn test_storage_pressure_signal_is_consumed() {
        let health = HealthMonitor::new();
        assert!(!health.take_storage_pressure());
        health.signal_storage_pressure();
        assert!(health.take_storage_pressure());
        assert!(!health.take_storage_pressure());
    }
}
