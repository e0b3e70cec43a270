//! Shared constructors for integration tests

use std::sync::Arc;
use std::time::{Duration, Instant};
use vitals_core::alarm::AlarmEngine;
use vitals_core::cache::VitalsCache;
use vitals_core::channels::{bounded, BoundedSender, OverflowPolicy};
use vitals_core::config::{
    AlarmsConfig, ChannelConfig, MonitorConfig, PersistenceConfig, StorageBackend, ThresholdConfig,
};
use vitals_core::models::{AlarmPriority, AlarmSnapshot, Origin, SourceId, VitalKind, VitalRecord};
use vitals_core::monitoring::HealthMonitor;
use vitals_core::notification::NotificationReceiver;
use vitals_core::persistence::{DurableStore, PersistenceItem, PersistenceScheduler};
use vitals_core::utils::ManualClock;
use vitals_core::AlarmState;

pub const SECOND_MS: i64 = 1_000;
pub const DAY_MS: i64 = 86_400_000;

/// 2024-01-01T12:00:00Z; outside the default 03:00 UTC retention hour
pub const EPOCH_MS: i64 = 1_704_110_400_000;

pub fn hr_record(source: u32, ts: i64, hr: f64) -> VitalRecord {
    VitalRecord::new(SourceId(source), ts, Some(hr), None, None, Origin::Sensor)
}

pub fn full_record(source: u32, ts: i64) -> VitalRecord {
    VitalRecord::measured(SourceId(source), ts, 72.0, 98.0, 14.0)
}

/// Alarm policy used by the clinical scenarios: HR above 100 is HIGH,
/// hysteresis of three samples
pub fn scenario_alarms() -> AlarmsConfig {
    AlarmsConfig {
        thresholds: vec![ThresholdConfig::new(
            VitalKind::HeartRate,
            Some(40.0),
            Some(100.0),
            AlarmPriority::High,
        )],
        hysteresis_samples: 3,
        ..AlarmsConfig::default()
    }
}

/// Pipeline configuration with an in-memory store and fast timers
pub fn memory_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.storage.backend = StorageBackend::Memory;
    config.cache.vitals_capacity = 10_000;
    config.alarms = scenario_alarms();
    config.realtime.tick_interval_ms = 5;
    config.persistence.poll_interval_ms = 20;
    config.telemetry.cadence_seconds = 1;
    config
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(EPOCH_MS))
}

/// Scheduler wired to a fresh cache and persistence channel
pub struct SchedulerHarness {
    pub sender: BoundedSender<PersistenceItem>,
    pub scheduler: PersistenceScheduler,
    pub cache: Arc<VitalsCache>,
    pub health: Arc<HealthMonitor>,
    pub clock: Arc<ManualClock>,
}

impl SchedulerHarness {
    pub fn new(config: PersistenceConfig, channel_capacity: usize, store: Arc<dyn DurableStore>) -> Self {
        let (sender, receiver) = bounded(
            "persistence",
            ChannelConfig::new(channel_capacity, OverflowPolicy::DropOldest),
        );
        let cache = Arc::new(VitalsCache::new(100_000, 8));
        let health = Arc::new(HealthMonitor::new());
        let clock = manual_clock();
        let scheduler = PersistenceScheduler::new(
            config,
            receiver,
            Arc::clone(&cache),
            store,
            Arc::clone(&health),
            clock.clone(),
        );
        Self {
            sender,
            scheduler,
            cache,
            health,
            clock,
        }
    }

    /// Cache the record and forward it the way the real-time thread does
    pub fn ingest(&self, record: VitalRecord) {
        assert!(self.cache.append(record));
        let _ = self.sender.send(PersistenceItem::Vital(record));
    }
}

/// Resolved alarm snapshots whose last transition happened at `resolved_at_ms`
pub fn resolved_alarms(count: usize, resolved_at_ms: i64) -> Vec<AlarmSnapshot> {
    let mut engine = AlarmEngine::new(&scenario_alarms());
    let mut published = Vec::new();
    let mut ts = resolved_at_ms - 10 * SECOND_MS * count as i64;
    for _ in 0..count {
        engine.evaluate(&hr_record(1, ts, 130.0), resolved_at_ms, &mut published);
        for _ in 0..3 {
            ts += SECOND_MS;
            engine.evaluate(&hr_record(1, ts, 80.0), resolved_at_ms, &mut published);
        }
        ts += SECOND_MS;
    }
    published
        .into_iter()
        .filter(|alarm| alarm.state() == AlarmState::Resolved)
        .collect()
}

/// Wait for the first alarm notification matching `predicate`
pub fn wait_for_alarm(
    receiver: &NotificationReceiver,
    timeout: Duration,
    predicate: impl Fn(&AlarmSnapshot) -> bool,
) -> Option<AlarmSnapshot> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(envelope) = receiver.recv_timeout(Duration::from_millis(10)) {
            if let Some(alarm) = envelope.notification.as_alarm() {
                if predicate(alarm) {
                    return Some(*alarm);
                }
            }
        }
    }
    None
}
