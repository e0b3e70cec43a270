use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::VitalsCache;
use crate::config::{DeviceConfig, TelemetryConfig};
use crate::models::{AlarmSnapshot, TelemetryBatch};

/// Assembles periodic telemetry batches on the real-time thread.
///
/// Vitals are read from the cache behind a sequence cursor, so a batch holds
/// exactly the records appended since the previous one (minus anything the
/// cache evicted in between). Alarm snapshots are buffered as they are
/// published, keeping only the latest revision of each alarm.
#[derive(Debug)]
pub struct TelemetryBatcher {
    device_id: String,
    patient_id: Option<String>,
    cadence_ms: i64,
    max_vitals: usize,
    max_alarms: usize,
    cursor: u64,
    pending_alarms: Vec<AlarmSnapshot>,
    dropped_alarms: u64,
    last_batch_ms: Option<i64>,
}

impl TelemetryBatcher {
    pub fn new(device: &DeviceConfig, config: &TelemetryConfig) -> Self {
        let max_alarms = config.max_batch_alarms.max(1);
        Self {
            device_id: device.device_id.clone(),
            patient_id: device.patient_id.clone(),
            cadence_ms: duration_ms(config.cadence()),
            max_vitals: config.max_batch_vitals.max(1),
            max_alarms,
            cursor: 0,
            pending_alarms: Vec::with_capacity(max_alarms),
            dropped_alarms: 0,
            last_batch_ms: None,
        }
    }

    /// Buffer an alarm transition for the next batch
    pub fn record_alarm(&mut self, snapshot: AlarmSnapshot) {
        if let Some(existing) = self
            .pending_alarms
            .iter_mut()
            .find(|pending| pending.alarm_id() == snapshot.alarm_id())
        {
            if snapshot.revision() > existing.revision() {
                *existing = snapshot;
            }
            return;
        }

        if self.pending_alarms.len() == self.max_alarms {
            self.pending_alarms.remove(0);
            self.dropped_alarms += 1;
            if self.dropped_alarms % 100 == 1 {
                warn!(
                    dropped = self.dropped_alarms,
                    "Telemetry alarm buffer full, oldest snapshot dropped"
                );
            }
        }
        self.pending_alarms.push(snapshot);
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.last_batch_ms
            .map_or(true, |last| now_ms - last >= self.cadence_ms)
    }

    /// Build the batch for this interval. Empty intervals produce nothing.
    pub fn assemble(&mut self, cache: &VitalsCache, now_ms: i64, created_at: DateTime<Utc>) -> Option<TelemetryBatch> {
        self.last_batch_ms = Some(now_ms);

        let cached = cache.get_after_sequence(self.cursor, self.max_vitals);
        if let Some(last) = cached.last() {
            self.cursor = last.sequence;
        }
        let vitals: Vec<_> = cached.into_iter().map(|entry| entry.record).collect();

        if vitals.is_empty() && self.pending_alarms.is_empty() {
            return None;
        }

        let alarms = std::mem::replace(&mut self.pending_alarms, Vec::with_capacity(self.max_alarms));
        debug!(
            vitals = vitals.len(),
            alarms = alarms.len(),
            cursor = self.cursor,
            "Telemetry batch assembled"
        );
        Some(TelemetryBatch::new(
            self.device_id.clone(),
            self.patient_id.clone(),
            vitals,
            alarms,
            created_at,
        ))
    }

    /// Sequence of the newest vital already batched
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn pending_alarms(&self) -> usize {
        self.pending_alarms.len()
    }

    pub fn dropped_alarms(&self) -> u64 {
        self.dropped_alarms
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
