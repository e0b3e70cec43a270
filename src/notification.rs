//! # Notifications
//!
//! The alarm-notification interface exposed to UI and other consumers.
//!
//! The stream is bounded and drop-oldest: a slow consumer loses stale vitals
//! rather than stalling the real-time thread. Delivery is at-least-once
//! because active alarms are re-published on the resync interval; consumers
//! deduplicate on `(alarm_id, revision)`, for example with
//! [`AlarmDeduplicator`].

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::channels::{
    BoundedReceiver, BoundedSender, ChannelError, ChannelStatsSnapshot, RecvTimeoutError,
    SendOutcome,
};
use crate::models::{AlarmSnapshot, VitalRecord};
use crate::monitoring::HealthMonitor;

/// A vital record as appended to the cache
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VitalsUpdate {
    pub record: VitalRecord,
    /// Cache sequence number, usable as a read cursor
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Notification {
    Alarm(AlarmSnapshot),
    Vitals(VitalsUpdate),
}

impl Notification {
    pub fn as_alarm(&self) -> Option<&AlarmSnapshot> {
        match self {
            Self::Alarm(snapshot) => Some(snapshot),
            Self::Vitals(_) => None,
        }
    }
}

/// A notification plus the timing needed for end-to-end latency
#[derive(Debug, Clone, Copy)]
pub struct NotificationEnvelope {
    pub notification: Notification,
    /// When the sample that caused this notification entered the pipeline.
    /// `None` for timer-driven and resync notifications.
    pub ingested_at: Option<Instant>,
    pub published_at: Instant,
}

impl NotificationEnvelope {
    /// Time from ingestion to publication
    pub fn pipeline_latency(&self) -> Option<Duration> {
        self.ingested_at
            .map(|ingested| self.published_at.saturating_duration_since(ingested))
    }
}

/// Real-time side of the notification stream
#[derive(Debug)]
pub(crate) struct NotificationPublisher {
    sender: BoundedSender<NotificationEnvelope>,
    health: Arc<HealthMonitor>,
}

impl NotificationPublisher {
    pub(crate) fn new(sender: BoundedSender<NotificationEnvelope>, health: Arc<HealthMonitor>) -> Self {
        Self { sender, health }
    }

    /// Publish without waiting. Returns false if the consumer is gone or the
    /// channel refused the item.
    pub(crate) fn publish(&self, notification: Notification, ingested_at: Option<Instant>) -> bool {
        let envelope = NotificationEnvelope {
            notification,
            ingested_at,
            published_at: Instant::now(),
        };
        match self.sender.send(envelope) {
            Ok(SendOutcome::Delivered) => true,
            Ok(SendOutcome::DeliveredAfterEviction { evicted }) => {
                self.health
                    .record_channel_drop(self.sender.name(), evicted as u64);
                true
            }
            Err(ChannelError::Full(_)) => {
                self.health.record_channel_drop(self.sender.name(), 1);
                false
            }
            Err(ChannelError::Disconnected(_)) => false,
        }
    }
}

/// Consumer side of the notification stream
#[derive(Debug)]
pub struct NotificationReceiver {
    inner: BoundedReceiver<NotificationEnvelope>,
}

impl NotificationReceiver {
    pub(crate) fn new(inner: BoundedReceiver<NotificationEnvelope>) -> Self {
        Self { inner }
    }

    pub fn try_recv(&self) -> Option<NotificationEnvelope> {
        self.inner.try_recv()
    }

    /// Wait up to `timeout`. `None` on timeout or once the pipeline has
    /// stopped and the stream is drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<NotificationEnvelope> {
        match self.inner.recv_timeout(timeout) {
            Ok(envelope) => Some(envelope),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything queued right now
    pub fn drain(&self) -> Vec<NotificationEnvelope> {
        self.inner.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.inner.stats().snapshot()
    }
}

/// Drops alarm notifications whose revision was already seen
#[derive(Debug, Default)]
pub struct AlarmDeduplicator {
    latest: HashMap<Uuid, u32>,
}

impl AlarmDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `snapshot` is newer than anything seen for its alarm
    pub fn accept(&mut self, snapshot: &AlarmSnapshot) -> bool {
        match self.latest.get(&snapshot.alarm_id()) {
            Some(&seen) if seen >= snapshot.revision() => false,
            _ => {
                self.latest.insert(snapshot.alarm_id(), snapshot.revision());
                true
            }
        }
    }

    /// Forget alarms that are no longer live
    pub fn forget(&mut self, alarm_id: Uuid) {
        self.latest.remove(&alarm_id);
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
