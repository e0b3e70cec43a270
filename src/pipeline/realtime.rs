//! The `vitals-rt` loop.
//!
//! Owns the write side of both caches, the alarm engine and the telemetry
//! batcher. Every sample is cached, evaluated and fanned out before the next
//! one is read. The loop never waits on I/O: all outputs are non-blocking
//! channel sends whose overflow is counted on the health monitor.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::commands::AlarmCommand;
use crate::alarm::{AlarmEngine, AlarmSink};
use crate::cache::{VitalsCache, WaveformCaches};
use crate::channels::{BoundedReceiver, BoundedSender, ChannelError, RecvTimeoutError, SendOutcome};
use crate::constants::{realtime, threads};
use crate::error::{Result, VitalsError};
use crate::ingress::{IngressEvent, SensorEvent};
use crate::models::{AlarmSnapshot, TelemetryBatch, VitalRecord};
use crate::monitoring::{HealthMonitor, LatencyTracker};
use crate::notification::{Notification, NotificationPublisher, VitalsUpdate};
use crate::persistence::PersistenceItem;
use crate::telemetry::TelemetryBatcher;
use crate::utils::Clock;

/// Counts reported by the real-time thread when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealtimeSummary {
    pub vitals_processed: u64,
    pub vitals_rejected: u64,
    pub waveform_samples: u64,
    pub commands_handled: u64,
    pub alarm_transitions: u64,
}

/// Batcher plus the channel its batches leave on
#[derive(Debug)]
pub(crate) struct TelemetryOutlet {
    pub(crate) batcher: TelemetryBatcher,
    pub(crate) sender: BoundedSender<TelemetryBatch>,
}

/// Alarm revisions the persistence channel evicted, newest per alarm.
///
/// Evicted vitals are not kept: the scheduler backfills them from the
/// vitals cache. Alarm snapshots have no such second copy, so they wait
/// here until the next timer pass re-sends them.
#[derive(Debug)]
struct AlarmRedelivery {
    queue: VecDeque<AlarmSnapshot>,
    capacity: usize,
}

impl AlarmRedelivery {
    fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn reclaim(&mut self, item: PersistenceItem) {
        let PersistenceItem::Alarm(snapshot) = item else {
            return;
        };
        if let Some(queued) = self
            .queue
            .iter_mut()
            .find(|queued| queued.alarm_id() == snapshot.alarm_id())
        {
            if snapshot.revision() > queued.revision() {
                *queued = snapshot;
            }
            return;
        }
        if self.queue.len() >= self.capacity {
            if let Some(lost) = self.queue.pop_front() {
                error!(
                    alarm_id = %lost.alarm_id(),
                    revision = lost.revision(),
                    "Alarm revision lost: redelivery queue full"
                );
            }
        }
        self.queue.push_back(snapshot);
    }

    fn pop(&mut self) -> Option<AlarmSnapshot> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Everything an alarm transition is published to
#[derive(Debug)]
struct AlarmFanOut {
    notifications: NotificationPublisher,
    persistence: BoundedSender<PersistenceItem>,
    redelivery: AlarmRedelivery,
    telemetry: Option<TelemetryOutlet>,
    health: Arc<HealthMonitor>,
    /// Ingestion time of the sample being evaluated, if any
    cause: Option<Instant>,
    transitions: u64,
}

impl AlarmFanOut {
    /// Non-blocking send to the storage thread. Drops are counted; evicted
    /// alarm revisions are queued for redelivery.
    fn persist(&mut self, item: PersistenceItem) {
        let redelivery = &mut self.redelivery;
        let outcome = self
            .persistence
            .send_reclaiming(item, |evicted| redelivery.reclaim(evicted));
        match outcome {
            Ok(SendOutcome::Delivered) => {}
            Ok(SendOutcome::DeliveredAfterEviction { evicted }) => {
                self.health
                    .record_channel_drop(self.persistence.name(), evicted as u64);
            }
            Err(ChannelError::Full(item)) => {
                self.health.record_channel_drop(self.persistence.name(), 1);
                self.redelivery.reclaim(item);
            }
            Err(ChannelError::Disconnected(_)) => {}
        }
    }

    /// One pass over the redelivery queue. Revisions evicted again are
    /// queued behind the pass and wait for the next one.
    fn redeliver_alarms(&mut self) {
        for _ in 0..self.redelivery.len() {
            let Some(snapshot) = self.redelivery.pop() else {
                break;
            };
            self.persist(PersistenceItem::Alarm(snapshot));
        }
    }
}

impl AlarmSink for AlarmFanOut {
    fn publish(&mut self, snapshot: AlarmSnapshot) {
        self.transitions += 1;
        self.notifications
            .publish(Notification::Alarm(snapshot), self.cause);
        self.persist(PersistenceItem::Alarm(snapshot));
        if let Some(outlet) = self.telemetry.as_mut() {
            outlet.batcher.record_alarm(snapshot);
        }
    }
}

/// Channel ends and shared state handed to the real-time thread
pub(crate) struct RealtimeParts {
    pub(crate) tick_interval: Duration,
    pub(crate) resync_interval: Duration,
    pub(crate) latency_budget: Duration,
    /// Evicted alarm revisions held for redelivery
    pub(crate) redelivery_capacity: usize,
    pub(crate) ingress: BoundedReceiver<IngressEvent>,
    pub(crate) commands: BoundedReceiver<AlarmCommand>,
    pub(crate) vitals: Arc<VitalsCache>,
    pub(crate) waveforms: Arc<WaveformCaches>,
    pub(crate) engine: AlarmEngine,
    pub(crate) notifications: NotificationPublisher,
    pub(crate) persistence: BoundedSender<PersistenceItem>,
    pub(crate) telemetry: Option<TelemetryOutlet>,
    pub(crate) health: Arc<HealthMonitor>,
    pub(crate) latency: LatencyTracker,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) stop: Arc<AtomicBool>,
}

pub(crate) struct RealtimeLoop {
    tick_interval: Duration,
    resync_interval_ms: i64,
    ingress: BoundedReceiver<IngressEvent>,
    commands: BoundedReceiver<AlarmCommand>,
    vitals: Arc<VitalsCache>,
    waveforms: Arc<WaveformCaches>,
    engine: AlarmEngine,
    outputs: AlarmFanOut,
    latency: LatencyTracker,
    latency_budget: Duration,
    clock: Arc<dyn Clock>,
    stop: Arc<AtomicBool>,
    ingress_open: bool,
    last_resync_ms: i64,
    engine_faults_seen: u64,
    summary: RealtimeSummary,
}

impl RealtimeLoop {
    pub(crate) fn new(parts: RealtimeParts) -> Self {
        let last_resync_ms = parts.clock.now_ms();
        Self {
            tick_interval: parts.tick_interval,
            resync_interval_ms: i64::try_from(parts.resync_interval.as_millis()).unwrap_or(i64::MAX),
            ingress: parts.ingress,
            commands: parts.commands,
            vitals: parts.vitals,
            waveforms: parts.waveforms,
            engine: parts.engine,
            outputs: AlarmFanOut {
                notifications: parts.notifications,
                persistence: parts.persistence,
                redelivery: AlarmRedelivery::with_capacity(parts.redelivery_capacity),
                telemetry: parts.telemetry,
                health: parts.health,
                cause: None,
                transitions: 0,
            },
            latency: parts.latency,
            latency_budget: parts.latency_budget,
            clock: parts.clock,
            stop: parts.stop,
            ingress_open: true,
            last_resync_ms,
            engine_faults_seen: 0,
            summary: RealtimeSummary::default(),
        }
    }

    /// Start the loop on its own named thread
    pub(crate) fn spawn(self) -> Result<JoinHandle<RealtimeSummary>> {
        std::thread::Builder::new()
            .name(threads::REALTIME.to_string())
            .spawn(move || self.run())
            .map_err(|e| VitalsError::Shutdown(format!("failed to spawn real-time thread: {e}")))
    }

    pub(crate) fn run(mut self) -> RealtimeSummary {
        info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            alarm_slots = self.engine.slot_count(),
            "Real-time loop started"
        );

        let mut next_timer = Instant::now();
        while !self.stop.load(Ordering::Acquire) {
            self.poll_inputs();
            if Instant::now() >= next_timer {
                self.run_timers();
                next_timer = Instant::now() + self.tick_interval;
            }
        }

        self.drain_for_shutdown();
        self.summary.alarm_transitions = self.outputs.transitions;
        info!(
            vitals = self.summary.vitals_processed,
            rejected = self.summary.vitals_rejected,
            transitions = self.summary.alarm_transitions,
            "Real-time loop stopped"
        );
        self.summary
    }

    /// Wait up to one tick for a sample, then take a bounded burst of
    /// whatever else is queued and answer pending commands.
    fn poll_inputs(&mut self) {
        if self.ingress_open {
            match self.ingress.recv_timeout(self.tick_interval) {
                Ok(event) => {
                    self.handle_event(event);
                    for _ in 1..realtime::MAX_INGRESS_BURST {
                        match self.ingress.try_recv() {
                            Some(event) => self.handle_event(event),
                            None => break,
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Sensor ingress closed");
                    self.ingress_open = false;
                }
            }
        } else if let Ok(command) = self.commands.recv_timeout(self.tick_interval) {
            self.handle_command(command);
        }

        while let Some(command) = self.commands.try_recv() {
            self.handle_command(command);
        }
    }

    fn handle_event(&mut self, event: IngressEvent) {
        match event.event {
            SensorEvent::Vital(record) => self.handle_vital(record, event.received_at),
            SensorEvent::Waveform(sample) => {
                if self.waveforms.append(sample) {
                    self.summary.waveform_samples += 1;
                }
            }
        }
    }

    fn handle_vital(&mut self, record: VitalRecord, received_at: Instant) {
        if !self.vitals.append(record) {
            self.summary.vitals_rejected += 1;
            self.outputs.health.record_validation_reject();
            return;
        }
        self.summary.vitals_processed += 1;
        let sequence = self.vitals.last_sequence();

        self.outputs.cause = Some(received_at);
        self.engine
            .evaluate(&record, self.clock.now_ms(), &mut self.outputs);
        self.outputs.cause = None;

        self.outputs.notifications.publish(
            Notification::Vitals(VitalsUpdate { record, sequence }),
            Some(received_at),
        );
        self.outputs.persist(PersistenceItem::Vital(record));

        let elapsed = received_at.elapsed();
        self.latency.record(elapsed);
        if elapsed > self.latency_budget {
            warn!(
                sequence,
                elapsed_us = elapsed.as_micros() as u64,
                budget_ms = self.latency_budget.as_millis() as u64,
                "Sample exceeded the latency budget"
            );
        }
    }

    fn handle_command(&mut self, command: AlarmCommand) {
        self.summary.commands_handled += 1;
        let now_ms = self.clock.now_ms();
        let delivered = match command {
            AlarmCommand::Acknowledge {
                alarm_id,
                actor,
                reply,
            } => reply
                .send(self.engine.acknowledge(alarm_id, actor, now_ms, &mut self.outputs))
                .is_ok(),
            AlarmCommand::Silence {
                alarm_id,
                duration,
                reply,
            } => reply
                .send(self.engine.silence(alarm_id, duration, now_ms, &mut self.outputs))
                .is_ok(),
            AlarmCommand::ActiveAlarms { reply } => reply.send(self.engine.active_alarms()).is_ok(),
            AlarmCommand::History {
                start_ms,
                end_ms,
                reply,
            } => reply.send(self.engine.history(start_ms, end_ms)).is_ok(),
        };
        if !delivered {
            debug!("Command caller stopped waiting for the reply");
        }
    }

    fn run_timers(&mut self) {
        let now_ms = self.clock.now_ms();
        self.engine.tick(now_ms, &mut self.outputs);
        self.report_engine_faults();
        self.outputs.redeliver_alarms();

        if now_ms - self.last_resync_ms >= self.resync_interval_ms {
            self.resync(now_ms);
        }

        let due = self
            .outputs
            .telemetry
            .as_ref()
            .is_some_and(|outlet| outlet.batcher.is_due(now_ms));
        if due {
            self.emit_telemetry(now_ms);
        }
    }

    /// Refused engine transitions surface on the health monitor
    fn report_engine_faults(&mut self) {
        let faults = self.engine.fault_count();
        for _ in self.engine_faults_seen..faults {
            self.outputs.health.record_engine_fault();
        }
        self.engine_faults_seen = faults;
    }

    /// Re-publish live alarms so late or lossy consumers converge
    fn resync(&mut self, now_ms: i64) {
        let notifications = &self.outputs.notifications;
        let mut republished = 0u32;
        self.engine.for_each_active(|alarm| {
            notifications.publish(Notification::Alarm(*alarm), None);
            republished += 1;
        });
        if republished > 0 {
            debug!(republished, "Active alarms resynced");
        }
        self.last_resync_ms = now_ms;
    }

    fn emit_telemetry(&mut self, now_ms: i64) {
        let created_at = self.clock.utc_now();
        let Some(outlet) = self.outputs.telemetry.as_mut() else {
            return;
        };
        let Some(batch) = outlet.batcher.assemble(&self.vitals, now_ms, created_at) else {
            return;
        };
        match outlet.sender.send(batch) {
            Ok(SendOutcome::Delivered) => {}
            Ok(SendOutcome::DeliveredAfterEviction { evicted }) => self
                .outputs
                .health
                .record_channel_drop(outlet.sender.name(), evicted as u64),
            Err(ChannelError::Full(_)) => self
                .outputs
                .health
                .record_channel_drop(outlet.sender.name(), 1),
            Err(ChannelError::Disconnected(_)) => {}
        }
    }

    /// Process everything still queued so nothing is silently discarded
    fn drain_for_shutdown(&mut self) {
        let mut drained = 0u64;
        while let Some(event) = self.ingress.try_recv() {
            self.handle_event(event);
            drained += 1;
        }
        while let Some(command) = self.commands.try_recv() {
            self.handle_command(command);
        }

        let now_ms = self.clock.now_ms();
        self.engine.tick(now_ms, &mut self.outputs);
        if self.outputs.telemetry.is_some() {
            self.emit_telemetry(now_ms);
        }

        // The storage thread is still draining; wait for room instead of
        // evicting again
        let timeout = Duration::from_millis(realtime::SHUTDOWN_REDELIVERY_TIMEOUT_MS);
        let mut unsent = 0u32;
        while let Some(snapshot) = self.outputs.redelivery.pop() {
            let item = PersistenceItem::Alarm(snapshot);
            if self.outputs.persistence.send_waiting(item, timeout).is_err() {
                unsent += 1;
            }
        }
        if unsent > 0 {
            error!(unsent, "Alarm revisions left undelivered at shutdown");
        }
        debug!(drained, "Real-time queues drained");
    }
}
