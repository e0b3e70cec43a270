//! Threshold evaluation and per-alarm lifecycle.
//!
//! The engine is owned by the real-time thread. It holds one slot per
//! (vital, limit direction) pair, so at most one live alarm exists per alarm
//! kind. Evaluation, timers and commands never allocate: slots and history
//! are sized at construction, and snapshots leave the engine by value
//! through an [`AlarmSink`].

use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cache::RingBuffer;
use crate::config::{AlarmsConfig, ThresholdConfig};
use crate::models::{ActorRef, AlarmKind, AlarmPriority, AlarmSnapshot, LimitDirection, VitalRecord};
use crate::state_machine::{AlarmEvent, AlarmState, AlarmStateMachine, StateMachineError, StateMachineResult};

/// Receiver of every alarm transition the engine makes
pub trait AlarmSink {
    fn publish(&mut self, snapshot: AlarmSnapshot);
}

impl AlarmSink for Vec<AlarmSnapshot> {
    fn publish(&mut self, snapshot: AlarmSnapshot) {
        self.push(snapshot);
    }
}

/// Discards every snapshot
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AlarmSink for NullSink {
    fn publish(&mut self, _snapshot: AlarmSnapshot) {}
}

/// One alarm limit with its live instance
#[derive(Debug)]
struct AlarmSlot {
    kind: AlarmKind,
    limit: f64,
    priority: AlarmPriority,
    hysteresis_samples: u32,
    clear_band: f64,
    current: Option<AlarmSnapshot>,
    clear_streak: u32,
    escalation_deadline_ms: Option<i64>,
}

impl AlarmSlot {
    fn new(
        threshold: &ThresholdConfig,
        direction: LimitDirection,
        limit: f64,
        default_hysteresis: u32,
    ) -> Self {
        Self {
            kind: AlarmKind::new(threshold.vital, direction),
            limit,
            priority: threshold.priority,
            hysteresis_samples: threshold.hysteresis_samples.unwrap_or(default_hysteresis).max(1),
            clear_band: threshold.clear_band,
            current: None,
            clear_streak: 0,
            escalation_deadline_ms: None,
        }
    }

    fn state(&self) -> AlarmState {
        self.current.map_or(AlarmState::Inactive, |alarm| alarm.state)
    }

    /// Strictly beyond the limit
    #[inline]
    fn violates(&self, value: f64) -> bool {
        match self.kind.direction() {
            LimitDirection::Above => value > self.limit,
            LimitDirection::Below => value < self.limit,
        }
    }

    /// Back inside the limit by at least the clear band
    #[inline]
    fn clears(&self, value: f64) -> bool {
        match self.kind.direction() {
            LimitDirection::Above => value <= self.limit - self.clear_band,
            LimitDirection::Below => value >= self.limit + self.clear_band,
        }
    }
}

/// Threshold evaluator and alarm state owner
#[derive(Debug)]
pub struct AlarmEngine {
    slots: Vec<AlarmSlot>,
    history: RingBuffer<AlarmSnapshot>,
    /// Escalation timeout per priority, indexed Low, Medium, High
    escalation_ms: [Option<i64>; 3],
    max_silence_ms: i64,
    faults: u64,
}

impl AlarmEngine {
    pub fn new(config: &AlarmsConfig) -> Self {
        let mut slots = Vec::with_capacity(config.thresholds.len() * 2);
        for threshold in &config.thresholds {
            if let Some(high) = threshold.high {
                slots.push(AlarmSlot::new(
                    threshold,
                    LimitDirection::Above,
                    high,
                    config.hysteresis_samples,
                ));
            }
            if let Some(low) = threshold.low {
                slots.push(AlarmSlot::new(
                    threshold,
                    LimitDirection::Below,
                    low,
                    config.hysteresis_samples,
                ));
            }
        }

        let to_ms = |timeout: Option<Duration>| timeout.map(|d| d.as_millis() as i64);
        Self {
            slots,
            history: RingBuffer::with_capacity(config.history_capacity),
            escalation_ms: [
                to_ms(config.escalation_timeout(AlarmPriority::Low)),
                to_ms(config.escalation_timeout(AlarmPriority::Medium)),
                to_ms(config.escalation_timeout(AlarmPriority::High)),
            ],
            max_silence_ms: config.max_silence().as_millis() as i64,
            faults: 0,
        }
    }

    /// Evaluate a freshly cached record against every limit it carries
    pub fn evaluate<S: AlarmSink>(&mut self, record: &VitalRecord, now_ms: i64, sink: &mut S) {
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            let Some(value) = record.value(slot.kind.vital()) else {
                continue;
            };
            let state = slot.state();

            if state.can_raise() {
                if slot.violates(value) {
                    self.raise(index, record, value, now_ms, sink);
                }
                continue;
            }

            if slot.violates(value) {
                self.slots[index].clear_streak = 0;
            } else if slot.clears(value) {
                let slot = &mut self.slots[index];
                slot.clear_streak += 1;
                if slot.clear_streak >= slot.hysteresis_samples {
                    self.resolve(index, now_ms, sink);
                }
            } else {
                // Inside the clear band: neither violating nor clearing
                self.slots[index].clear_streak = 0;
            }
        }
    }

    /// Run time-based transitions: escalation and silence expiry
    pub fn tick<S: AlarmSink>(&mut self, now_ms: i64, sink: &mut S) {
        for index in 0..self.slots.len() {
            let slot = &self.slots[index];
            let Some(alarm) = slot.current else {
                continue;
            };

            match alarm.state {
                AlarmState::Raised => {
                    if slot.escalation_deadline_ms.is_some_and(|deadline| now_ms >= deadline) {
                        self.escalate(index, now_ms, sink);
                    }
                }
                AlarmState::Silenced => {
                    if alarm.silenced_until_ms.is_some_and(|until| now_ms >= until) {
                        self.expire_silence(index, now_ms, sink);
                    }
                }
                _ => {}
            }
        }
    }

    /// Acknowledge a live alarm, cancelling its escalation
    pub fn acknowledge<S: AlarmSink>(
        &mut self,
        alarm_id: Uuid,
        actor: ActorRef,
        now_ms: i64,
        sink: &mut S,
    ) -> StateMachineResult<AlarmSnapshot> {
        let index = self.slot_for_command(alarm_id)?;
        let slot = &mut self.slots[index];
        let Some(alarm) = slot.current.as_mut() else {
            return Err(StateMachineError::AlarmNotFound(alarm_id));
        };

        AlarmStateMachine::apply(alarm, AlarmEvent::Acknowledge, now_ms)?;
        alarm.acknowledged_at_ms = Some(now_ms);
        alarm.acknowledged_by = Some(actor);
        slot.escalation_deadline_ms = None;

        let snapshot = *alarm;
        info!(
            alarm_id = %snapshot.alarm_id,
            kind = %snapshot.kind,
            actor = actor.0,
            "Alarm acknowledged"
        );
        sink.publish(snapshot);
        Ok(snapshot)
    }

    /// Silence a live alarm; the duration is capped at the configured maximum
    pub fn silence<S: AlarmSink>(
        &mut self,
        alarm_id: Uuid,
        duration: Duration,
        now_ms: i64,
        sink: &mut S,
    ) -> StateMachineResult<AlarmSnapshot> {
        let requested_ms = duration.as_millis() as i64;
        if requested_ms <= 0 {
            return Err(StateMachineError::GuardFailed {
                reason: "silence duration must be positive",
            });
        }
        let silence_ms = requested_ms.min(self.max_silence_ms);

        let index = self.slot_for_command(alarm_id)?;
        let slot = &mut self.slots[index];
        let Some(alarm) = slot.current.as_mut() else {
            return Err(StateMachineError::AlarmNotFound(alarm_id));
        };

        AlarmStateMachine::apply(alarm, AlarmEvent::Silence, now_ms)?;
        alarm.silenced_until_ms = Some(now_ms + silence_ms);
        slot.escalation_deadline_ms = None;

        let snapshot = *alarm;
        info!(
            alarm_id = %snapshot.alarm_id,
            kind = %snapshot.kind,
            silence_ms,
            "Alarm silenced"
        );
        sink.publish(snapshot);
        Ok(snapshot)
    }

    /// Copies of every live alarm
    pub fn active_alarms(&self) -> Vec<AlarmSnapshot> {
        let mut active = Vec::new();
        self.for_each_active(|alarm| active.push(*alarm));
        active
    }

    /// Visit every live alarm without allocating
    pub fn for_each_active<F: FnMut(&AlarmSnapshot)>(&self, mut visit: F) {
        for slot in &self.slots {
            if let Some(alarm) = slot.current.as_ref().filter(|alarm| alarm.is_active()) {
                visit(alarm);
            }
        }
    }

    /// Resolved alarms raised within `[start_ms, end_ms]`, newest first
    pub fn history(&self, start_ms: i64, end_ms: i64) -> Vec<AlarmSnapshot> {
        self.history
            .iter()
            .rev()
            .filter(|alarm| alarm.raised_at_ms >= start_ms && alarm.raised_at_ms <= end_ms)
            .copied()
            .collect()
    }

    /// Latest snapshot of an alarm, live or historical
    pub fn find(&self, alarm_id: Uuid) -> Option<AlarmSnapshot> {
        self.slots
            .iter()
            .filter_map(|slot| slot.current)
            .find(|alarm| alarm.alarm_id == alarm_id)
            .or_else(|| {
                self.history
                    .iter()
                    .rev()
                    .find(|alarm| alarm.alarm_id == alarm_id)
                    .copied()
            })
    }

    /// Number of alarm kinds the engine evaluates
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Internal transitions that were refused and clamped
    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    fn slot_for_command(&self, alarm_id: Uuid) -> StateMachineResult<usize> {
        if let Some(index) = self.slots.iter().position(|slot| {
            slot.current
                .is_some_and(|alarm| alarm.alarm_id == alarm_id)
        }) {
            return Ok(index);
        }
        if self.history.iter().any(|alarm| alarm.alarm_id == alarm_id) {
            return Err(StateMachineError::InvalidTransition {
                from: AlarmState::Resolved,
                event: "command",
            });
        }
        Err(StateMachineError::AlarmNotFound(alarm_id))
    }

    fn raise<S: AlarmSink>(
        &mut self,
        index: usize,
        record: &VitalRecord,
        value: f64,
        now_ms: i64,
        sink: &mut S,
    ) {
        let (kind, state, priority, limit) = {
            let slot = &self.slots[index];
            (slot.kind, slot.state(), slot.priority, slot.limit)
        };
        if !self.check_transition(kind, state, AlarmEvent::Raise) {
            return;
        }

        let alarm = AlarmSnapshot::raised(kind, priority, record.record_ref(), value, limit, now_ms);
        let deadline = self.escalation_deadline(alarm.priority, now_ms);

        let slot = &mut self.slots[index];
        slot.current = Some(alarm);
        slot.clear_streak = 0;
        slot.escalation_deadline_ms = deadline;

        info!(
            alarm_id = %alarm.alarm_id,
            kind = %alarm.kind,
            priority = %alarm.priority,
            value,
            threshold = alarm.threshold,
            "Alarm raised"
        );
        sink.publish(alarm);
    }

    fn escalate<S: AlarmSink>(&mut self, index: usize, now_ms: i64, sink: &mut S) {
        let Some(snapshot) = self.transition(index, AlarmEvent::Escalate, now_ms) else {
            return;
        };
        let slot = &mut self.slots[index];
        slot.escalation_deadline_ms = None;
        let Some(alarm) = slot.current.as_mut() else {
            return;
        };
        alarm.priority = snapshot.priority.elevated();
        alarm.escalation_level = alarm.escalation_level.saturating_add(1);

        let alarm = *alarm;
        info!(
            alarm_id = %alarm.alarm_id,
            kind = %alarm.kind,
            priority = %alarm.priority,
            escalation_level = alarm.escalation_level,
            "Alarm escalated"
        );
        sink.publish(alarm);
    }

    fn expire_silence<S: AlarmSink>(&mut self, index: usize, now_ms: i64, sink: &mut S) {
        let slot = &self.slots[index];
        // Direct resolution during silence leaves only unresolved alarms here
        let condition_active = slot.clear_streak < slot.hysteresis_samples;
        let event = AlarmEvent::SilenceExpired { condition_active };
        let Some(snapshot) = self.transition(index, event, now_ms) else {
            return;
        };

        if snapshot.state == AlarmState::Resolved {
            self.finish(index, snapshot, sink);
            return;
        }

        let deadline = self.escalation_deadline(snapshot.priority, now_ms);
        let slot = &mut self.slots[index];
        slot.escalation_deadline_ms = deadline;
        if let Some(alarm) = slot.current.as_mut() {
            alarm.silenced_until_ms = None;
            debug!(alarm_id = %alarm.alarm_id, "Silence expired, alarm re-raised");
            sink.publish(*alarm);
        }
    }

    fn resolve<S: AlarmSink>(&mut self, index: usize, now_ms: i64, sink: &mut S) {
        if let Some(snapshot) = self.transition(index, AlarmEvent::Resolve, now_ms) {
            self.finish(index, snapshot, sink);
        }
    }

    /// Publish a resolved alarm and move it into history
    fn finish<S: AlarmSink>(&mut self, index: usize, snapshot: AlarmSnapshot, sink: &mut S) {
        let slot = &mut self.slots[index];
        slot.escalation_deadline_ms = None;
        slot.clear_streak = 0;
        let resolved = match slot.current.as_mut() {
            Some(alarm) => {
                alarm.silenced_until_ms = None;
                *alarm
            }
            None => snapshot,
        };

        info!(
            alarm_id = %resolved.alarm_id,
            kind = %resolved.kind,
            revision = resolved.revision,
            "Alarm resolved"
        );
        self.history.push(resolved);
        sink.publish(resolved);
    }

    /// Apply an engine-driven event to a slot. Invalid transitions are
    /// programming errors: they assert in debug builds and are clamped
    /// (state unchanged, error logged) otherwise.
    fn transition(&mut self, index: usize, event: AlarmEvent, now_ms: i64) -> Option<AlarmSnapshot> {
        let slot = &mut self.slots[index];
        let kind = slot.kind;
        let alarm = slot.current.as_mut()?;
        match AlarmStateMachine::apply(alarm, event, now_ms) {
            Ok(_) => Some(*alarm),
            Err(err) => {
                self.record_fault(kind, err);
                None
            }
        }
    }

    fn check_transition(&mut self, kind: AlarmKind, state: AlarmState, event: AlarmEvent) -> bool {
        match AlarmStateMachine::determine_target_state(state, event) {
            Ok(_) => true,
            Err(err) => {
                self.record_fault(kind, err);
                false
            }
        }
    }

    fn record_fault(&mut self, kind: AlarmKind, err: StateMachineError) {
        self.faults += 1;
        error!(kind = %kind, error = %err, "Alarm engine refused internal transition");
        debug_assert!(false, "invalid internal alarm transition: {err}");
    }

    fn escalation_deadline(&self, priority: AlarmPriority, now_ms: i64) -> Option<i64> {
        let index = match priority {
            AlarmPriority::Low => 0,
            AlarmPriority::Medium => 1,
            AlarmPriority::High => 2,
        };
        self.escalation_ms[index].map(|timeout| now_ms + timeout)
    }
}
