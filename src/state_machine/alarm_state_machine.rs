use super::{
    errors::{StateMachineError, StateMachineResult},
    events::AlarmEvent,
    states::AlarmState,
};
use crate::models::AlarmSnapshot;

/// Transition rules for a single alarm instance.
///
/// The machine is stateless; the current state lives in the snapshot owned
/// by the alarm engine. Transitions never allocate.
pub struct AlarmStateMachine;

impl AlarmStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: AlarmState,
        event: AlarmEvent,
    ) -> StateMachineResult<AlarmState> {
        let target = match (current_state, event) {
            // A cleared slot starts a fresh instance
            (AlarmState::Inactive | AlarmState::Resolved, AlarmEvent::Raise) => AlarmState::Raised,

            (AlarmState::Raised, AlarmEvent::Escalate) => AlarmState::Escalated,

            (AlarmState::Raised | AlarmState::Escalated, AlarmEvent::Acknowledge) => {
                AlarmState::Acknowledged
            }

            (AlarmState::Raised | AlarmState::Acknowledged, AlarmEvent::Silence) => {
                AlarmState::Silenced
            }

            (AlarmState::Silenced, AlarmEvent::SilenceExpired { condition_active }) => {
                if condition_active {
                    AlarmState::Raised
                } else {
                    AlarmState::Resolved
                }
            }

            (state, AlarmEvent::Resolve) if state.is_active() => AlarmState::Resolved,

            (from, event) => {
                return Err(StateMachineError::InvalidTransition {
                    from,
                    event: event.event_type(),
                })
            }
        };

        Ok(target)
    }

    /// Apply an event to a snapshot, bumping its revision on success.
    ///
    /// On error the snapshot is left untouched.
    pub fn apply(
        snapshot: &mut AlarmSnapshot,
        event: AlarmEvent,
        now_ms: i64,
    ) -> StateMachineResult<AlarmState> {
        let target = Self::determine_target_state(snapshot.state, event)?;
        snapshot.state = target;
        snapshot.revision = snapshot.revision.saturating_add(1);
        snapshot.updated_at_ms = now_ms;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlarmKind, AlarmPriority, RecordRef, SourceId};

    const ALL_STATES: [AlarmState; 6] = [
        AlarmState::Inactive,
        AlarmState::Raised,
        AlarmState::Escalated,
        AlarmState::Acknowledged,
        AlarmState::Silenced,
        AlarmState::Resolved,
    ];

    fn snapshot() -> AlarmSnapshot {
        AlarmSnapshot::raised(
            AlarmKind::HeartRateHigh,
            AlarmPriority::High,
            RecordRef {
                source_id: SourceId(1),
                timestamp_ms: 1_000,
            },
            110.0,
            100.0,
            1_000,
        )
    }

    #[test]
    fn test_state_transitions() {
        let target = |state, event| AlarmStateMachine::determine_target_state(state, event);

        assert_eq!(
            target(AlarmState::Inactive, AlarmEvent::Raise).unwrap(),
            AlarmState::Raised
        );
        assert_eq!(
            target(AlarmState::Resolved, AlarmEvent::Raise).unwrap(),
            AlarmState::Raised
        );
        assert_eq!(
            target(AlarmState::Raised, AlarmEvent::Escalate).unwrap(),
            AlarmState::Escalated
        );
        assert_eq!(
            target(AlarmState::Escalated, AlarmEvent::Acknowledge).unwrap(),
            AlarmState::Acknowledged
        );
        assert_eq!(
            target(AlarmState::Acknowledged, AlarmEvent::Silence).unwrap(),
            AlarmState::Silenced
        );
        assert_eq!(
            target(
                AlarmState::Silenced,
                AlarmEvent::SilenceExpired {
                    condition_active: true
                }
            )
            .unwrap(),
            AlarmState::Raised
        );
        assert_eq!(
            target(
                AlarmState::Silenced,
                AlarmEvent::SilenceExpired {
                    condition_active: false
                }
            )
            .unwrap(),
            AlarmState::Resolved
        );
    }

    #[test]
    fn test_invalid_transitions() {
        let target = |state, event| AlarmStateMachine::determine_target_state(state, event);

        // Escalation happens at most once
        assert!(target(AlarmState::Escalated, AlarmEvent::Escalate).is_err());
        // Escalated alarms must be acknowledged before silencing
        assert!(target(AlarmState::Escalated, AlarmEvent::Silence).is_err());
        assert!(target(AlarmState::Acknowledged, AlarmEvent::Acknowledge).is_err());
        assert!(target(AlarmState::Raised, AlarmEvent::Raise).is_err());
        assert!(target(AlarmState::Inactive, AlarmEvent::Resolve).is_err());
        assert!(target(AlarmState::Resolved, AlarmEvent::Resolve).is_err());
        assert_eq!(
            target(AlarmState::Resolved, AlarmEvent::Acknowledge),
            Err(StateMachineError::InvalidTransition {
                from: AlarmState::Resolved,
                event: "acknowledge",
            })
        );
    }

    #[test]
    fn test_every_active_state_resolves() {
        for state in ALL_STATES {
            let result = AlarmStateMachine::determine_target_state(state, AlarmEvent::Resolve);
            assert_eq!(result.is_ok(), state.is_active(), "state {state}");
        }
    }

    #[test]
    fn test_terminal_state_accepts_only_raise() {
        let events = [
            AlarmEvent::Escalate,
            AlarmEvent::Acknowledge,
            AlarmEvent::Silence,
            AlarmEvent::SilenceExpired {
                condition_active: true,
            },
            AlarmEvent::Resolve,
        ];
        for event in events {
            assert!(AlarmStateMachine::determine_target_state(AlarmState::Resolved, event).is_err());
        }
    }

    #[test]
    fn test_apply_bumps_revision() {
        let mut alarm = snapshot();
        let state = AlarmStateMachine::apply(&mut alarm, AlarmEvent::Acknowledge, 2_000).unwrap();
        assert_eq!(state, AlarmState::Acknowledged);
        assert_eq!(alarm.revision(), 2);
        assert_eq!(alarm.updated_at_ms(), 2_000);
    }

    #[test]
    fn test_failed_apply_leaves_snapshot_unchanged() {
        let mut alarm = snapshot();
        let before = alarm;
        assert!(AlarmStateMachine::apply(&mut alarm, AlarmEvent::Raise, 2_000).is_err());
        assert_eq!(alarm, before);
    }
}
