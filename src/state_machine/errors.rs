use thiserror::Error;
use uuid::Uuid;

use super::states::AlarmState;

/// Error types for alarm state machine operations
///
/// Variants carry only `Copy` data so the real-time thread can build and log
/// them without allocating.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("Invalid alarm transition from {from} on {event}")]
    InvalidTransition {
        from: AlarmState,
        event: &'static str,
    },

    #[error("Alarm not found: {0}")]
    AlarmNotFound(Uuid),

    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: &'static str },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
