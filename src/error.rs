use thiserror::Error;

use crate::config::ConfigurationError;
use crate::persistence::StorageError;
use crate::state_machine::StateMachineError;

/// Crate-wide error taxonomy for the vitals pipeline.
///
/// The real-time thread never returns these across a thread boundary; it counts
/// and logs them. Storage-thread errors are retried locally.
#[derive(Debug, Error)]
pub enum VitalsError {
    /// Malformed or out-of-order sample, rejected at ingress
    #[error("Validation error: {0}")]
    Validation(String),

    /// A bounded channel was full and its overflow policy refused the item
    #[error("Capacity pressure on channel '{channel}'")]
    CapacityPressure { channel: &'static str },

    /// Lock or timeout on the durable store, retried on the next cycle
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    /// Disk or size ceiling reached, triggers emergency retention
    #[error("Storage exhausted: {0}")]
    StorageExhausted(String),

    /// Invalid configuration detected at startup
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    StateTransition(#[from] StateMachineError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// A pipeline thread is gone or the pipeline is shutting down
    #[error("Pipeline shut down: {0}")]
    Shutdown(String),
}

impl From<StorageError> for VitalsError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Exhausted(msg) => VitalsError::StorageExhausted(msg),
            other => VitalsError::TransientStorage(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, VitalsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_classification() {
        let exhausted: VitalsError = StorageError::Exhausted("disk full".to_string()).into();
        assert!(matches!(exhausted, VitalsError::StorageExhausted(_)));

        let transient: VitalsError = StorageError::Transient("database locked".to_string()).into();
        assert!(matches!(transient, VitalsError::TransientStorage(_)));
    }

    #[test]
    fn test_display_messages() {
        let err = VitalsError::CapacityPressure {
            channel: "persistence",
        };
        assert_eq!(err.to_string(), "Capacity pressure on channel 'persistence'");

        let err = VitalsError::Validation("heart rate is NaN".to_string());
        assert_eq!(err.to_string(), "Validation error: heart rate is NaN");
    }
}
