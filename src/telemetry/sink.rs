use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::error::VitalsError;
use crate::models::TelemetryBatch;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// Network collaborator unreachable; the batch is dropped
    #[error("Telemetry transport unavailable: {0}")]
    Unavailable(String),

    #[error("Telemetry batch rejected: {0}")]
    Rejected(String),

    #[error("Telemetry serialization failed: {0}")]
    Serialization(String),
}

impl From<TelemetryError> for VitalsError {
    fn from(err: TelemetryError) -> Self {
        VitalsError::Telemetry(err.to_string())
    }
}

impl From<serde_json::Error> for TelemetryError {
    fn from(err: serde_json::Error) -> Self {
        TelemetryError::Serialization(err.to_string())
    }
}

/// Network-side consumer of telemetry batches. Called only from the
/// telemetry dispatch thread, never from the real-time thread.
pub trait TelemetrySink: Send {
    fn send_batch(&mut self, batch: TelemetryBatch) -> Result<(), TelemetryError>;
}

/// Serializes each batch to JSON and logs its size
#[derive(Debug, Default)]
pub struct LoggingSink {
    bytes_sent: u64,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

impl TelemetrySink for LoggingSink {
    fn send_batch(&mut self, batch: TelemetryBatch) -> Result<(), TelemetryError> {
        let payload = serde_json::to_vec(&batch)?;
        self.bytes_sent += payload.len() as u64;
        debug!(
            batch_id = %batch.batch_id(),
            vitals = batch.vitals().len(),
            alarms = batch.alarms().len(),
            bytes = payload.len(),
            "Telemetry batch serialized"
        );
        Ok(())
    }
}

/// Keeps every batch it receives; handy for tests and local tooling
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    batches: Arc<Mutex<Vec<TelemetryBatch>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every batch collected so far
    pub fn take(&self) -> Vec<TelemetryBatch> {
        std::mem::take(&mut *self.batches.lock())
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

impl TelemetrySink for CollectingSink {
    fn send_batch(&mut self, batch: TelemetryBatch) -> Result<(), TelemetryError> {
        self.batches.lock().push(batch);
        Ok(())
    }
}
