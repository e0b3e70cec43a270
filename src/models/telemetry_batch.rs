use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::alarm::AlarmSnapshot;
use super::vital_record::{SourceId, VitalRecord};
use crate::error::VitalsError;

/// A periodic telemetry payload handed to the network collaborator.
///
/// Batches move by value from the batcher to the dispatch thread and are
/// never mutated after construction, so the type deliberately does not
/// implement `Clone`.
#[derive(Debug, Serialize)]
pub struct TelemetryBatch {
    batch_id: Uuid,
    device_id: String,
    patient_id: Option<String>,
    vitals: Vec<VitalRecord>,
    alarms: Vec<AlarmSnapshot>,
    created_at: DateTime<Utc>,
}

impl TelemetryBatch {
    pub(crate) fn new(
        device_id: String,
        patient_id: Option<String>,
        vitals: Vec<VitalRecord>,
        alarms: Vec<AlarmSnapshot>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            device_id,
            patient_id,
            vitals,
            alarms,
            created_at,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn patient_id(&self) -> Option<&str> {
        self.patient_id.as_deref()
    }

    pub fn vitals(&self) -> &[VitalRecord] {
        &self.vitals
    }

    pub fn alarms(&self) -> &[AlarmSnapshot] {
        &self.alarms
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_empty(&self) -> bool {
        self.vitals.is_empty() && self.alarms.is_empty()
    }

    /// Check the batch before it leaves the device: a device id, at least
    /// one entry, and per-source chronological vitals.
    pub fn validate(&self) -> Result<(), VitalsError> {
        if self.device_id.trim().is_empty() {
            return Err(VitalsError::Validation(format!(
                "telemetry batch {} has no device id",
                self.batch_id
            )));
        }

        if self.is_empty() {
            return Err(VitalsError::Validation(format!(
                "telemetry batch {} is empty",
                self.batch_id
            )));
        }

        let mut last_seen: HashMap<SourceId, i64> = HashMap::new();
        for record in &self.vitals {
            let previous = last_seen
                .entry(record.source_id())
                .or_insert(record.timestamp_ms());
            if record.timestamp_ms() < *previous {
                return Err(VitalsError::Validation(format!(
                    "telemetry batch {} has out-of-order vitals for {}",
                    self.batch_id,
                    record.source_id()
                )));
            }
            *previous = record.timestamp_ms();
        }

        Ok(())
    }
}
