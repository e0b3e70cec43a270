use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::channels::{BoundedSender, ChannelError, SendOutcome};
use crate::error::{Result, VitalsError};
use crate::models::{SourceId, VitalRecord, WaveformSample};
use crate::monitoring::HealthMonitor;

/// A sample as delivered by a sensor source
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    Vital(VitalRecord),
    Waveform(WaveformSample),
}

/// A validated sample on its way to the real-time thread
#[derive(Debug, Clone, Copy)]
pub struct IngressEvent {
    pub event: SensorEvent,
    /// When the sample entered the pipeline, for end-to-end latency
    pub received_at: Instant,
}

/// Producer side of the sensor-to-real-time channel.
///
/// Validates every sample before it crosses threads, so malformed data never
/// reaches the caches or the alarm engine. There is exactly one ingress per
/// pipeline; it is deliberately not `Clone`.
#[derive(Debug)]
pub struct SampleIngress {
    sender: BoundedSender<IngressEvent>,
    health: Arc<HealthMonitor>,
    last_timestamp: HashMap<SourceId, i64>,
    accepted: u64,
    rejected: u64,
}

impl SampleIngress {
    pub(crate) fn new(sender: BoundedSender<IngressEvent>, health: Arc<HealthMonitor>) -> Self {
        Self {
            sender,
            health,
            last_timestamp: HashMap::new(),
            accepted: 0,
            rejected: 0,
        }
    }

    /// Validate and forward a vital record
    pub fn submit_vital(&mut self, record: VitalRecord) -> Result<()> {
        if let Err(err) = record.validate() {
            return Err(self.reject(err));
        }

        let source_id = record.source_id();
        if let Some(&last) = self.last_timestamp.get(&source_id) {
            if record.timestamp_ms() < last {
                return Err(self.reject(VitalsError::Validation(format!(
                    "{source_id} timestamp {} precedes {last}",
                    record.timestamp_ms()
                ))));
            }
        }

        self.forward(SensorEvent::Vital(record))?;
        self.last_timestamp.insert(source_id, record.timestamp_ms());
        Ok(())
    }

    /// Validate and forward a waveform sample
    pub fn submit_waveform(&mut self, sample: WaveformSample) -> Result<()> {
        if !sample.is_well_formed() {
            return Err(self.reject(VitalsError::Validation(format!(
                "malformed {} sample at {}",
                sample.channel(),
                sample.timestamp_ms()
            ))));
        }
        self.forward(SensorEvent::Waveform(sample))
    }

    pub fn submit(&mut self, event: SensorEvent) -> Result<()> {
        match event {
            SensorEvent::Vital(record) => self.submit_vital(record),
            SensorEvent::Waveform(sample) => self.submit_waveform(sample),
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    fn forward(&mut self, event: SensorEvent) -> Result<()> {
        let item = IngressEvent {
            event,
            received_at: Instant::now(),
        };
        match self.sender.send(item) {
            Ok(SendOutcome::Delivered) => {}
            Ok(SendOutcome::DeliveredAfterEviction { evicted }) => {
                self.health
                    .record_channel_drop(self.sender.name(), evicted as u64);
            }
            Err(ChannelError::Full(_)) => {
                self.health.record_channel_drop(self.sender.name(), 1);
                return Err(VitalsError::CapacityPressure {
                    channel: self.sender.name(),
                });
            }
            Err(ChannelError::Disconnected(_)) => {
                return Err(VitalsError::Shutdown(
                    "real-time thread is no longer receiving samples".to_string(),
                ));
            }
        }
        self.accepted += 1;
        Ok(())
    }

    fn reject(&mut self, err: VitalsError) -> VitalsError {
        self.rejected += 1;
        self.health.record_validation_reject();
        // First rejection and every 100th after it
        if self.rejected % 100 == 1 {
            warn!(rejected = self.rejected, error = %err, "Sample rejected at ingress");
        }
        err
    }
}
