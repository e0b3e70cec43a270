use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

use super::sink::TelemetrySink;
use crate::channels::{BoundedReceiver, RecvTimeoutError};
use crate::constants::threads;
use crate::error::{Result, VitalsError};
use crate::logging::log_error;
use crate::models::TelemetryBatch;
use crate::monitoring::HealthMonitor;

/// Counts reported by the dispatch thread when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub sent: u64,
    pub failed: u64,
    pub invalid: u64,
}

/// Hand one batch to the sink, recording the outcome on the health monitor
pub fn dispatch_batch(
    sink: &mut dyn TelemetrySink,
    batch: TelemetryBatch,
    health: &HealthMonitor,
    summary: &mut DispatchSummary,
) {
    if let Err(err) = batch.validate() {
        summary.invalid += 1;
        log_error("telemetry", "validate", &err.to_string(), None);
        return;
    }

    let batch_id = batch.batch_id();
    match sink.send_batch(batch) {
        Ok(()) => {
            summary.sent += 1;
            health.record_telemetry_result(true);
            debug!(%batch_id, "Telemetry batch delivered");
        }
        Err(err) => {
            summary.failed += 1;
            health.record_telemetry_result(false);
            log_error("telemetry", "send_batch", &err.to_string(), Some(&batch_id.to_string()));
        }
    }
}

/// Run the telemetry dispatch loop on its own thread. The loop ends once the
/// real-time thread drops its sender and every queued batch is delivered.
pub fn spawn_dispatcher(
    receiver: BoundedReceiver<TelemetryBatch>,
    mut sink: Box<dyn TelemetrySink>,
    health: Arc<HealthMonitor>,
    poll_interval: Duration,
) -> Result<JoinHandle<DispatchSummary>> {
    std::thread::Builder::new()
        .name(threads::TELEMETRY.to_string())
        .spawn(move || {
            let mut summary = DispatchSummary::default();
            info!("Telemetry dispatcher started");
            loop {
                match receiver.recv_timeout(poll_interval) {
                    Ok(batch) => dispatch_batch(sink.as_mut(), batch, &health, &mut summary),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            info!(
                sent = summary.sent,
                failed = summary.failed,
                invalid = summary.invalid,
                "Telemetry dispatcher stopped"
            );
            summary
        })
        .map_err(|e| VitalsError::Shutdown(format!("failed to spawn telemetry thread: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{bounded, OverflowPolicy};
    use crate::config::ChannelConfig;
    use crate::constants::channels;
    use crate::models::{SourceId, VitalRecord};
    use crate::telemetry::{CollectingSink, TelemetryError};
    use chrono::Utc;

    struct FailingSink;

    impl TelemetrySink for FailingSink {
        fn send_batch(&mut self, _batch: TelemetryBatch) -> std::result::Result<(), TelemetryError> {
            Err(TelemetryError::Unavailable("offline".to_string()))
        }
    }

    fn batch(device_id: &str) -> TelemetryBatch {
        TelemetryBatch::new(
            device_id.to_string(),
            None,
            vec![VitalRecord::measured(SourceId(1), 1_000, 60.0, 99.0, 12.0)],
            Vec::new(),
            Utc::now(),
        )
    }

    #[test]
    fn test_dispatcher_drains_then_exits() {
        let (tx, rx) = bounded(channels::TELEMETRY, ChannelConfig::new(4, OverflowPolicy::DropOldest));
        let sink = CollectingSink::new();
        let health = Arc::new(HealthMonitor::new());
        let handle = spawn_dispatcher(
            rx,
            Box::new(sink.clone()),
            Arc::clone(&health),
            Duration::from_millis(5),
        )
        .unwrap();

        tx.send(batch("bed-1")).unwrap();
        tx.send(batch("")).unwrap();
        drop(tx);

        let summary = handle.join().unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.invalid, 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_sink_failure_marks_degraded() {
        let health = HealthMonitor::new();
        let mut summary = DispatchSummary::default();
        dispatch_batch(&mut FailingSink, batch("bed-1"), &health, &mut summary);
        assert_eq!(summary.failed, 1);
        assert!(health.is_degraded());
        assert_eq!(health.snapshot().telemetry_failures, 1);
    }
}
