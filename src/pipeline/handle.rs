use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::commands::CommandClient;
use super::realtime::RealtimeSummary;
use super::storage::StorageOutcome;
use crate::cache::{VitalsCache, WaveformCaches};
use crate::error::{Result, VitalsError};
use crate::logging::log_pipeline_event;
use crate::ingress::{SampleIngress, SensorSource};
use crate::models::{ActorRef, AlarmSnapshot};
use crate::monitoring::{HealthMonitor, HealthSnapshot, LatencyStats, LatencyTracker, SystemStatus};
use crate::notification::NotificationReceiver;
use crate::persistence::FlushReport;
use crate::telemetry::DispatchSummary;

/// Point-in-time view of the running pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub status: SystemStatus,
    pub counters: HealthSnapshot,
    pub cached_vitals: usize,
    pub latency: LatencyStats,
}

/// What each thread reported when the pipeline stopped
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub realtime: Option<RealtimeSummary>,
    pub final_flush: Option<FlushReport>,
    pub telemetry: Option<DispatchSummary>,
    /// Threads that panicked or whose final step failed
    pub failures: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Thread handles owned by the pipeline
#[derive(Debug)]
pub(crate) struct PipelineThreads {
    pub(crate) realtime: JoinHandle<RealtimeSummary>,
    pub(crate) realtime_stop: Arc<AtomicBool>,
    pub(crate) storage: JoinHandle<StorageOutcome>,
    pub(crate) storage_shutdown: watch::Sender<bool>,
    pub(crate) telemetry: Option<JoinHandle<DispatchSummary>>,
}

/// Owner of every pipeline thread and the caller's entry point.
///
/// Dropping the pipeline performs the same graceful shutdown as
/// [`MonitorPipeline::shutdown`]: the sensor source stops, the real-time
/// thread drains its queues, the storage thread runs a final flush and the
/// telemetry dispatcher delivers what is left.
pub struct MonitorPipeline {
    vitals: Arc<VitalsCache>,
    waveforms: Arc<WaveformCaches>,
    health: Arc<HealthMonitor>,
    latency: LatencyTracker,
    commands: CommandClient,
    ingress: Option<SampleIngress>,
    notifications: Option<NotificationReceiver>,
    source: Option<Box<dyn SensorSource>>,
    threads: Option<PipelineThreads>,
}

impl std::fmt::Debug for MonitorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorPipeline")
            .field("running", &self.is_running())
            .field("source_attached", &self.source.is_some())
            .field("cached_vitals", &self.vitals.len())
            .finish_non_exhaustive()
    }
}

impl MonitorPipeline {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        vitals: Arc<VitalsCache>,
        waveforms: Arc<WaveformCaches>,
        health: Arc<HealthMonitor>,
        latency: LatencyTracker,
        commands: CommandClient,
        ingress: SampleIngress,
        notifications: NotificationReceiver,
        threads: PipelineThreads,
    ) -> Self {
        Self {
            vitals,
            waveforms,
            health,
            latency,
            commands,
            ingress: Some(ingress),
            notifications: Some(notifications),
            source: None,
            threads: Some(threads),
        }
    }

    /// Take the pipeline's single sample ingress. `None` once taken or once
    /// a sensor source was attached.
    pub fn take_ingress(&mut self) -> Option<SampleIngress> {
        self.ingress.take()
    }

    /// Hand the ingress to `source` and start it. The source is stopped
    /// first on shutdown.
    pub fn attach_source(&mut self, mut source: Box<dyn SensorSource>) -> Result<()> {
        let ingress = self
            .ingress
            .take()
            .ok_or_else(|| VitalsError::Validation("sample ingress already taken".to_string()))?;
        source.start(ingress)?;
        self.source = Some(source);
        Ok(())
    }

    /// Take the notification stream. There is one consumer per pipeline.
    pub fn take_notifications(&mut self) -> Option<NotificationReceiver> {
        self.notifications.take()
    }

    pub fn acknowledge(&self, alarm_id: Uuid, actor: ActorRef) -> Result<AlarmSnapshot> {
        self.commands.acknowledge(alarm_id, actor)
    }

    /// Silence a live alarm; the duration is capped at the configured maximum
    pub fn silence(&self, alarm_id: Uuid, duration: Duration) -> Result<AlarmSnapshot> {
        self.commands.silence(alarm_id, duration)
    }

    pub fn active_alarms(&self) -> Result<Vec<AlarmSnapshot>> {
        self.commands.active_alarms()
    }

    /// Resolved alarms raised within `[start_ms, end_ms]`, newest first
    pub fn alarm_history(&self, start_ms: i64, end_ms: i64) -> Result<Vec<AlarmSnapshot>> {
        self.commands.history(start_ms, end_ms)
    }

    pub fn vitals(&self) -> &Arc<VitalsCache> {
        &self.vitals
    }

    pub fn waveforms(&self) -> &Arc<WaveformCaches> {
        &self.waveforms
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// User-facing degraded indicator
    pub fn is_degraded(&self) -> bool {
        self.health.is_degraded()
    }

    pub fn latency_stats(&self) -> LatencyStats {
        self.latency.stats()
    }

    pub fn is_running(&self) -> bool {
        self.threads.is_some()
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            running: self.is_running(),
            status: self.health.status(),
            counters: self.health.snapshot(),
            cached_vitals: self.vitals.len(),
            latency: self.latency.stats(),
        }
    }

    /// Stop every thread in dependency order and report what each did
    pub fn shutdown(mut self) -> ShutdownReport {
        self.stop()
    }

    fn stop(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let Some(threads) = self.threads.take() else {
            return report;
        };
        info!("Pipeline shutdown requested");

        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        self.ingress = None;

        threads.realtime_stop.store(true, Ordering::Release);
        match threads.realtime.join() {
            Ok(summary) => report.realtime = Some(summary),
            Err(_) => report.failures.push("real-time thread panicked".to_string()),
        }

        // The real-time thread has published its last item; the final flush
        // now sees everything
        let _ = threads.storage_shutdown.send(true);
        match threads.storage.join() {
            Ok(Ok(flush)) => report.final_flush = Some(flush),
            Ok(Err(err)) => report.failures.push(format!("final flush failed: {err}")),
            Err(_) => report.failures.push("storage thread panicked".to_string()),
        }

        if let Some(telemetry) = threads.telemetry {
            match telemetry.join() {
                Ok(summary) => report.telemetry = Some(summary),
                Err(_) => report.failures.push("telemetry thread panicked".to_string()),
            }
        }

        if report.is_clean() {
            log_pipeline_event("pipeline", "shutdown", "completed", None);
        } else {
            warn!(failures = ?report.failures, "Pipeline stopped with failures");
            log_pipeline_event(
                "pipeline",
                "shutdown",
                "failed",
                Some(&report.failures.join("; ")),
            );
        }
        report
    }
}

impl Drop for MonitorPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
