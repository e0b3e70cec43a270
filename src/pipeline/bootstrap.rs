//! # Pipeline Bootstrap
//!
//! Builds every component from a validated [`MonitorConfig`], wires the
//! bounded channels between them and starts the threads in dependency order:
//! storage first (so a store that cannot open fails the start), then the
//! telemetry dispatcher, then the real-time loop.
//!
//! ```rust,no_run
//! use vitals_core::config::{MonitorConfig, StorageBackend};
//! use vitals_core::pipeline::PipelineBootstrap;
//!
//! # fn main() -> vitals_core::Result<()> {
//! let mut config = MonitorConfig::default();
//! config.storage.backend = StorageBackend::Memory;
//!
//! let mut pipeline = PipelineBootstrap::new(config).start()?;
//! let ingress = pipeline.take_ingress().expect("fresh pipeline");
//! let notifications = pipeline.take_notifications().expect("fresh pipeline");
//! # drop((ingress, notifications));
//! let report = pipeline.shutdown();
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use super::commands::CommandClient;
use super::handle::{MonitorPipeline, PipelineThreads};
use super::realtime::{RealtimeLoop, RealtimeParts, TelemetryOutlet};
use super::storage::{spawn_storage, StorageParts};
use crate::alarm::AlarmEngine;
use crate::cache::{VitalsCache, WaveformCaches};
use crate::channels::bounded;
use crate::config::{ConfigManager, MonitorConfig};
use crate::constants::{channels, realtime};
use crate::error::Result;
use crate::ingress::SampleIngress;
use crate::monitoring::{HealthMonitor, LatencyTracker};
use crate::notification::{NotificationPublisher, NotificationReceiver};
use crate::persistence::DurableStore;
use crate::telemetry::{spawn_dispatcher, LoggingSink, TelemetryBatcher, TelemetrySink};
use crate::utils::{Clock, SystemClock};

/// Dispatcher wake-up interval while no batch is queued
const TELEMETRY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Collaborators and configuration for one pipeline
pub struct PipelineBootstrap {
    config: MonitorConfig,
    store: Option<Arc<dyn DurableStore>>,
    clock: Arc<dyn Clock>,
    telemetry_sink: Option<Box<dyn TelemetrySink>>,
}

impl std::fmt::Debug for PipelineBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBootstrap")
            .field("device_id", &self.config.device.device_id)
            .field("store_injected", &self.store.is_some())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl PipelineBootstrap {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            store: None,
            clock: Arc::new(SystemClock),
            telemetry_sink: None,
        }
    }

    /// Use the configuration a [`ConfigManager`] resolved
    pub fn from_config_manager(manager: &ConfigManager) -> Self {
        Self::new(manager.config().clone())
    }

    /// Use an already opened store instead of the configured backend
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deliver telemetry batches to `sink`; defaults to [`LoggingSink`]
    pub fn with_telemetry_sink(mut self, sink: Box<dyn TelemetrySink>) -> Self {
        self.telemetry_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Validate the configuration and start every pipeline thread
    pub fn start(self) -> Result<MonitorPipeline> {
        let Self {
            config,
            store,
            clock,
            telemetry_sink,
        } = self;
        config.validate()?;

        let health = Arc::new(HealthMonitor::new());
        let latency = LatencyTracker::new("ingest_to_publish")?;
        let vitals = Arc::new(VitalsCache::new(
            config.cache.vitals_capacity,
            config.cache.max_sources,
        ));
        let waveforms = Arc::new(WaveformCaches::new(
            config.cache.waveform_window_seconds,
            config.cache.ecg_sample_rate_hz,
            config.cache.pleth_sample_rate_hz,
            config.cache.resp_sample_rate_hz,
        ));

        let (ingress_tx, ingress_rx) = bounded(channels::INGRESS, config.channels.ingress);
        let (persistence_tx, persistence_rx) =
            bounded(channels::PERSISTENCE, config.channels.persistence);
        let (notification_tx, notification_rx) =
            bounded(channels::NOTIFICATION, config.channels.notification);
        let (command_tx, command_rx) = bounded(channels::COMMAND, config.channels.command);

        let (storage_shutdown, storage_shutdown_rx) = watch::channel(false);
        let storage = spawn_storage(StorageParts {
            persistence: config.persistence.clone(),
            retention: config.retention.clone(),
            storage: config.storage.clone(),
            store,
            receiver: persistence_rx,
            cache: Arc::clone(&vitals),
            health: Arc::clone(&health),
            clock: Arc::clone(&clock),
            shutdown: storage_shutdown_rx,
        })?;

        let (telemetry_outlet, telemetry_thread) = if config.telemetry.enabled {
            let (telemetry_tx, telemetry_rx) =
                bounded(channels::TELEMETRY, config.channels.telemetry);
            let sink = telemetry_sink.unwrap_or_else(|| Box::new(LoggingSink::new()));
            let thread = spawn_dispatcher(
                telemetry_rx,
                sink,
                Arc::clone(&health),
                TELEMETRY_POLL_INTERVAL,
            );
            let thread = match thread {
                Ok(thread) => thread,
                Err(err) => {
                    let _ = storage_shutdown.send(true);
                    let _ = storage.join();
                    return Err(err);
                }
            };
            let outlet = TelemetryOutlet {
                batcher: TelemetryBatcher::new(&config.device, &config.telemetry),
                sender: telemetry_tx,
            };
            (Some(outlet), Some(thread))
        } else {
            (None, None)
        };

        let realtime_stop = Arc::new(AtomicBool::new(false));
        let realtime = RealtimeLoop::new(RealtimeParts {
            tick_interval: config.realtime.tick_interval(),
            resync_interval: config.alarms.resync_interval(),
            latency_budget: config.realtime.latency_budget(),
            redelivery_capacity: realtime::ALARM_REDELIVERY_CAPACITY,
            ingress: ingress_rx,
            commands: command_rx,
            vitals: Arc::clone(&vitals),
            waveforms: Arc::clone(&waveforms),
            engine: AlarmEngine::new(&config.alarms),
            notifications: NotificationPublisher::new(notification_tx, Arc::clone(&health)),
            persistence: persistence_tx,
            telemetry: telemetry_outlet,
            health: Arc::clone(&health),
            latency: latency.clone(),
            clock,
            stop: Arc::clone(&realtime_stop),
        })
        .spawn();
        let realtime = match realtime {
            Ok(realtime) => realtime,
            Err(err) => {
                // The loop was dropped with its senders, so the telemetry
                // dispatcher is already winding down
                let _ = storage_shutdown.send(true);
                let _ = storage.join();
                if let Some(thread) = telemetry_thread {
                    let _ = thread.join();
                }
                return Err(err);
            }
        };

        info!(
            device_id = %config.device.device_id,
            backend = ?config.storage.backend,
            telemetry = config.telemetry.enabled,
            "Vitals pipeline started"
        );

        Ok(MonitorPipeline::new(
            vitals,
            waveforms,
            Arc::clone(&health),
            latency,
            CommandClient::new(command_tx, health.clone()),
            SampleIngress::new(ingress_tx, health),
            NotificationReceiver::new(notification_rx),
            PipelineThreads {
                realtime,
                realtime_stop,
                storage,
                storage_shutdown,
                telemetry: telemetry_thread,
            },
        ))
    }
}
