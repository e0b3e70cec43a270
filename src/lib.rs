#![allow(clippy::doc_markdown)] // Allow technical terms like SQLite, SpO2 in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Vitals Core
//!
//! Real-time vitals and alarm pipeline for a bedside patient monitor.
//!
//! ## Overview
//!
//! The core ingests physiological samples, caches them for immediate clinical
//! use, evaluates alarm conditions under a hard latency budget, and hands data
//! to a decoupled persistence and retention subsystem that can never block the
//! critical path.
//!
//! ## Architecture
//!
//! ```text
//! SampleIngress → VitalsCache / WaveformCache → AlarmEngine
//!                                                  ├─▶ notifications
//!                                                  ├─▶ TelemetryBatcher → TelemetrySink
//!                                                  └─▶ PersistenceScheduler → DurableStore ← RetentionService
//! ```
//!
//! The real-time thread (`vitals-rt`) owns the cache write side, the alarm
//! engine and the telemetry batcher. The storage thread (`vitals-storage`)
//! runs a current-thread tokio runtime for the scheduler and retention. All
//! cross-thread traffic uses pre-allocated bounded channels with an explicit
//! overflow policy per channel.
//!
//! ## Module Organization
//!
//! - [`models`] - Vital records, waveform samples, alarm snapshots, telemetry batches
//! - [`cache`] - Bounded vitals and waveform caches
//! - [`state_machine`] - Alarm lifecycle transitions
//! - [`alarm`] - Threshold evaluation, escalation, hysteresis
//! - [`channels`] - Bounded channels with overflow policies
//! - [`ingress`] - Sensor-facing sample validation
//! - [`telemetry`] - Batch assembly and dispatch
//! - [`persistence`] - Durable store contract, flush scheduling, retention
//! - [`notification`] - Alarm and vitals notification stream
//! - [`monitoring`] - Health indicator and latency histogram
//! - [`pipeline`] - Thread wiring and lifecycle
//! - [`config`] - Layered configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vitals_core::config::ConfigManager;
//! use vitals_core::models::{SourceId, VitalRecord};
//! use vitals_core::pipeline::PipelineBootstrap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! vitals_core::logging::init_structured_logging(&manager.config().logging);
//!
//! let mut pipeline = PipelineBootstrap::from_config_manager(&manager).start()?;
//! let mut ingress = pipeline.take_ingress().ok_or("ingress already taken")?;
//! ingress.submit_vital(VitalRecord::measured(SourceId(1), 1_700_000_000_000, 72.0, 98.0, 14.0))?;
//!
//! let report = pipeline.shutdown();
//! println!("final flush: {:?}", report.final_flush);
//! # Ok(())
//! # }
//! ```

pub mod alarm;
pub mod cache;
pub mod channels;
pub mod config;
pub mod constants;
pub mod error;
pub mod ingress;
pub mod logging;
pub mod models;
pub mod monitoring;
pub mod notification;
pub mod persistence;
pub mod pipeline;
pub mod state_machine;
pub mod telemetry;
pub mod utils;

pub use alarm::{AlarmEngine, AlarmSink};
pub use cache::{VitalsCache, WaveformCache, WaveformCaches};
pub use config::{ConfigManager, MonitorConfig};
pub use error::{Result, VitalsError};
pub use ingress::{SampleIngress, ScriptedSensorSource, SensorEvent, SensorSource};
pub use models::{
    ActorRef, AlarmKind, AlarmPriority, AlarmSnapshot, SourceId, TelemetryBatch, VitalKind,
    VitalRecord, WaveformChannel, WaveformSample,
};
pub use monitoring::{HealthMonitor, SystemStatus};
pub use notification::{Notification, NotificationEnvelope, NotificationReceiver};
pub use persistence::{DurableStore, InMemoryStore, Repository};
pub use pipeline::{MonitorPipeline, PipelineBootstrap};
pub use state_machine::AlarmState;
pub use telemetry::{TelemetryError, TelemetrySink};
