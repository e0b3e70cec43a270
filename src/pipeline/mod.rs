//! # Pipeline
//!
//! Thread topology and lifecycle of the monitor.
//!
//! ```text
//! sensor ──ingress──▶ vitals-rt ──persistence──▶ vitals-storage ──▶ durable store
//!                       │   ▲                                          ▲
//!                       │   └──command── MonitorPipeline          retention
//!                       ├──notification──▶ consumers
//!                       └──telemetry──▶ vitals-telemetry ──▶ TelemetrySink
//! ```
//!
//! Every arrow is a pre-allocated bounded channel. [`MonitorPipeline`] owns
//! all threads; dropping it shuts them down in order and flushes.

pub mod bootstrap;
mod commands;
pub mod handle;
pub mod realtime;
pub mod storage;

pub use bootstrap::PipelineBootstrap;
pub use handle::{MonitorPipeline, PipelineStatus, ShutdownReport};
pub use realtime::RealtimeSummary;
pub use storage::StorageOutcome;
