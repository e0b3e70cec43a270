//! # Telemetry
//!
//! Periodic batches of vitals and alarm snapshots for the network
//! collaborator. The batcher runs on the real-time thread; delivery happens
//! on a separate dispatch thread so a slow sink never stalls alarms.

pub mod batcher;
pub mod dispatch;
pub mod sink;

pub use batcher::TelemetryBatcher;
pub use dispatch::{dispatch_batch, spawn_dispatcher, DispatchSummary};
pub use sink::{CollectingSink, LoggingSink, TelemetryError, TelemetrySink};
