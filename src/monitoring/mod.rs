//! # Monitoring
//!
//! Health indicators and latency metrics shared by all pipeline threads.

pub mod health;
pub mod latency;

pub use health::{DegradedReason, HealthMonitor, HealthSnapshot, SystemStatus};
pub use latency::{LatencyStats, LatencyTracker};
