//! High-precision latency tracking using HDR histogram

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigurationError;
use crate::error::{Result, VitalsError};

/// Highest trackable latency: one minute in microseconds
const MAX_TRACKABLE_MICROS: u64 = 60_000_000;

/// Latency tracker with HDR histogram.
///
/// The histogram has fixed bounds, so recording never allocates; samples
/// beyond the bound are clamped to it. Recording uses `try_lock` and skips
/// the sample if a reader holds the lock, so the recording thread never
/// waits.
#[derive(Clone)]
pub struct LatencyTracker {
    histogram: Arc<Mutex<Histogram<u64>>>,
    name: &'static str,
}

impl LatencyTracker {
    pub fn new(name: &'static str) -> Result<Self> {
        let histogram = Histogram::<u64>::new_with_bounds(1, MAX_TRACKABLE_MICROS, 3).map_err(
            |e| {
                VitalsError::Configuration(ConfigurationError::invalid_value(
                    "latency_tracker.bounds",
                    MAX_TRACKABLE_MICROS.to_string(),
                    e.to_string(),
                ))
            },
        )?;

        Ok(Self {
            histogram: Arc::new(Mutex::new(histogram)),
            name,
        })
    }

    /// Record a latency measurement
    #[inline]
    pub fn record(&self, duration: Duration) {
        let micros = (duration.as_micros() as u64).max(1);
        if let Some(mut hist) = self.histogram.try_lock() {
            hist.saturating_record(micros);
        }
    }

    /// Get latency statistics
    pub fn stats(&self) -> LatencyStats {
        let hist = self.histogram.lock();

        LatencyStats {
            name: self.name,
            count: hist.len(),
            min_us: hist.min(),
            max_us: hist.max(),
            mean_us: hist.mean(),
            p50_us: hist.value_at_quantile(0.50),
            p90_us: hist.value_at_quantile(0.90),
            p99_us: hist.value_at_quantile(0.99),
            p999_us: hist.value_at_quantile(0.999),
        }
    }

    /// Reset the histogram
    pub fn reset(&self) {
        self.histogram.lock().reset();
    }
}

impl std::fmt::Debug for LatencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyTracker")
            .field("name", &self.name)
            .finish()
    }
}

/// Latency statistics in microseconds
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LatencyStats {
    pub name: &'static str,
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
}

impl LatencyStats {
    pub fn p99(&self) -> Duration {
        Duration::from_micros(self.p99_us)
    }

    /// True when the p99 is within `budget`
    pub fn within_budget(&self, budget: Duration) -> bool {
        self.p99() <= budget
    }
}

impl std::fmt::Display for LatencyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: count={}, min={}µs, max={}µs, mean={:.2}µs, p50={}µs, p90={}µs, p99={}µs, p99.9={}µs",
            self.name,
            self.count,
            self.min_us,
            self.max_us,
            self.mean_us,
            self.p50_us,
            self.p90_us,
            self.p99_us,
            self.p999_us
        )
    }
}
