//! # Monitor Configuration
//!
//! Typed configuration for every pipeline component. Values are read once at
//! startup and are immutable afterwards; components receive the section they
//! need by value or reference at construction.
//!
//! ## Sources
//!
//! Layered by [`ConfigManager`], later sources overriding earlier ones:
//!
//! 1. Built-in defaults (`MonitorConfig::default()`)
//! 2. `config/vitals.toml` (optional)
//! 3. `config/{environment}.toml` (optional, environment from `VITALS_ENV`)
//! 4. `VITALS__SECTION__KEY` environment variables
//!
//! ## Usage
//!
//! ```rust,no_run
//! use vitals_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let capacity = manager.config().cache.vitals_capacity;
//! let flush_every = manager.config().persistence.flush_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::channels::OverflowPolicy;
use crate::constants;
use crate::models::{AlarmPriority, VitalKind};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration for the vitals pipeline
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub device: DeviceConfig,
    pub cache: CacheConfig,
    pub alarms: AlarmsConfig,
    pub channels: ChannelsConfig,
    pub telemetry: TelemetryConfig,
    pub persistence: PersistenceConfig,
    pub retention: RetentionConfig,
    pub realtime: RealtimeConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Identity of the monitor that produced the data
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_id: String,
    pub patient_id: Option<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "bedside-monitor".to_string(),
            patient_id: None,
        }
    }
}

/// Sizing of the in-memory caches
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub vitals_capacity: usize,
    pub max_sources: usize,
    pub waveform_window_seconds: u32,
    pub ecg_sample_rate_hz: u32,
    pub pleth_sample_rate_hz: u32,
    pub resp_sample_rate_hz: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            vitals_capacity: constants::cache::DEFAULT_VITALS_CAPACITY,
            max_sources: constants::cache::DEFAULT_MAX_SOURCES,
            waveform_window_seconds: constants::cache::DEFAULT_WAVEFORM_WINDOW_SECONDS,
            ecg_sample_rate_hz: constants::cache::DEFAULT_ECG_SAMPLE_RATE_HZ,
            pleth_sample_rate_hz: constants::cache::DEFAULT_PLETH_SAMPLE_RATE_HZ,
            resp_sample_rate_hz: constants::cache::DEFAULT_RESP_SAMPLE_RATE_HZ,
        }
    }
}

/// Alarm limits for one vital sign.
///
/// A value strictly above `high` or strictly below `low` violates the limit.
/// A violation clears once the value is back inside the limit by at least
/// `clear_band` for the configured number of consecutive samples.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThresholdConfig {
    pub vital: VitalKind,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    pub priority: AlarmPriority,
    /// Overrides `alarms.hysteresis_samples` for this vital
    #[serde(default)]
    pub hysteresis_samples: Option<u32>,
    #[serde(default)]
    pub clear_band: f64,
}

impl ThresholdConfig {
    pub fn new(vital: VitalKind, low: Option<f64>, high: Option<f64>, priority: AlarmPriority) -> Self {
        Self {
            vital,
            low,
            high,
            priority,
            hysteresis_samples: None,
            clear_band: 0.0,
        }
    }
}

/// Alarm evaluation policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlarmsConfig {
    pub thresholds: Vec<ThresholdConfig>,
    pub hysteresis_samples: u32,
    pub high_escalation_seconds: u64,
    pub medium_escalation_seconds: u64,
    /// Low-priority alarms do not escalate unless this is set
    pub low_escalation_seconds: Option<u64>,
    pub max_silence_seconds: u64,
    pub history_capacity: usize,
    pub resync_interval_seconds: u64,
}

impl Default for AlarmsConfig {
    fn default() -> Self {
        Self {
            thresholds: vec![
                ThresholdConfig::new(
                    VitalKind::HeartRate,
                    Some(50.0),
                    Some(120.0),
                    AlarmPriority::High,
                ),
                ThresholdConfig::new(VitalKind::Spo2, Some(90.0), None, AlarmPriority::High),
                ThresholdConfig::new(
                    VitalKind::RespirationRate,
                    Some(8.0),
                    Some(30.0),
                    AlarmPriority::Medium,
                ),
            ],
            hysteresis_samples: constants::alarms::DEFAULT_HYSTERESIS_SAMPLES,
            high_escalation_seconds: constants::alarms::DEFAULT_HIGH_ESCALATION_SECONDS,
            medium_escalation_seconds: constants::alarms::DEFAULT_MEDIUM_ESCALATION_SECONDS,
            low_escalation_seconds: None,
            max_silence_seconds: constants::alarms::DEFAULT_MAX_SILENCE_SECONDS,
            history_capacity: constants::alarms::DEFAULT_HISTORY_CAPACITY,
            resync_interval_seconds: constants::alarms::DEFAULT_RESYNC_INTERVAL_SECONDS,
        }
    }
}

impl AlarmsConfig {
    /// Escalation timeout for a priority, `None` when that priority never escalates
    pub fn escalation_timeout(&self, priority: AlarmPriority) -> Option<Duration> {
        match priority {
            AlarmPriority::High => Some(Duration::from_secs(self.high_escalation_seconds)),
            AlarmPriority::Medium => Some(Duration::from_secs(self.medium_escalation_seconds)),
            AlarmPriority::Low => self.low_escalation_seconds.map(Duration::from_secs),
        }
    }

    pub fn max_silence(&self) -> Duration {
        Duration::from_secs(self.max_silence_seconds)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }
}

/// Capacity and overflow policy of one bounded channel
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl ChannelConfig {
    pub fn new(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self { capacity, overflow }
    }
}

/// Cross-thread channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Sensor thread to real-time thread
    pub ingress: ChannelConfig,
    /// Real-time thread to storage thread
    pub persistence: ChannelConfig,
    /// Real-time thread to notification consumers
    pub notification: ChannelConfig,
    /// Real-time thread to telemetry dispatch
    pub telemetry: ChannelConfig,
    /// Clinician commands to the real-time thread
    pub command: ChannelConfig,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            ingress: ChannelConfig::new(4_096, OverflowPolicy::BlockWithTimeout { timeout_ms: 10 }),
            persistence: ChannelConfig::new(16_384, OverflowPolicy::DropOldest),
            notification: ChannelConfig::new(1_024, OverflowPolicy::DropOldest),
            telemetry: ChannelConfig::new(16, OverflowPolicy::DropOldest),
            command: ChannelConfig::new(64, OverflowPolicy::Reject),
        }
    }
}

/// Telemetry batch assembly
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub cadence_seconds: u64,
    pub max_batch_vitals: usize,
    pub max_batch_alarms: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cadence_seconds: 10,
            max_batch_vitals: 1_000,
            max_batch_alarms: 256,
        }
    }
}

impl TelemetryConfig {
    pub fn cadence(&self) -> Duration {
        Duration::from_secs(self.cadence_seconds)
    }
}

/// Flush scheduling for the durable store
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub flush_interval_seconds: u64,
    /// Pending record count that triggers an early flush
    pub flush_threshold: usize,
    /// Records committed per transaction; independent of the threshold
    pub chunk_size: usize,
    pub poll_interval_ms: u64,
    /// Pending records kept before the oldest are shed to the cache backfill
    pub max_pending: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            flush_interval_seconds: constants::persistence::DEFAULT_FLUSH_INTERVAL_SECONDS,
            flush_threshold: constants::persistence::DEFAULT_FLUSH_THRESHOLD,
            chunk_size: constants::persistence::DEFAULT_CHUNK_SIZE,
            poll_interval_ms: constants::persistence::DEFAULT_POLL_INTERVAL_MS,
            max_pending: constants::persistence::DEFAULT_MAX_PENDING,
        }
    }
}

impl PersistenceConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retention windows and emergency cleanup policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub run_at_hour_utc: u32,
    pub vitals_retention_days: u32,
    pub alarms_retention_days: u32,
    pub emergency_vitals_retention_days: u32,
    pub emergency_alarm_archive_days: u32,
    pub delete_batch_size: usize,
    pub size_ceiling_bytes: u64,
    pub size_check_interval_seconds: u64,
    pub recovery_ratio: f64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            run_at_hour_utc: constants::retention::DEFAULT_RUN_AT_HOUR_UTC,
            vitals_retention_days: constants::retention::DEFAULT_VITALS_RETENTION_DAYS,
            alarms_retention_days: constants::retention::DEFAULT_ALARMS_RETENTION_DAYS,
            emergency_vitals_retention_days:
                constants::retention::DEFAULT_EMERGENCY_VITALS_RETENTION_DAYS,
            emergency_alarm_archive_days: constants::retention::DEFAULT_EMERGENCY_ALARM_ARCHIVE_DAYS,
            delete_batch_size: constants::retention::MAX_DELETE_BATCH_SIZE,
            size_ceiling_bytes: constants::retention::DEFAULT_SIZE_CEILING_BYTES,
            size_check_interval_seconds: constants::retention::DEFAULT_SIZE_CHECK_INTERVAL_SECONDS,
            recovery_ratio: constants::retention::DEFAULT_RECOVERY_RATIO,
        }
    }
}

impl RetentionConfig {
    pub fn size_check_interval(&self) -> Duration {
        Duration::from_secs(self.size_check_interval_seconds)
    }

    /// Store size below which emergency mode ends
    pub fn recovery_bytes(&self) -> u64 {
        (self.size_ceiling_bytes as f64 * self.recovery_ratio) as u64
    }
}

/// Real-time thread scheduling
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Longest the loop waits for a sample before running timers
    pub tick_interval_ms: u64,
    pub latency_budget_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: constants::realtime::DEFAULT_TICK_INTERVAL_MS,
            latency_budget_ms: constants::realtime::LATENCY_BUDGET_MS,
        }
    }
}

impl RealtimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn latency_budget(&self) -> Duration {
        Duration::from_millis(self.latency_budget_ms)
    }
}

/// Durable store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_url: "sqlite://vitals.db?mode=rwc".to_string(),
            max_connections: 1,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; falls back to `RUST_LOG`, then the environment default
    pub level: Option<String>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Pretty,
        }
    }
}

impl MonitorConfig {
    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.device.device_id.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "device.device_id",
                "device configuration",
            ));
        }

        // Cache sizing
        if self.cache.vitals_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.vitals_capacity",
                "0",
                "capacity must be greater than 0",
            ));
        }
        if self.cache.max_sources == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.max_sources",
                "0",
                "at least one source must be allowed",
            ));
        }
        for (field, value) in [
            ("cache.waveform_window_seconds", self.cache.waveform_window_seconds),
            ("cache.ecg_sample_rate_hz", self.cache.ecg_sample_rate_hz),
            ("cache.pleth_sample_rate_hz", self.cache.pleth_sample_rate_hz),
            ("cache.resp_sample_rate_hz", self.cache.resp_sample_rate_hz),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(field, "0", "must be greater than 0"));
            }
        }

        self.validate_alarms()?;

        // Channels
        for (field, channel) in [
            ("channels.ingress", &self.channels.ingress),
            ("channels.persistence", &self.channels.persistence),
            ("channels.notification", &self.channels.notification),
            ("channels.telemetry", &self.channels.telemetry),
            ("channels.command", &self.channels.command),
        ] {
            if channel.capacity == 0 {
                return Err(ConfigurationError::invalid_value(
                    format!("{field}.capacity"),
                    "0",
                    "channel capacity must be greater than 0",
                ));
            }
        }

        // Telemetry
        if self.telemetry.enabled {
            if self.telemetry.cadence_seconds == 0 {
                return Err(ConfigurationError::invalid_value(
                    "telemetry.cadence_seconds",
                    "0",
                    "cadence must be greater than 0",
                ));
            }
            if self.telemetry.max_batch_vitals == 0 {
                return Err(ConfigurationError::invalid_value(
                    "telemetry.max_batch_vitals",
                    "0",
                    "batch size must be greater than 0",
                ));
            }
        }

        // Persistence
        if self.persistence.chunk_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "persistence.chunk_size",
                "0",
                "chunk size must be greater than 0",
            ));
        }
        if self.persistence.flush_threshold == 0 {
            return Err(ConfigurationError::invalid_value(
                "persistence.flush_threshold",
                "0",
                "flush threshold must be greater than 0",
            ));
        }
        if self.persistence.flush_interval_seconds == 0 || self.persistence.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "persistence.flush_interval_seconds",
                self.persistence.flush_interval_seconds.to_string(),
                "flush and poll intervals must be greater than 0",
            ));
        }
        if self.persistence.max_pending < self.persistence.flush_threshold {
            return Err(ConfigurationError::invalid_value(
                "persistence.max_pending",
                self.persistence.max_pending.to_string(),
                "max pending must be at least the flush threshold",
            ));
        }

        self.validate_retention()?;

        if self.realtime.tick_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "realtime.tick_interval_ms",
                "0",
                "tick interval must be greater than 0",
            ));
        }

        if self.storage.backend == StorageBackend::Sqlite && self.storage.database_url.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "storage.database_url",
                "sqlite storage backend",
            ));
        }

        Ok(())
    }

    fn validate_alarms(&self) -> Result<(), ConfigurationError> {
        let alarms = &self.alarms;
        if alarms.hysteresis_samples == 0 {
            return Err(ConfigurationError::invalid_value(
                "alarms.hysteresis_samples",
                "0",
                "at least one clearing sample is required",
            ));
        }
        if alarms.history_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "alarms.history_capacity",
                "0",
                "history capacity must be greater than 0",
            ));
        }
        if alarms.resync_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "alarms.resync_interval_seconds",
                "0",
                "resync interval must be greater than 0",
            ));
        }

        for (index, threshold) in alarms.thresholds.iter().enumerate() {
            let field = format!("alarms.thresholds[{index}]");
            if threshold.low.is_none() && threshold.high.is_none() {
                return Err(ConfigurationError::missing_required_field(
                    format!("{field}.low|high"),
                    format!("{} threshold", threshold.vital),
                ));
            }
            if let (Some(low), Some(high)) = (threshold.low, threshold.high) {
                if low >= high {
                    return Err(ConfigurationError::invalid_value(
                        field,
                        format!("{low}..{high}"),
                        "low limit must be below high limit",
                    ));
                }
            }
            if threshold.hysteresis_samples == Some(0) {
                return Err(ConfigurationError::invalid_value(
                    format!("{field}.hysteresis_samples"),
                    "0",
                    "at least one clearing sample is required",
                ));
            }
            if !threshold.clear_band.is_finite() || threshold.clear_band < 0.0 {
                return Err(ConfigurationError::invalid_value(
                    format!("{field}.clear_band"),
                    threshold.clear_band.to_string(),
                    "clear band must be a non-negative number",
                ));
            }
            let duplicate = alarms.thresholds[..index]
                .iter()
                .any(|other| other.vital == threshold.vital);
            if duplicate {
                return Err(ConfigurationError::invalid_value(
                    field,
                    threshold.vital.to_string(),
                    "each vital may have only one threshold entry",
                ));
            }
        }

        Ok(())
    }

    fn validate_retention(&self) -> Result<(), ConfigurationError> {
        let retention = &self.retention;
        if retention.run_at_hour_utc > 23 {
            return Err(ConfigurationError::invalid_value(
                "retention.run_at_hour_utc",
                retention.run_at_hour_utc.to_string(),
                "hour must be between 0 and 23",
            ));
        }
        if retention.delete_batch_size == 0
            || retention.delete_batch_size > constants::retention::MAX_DELETE_BATCH_SIZE
        {
            return Err(ConfigurationError::invalid_value(
                "retention.delete_batch_size",
                retention.delete_batch_size.to_string(),
                format!(
                    "batch size must be between 1 and {}",
                    constants::retention::MAX_DELETE_BATCH_SIZE
                ),
            ));
        }
        if retention.vitals_retention_days == 0 || retention.alarms_retention_days == 0 {
            return Err(ConfigurationError::invalid_value(
                "retention.vitals_retention_days",
                retention.vitals_retention_days.to_string(),
                "retention windows must be at least one day",
            ));
        }
        if retention.emergency_vitals_retention_days == 0
            || retention.emergency_vitals_retention_days > retention.vitals_retention_days
        {
            return Err(ConfigurationError::invalid_value(
                "retention.emergency_vitals_retention_days",
                retention.emergency_vitals_retention_days.to_string(),
                "emergency window must be between 1 day and the normal vitals window",
            ));
        }
        if retention.emergency_alarm_archive_days == 0 {
            return Err(ConfigurationError::invalid_value(
                "retention.emergency_alarm_archive_days",
                "0",
                "archive window must be at least one day",
            ));
        }
        if !(retention.recovery_ratio > 0.0 && retention.recovery_ratio < 1.0) {
            return Err(ConfigurationError::invalid_value(
                "retention.recovery_ratio",
                retention.recovery_ratio.to_string(),
                "recovery ratio must be within (0, 1)",
            ));
        }
        if retention.size_ceiling_bytes == 0 || retention.size_check_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "retention.size_ceiling_bytes",
                retention.size_ceiling_bytes.to_string(),
                "size ceiling and check interval must be greater than 0",
            ));
        }
        Ok(())
    }
}
