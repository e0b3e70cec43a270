//! # System Constants
//!
//! Defaults and hard limits that define the operational boundaries of the
//! vitals pipeline. Configuration defaults are built from these values.

use crate::state_machine::AlarmState;

/// Channel names used in logs and capacity-pressure errors
pub mod channels {
    pub const INGRESS: &str = "ingress";
    pub const PERSISTENCE: &str = "persistence";
    pub const NOTIFICATION: &str = "notification";
    pub const TELEMETRY: &str = "telemetry";
    pub const COMMAND: &str = "command";
}

/// Thread names for the pipeline
pub mod threads {
    pub const REALTIME: &str = "vitals-rt";
    pub const STORAGE: &str = "vitals-storage";
    pub const TELEMETRY: &str = "vitals-telemetry";
    pub const SENSOR: &str = "vitals-sensor";
}

/// Cache sizing defaults
pub mod cache {
    /// Three days of vitals at 1 Hz
    pub const DEFAULT_VITALS_CAPACITY: usize = 259_200;

    /// Maximum distinct sensor sources tracked for ordering checks
    pub const DEFAULT_MAX_SOURCES: usize = 16;

    pub const DEFAULT_WAVEFORM_WINDOW_SECONDS: u32 = 30;

    pub const DEFAULT_ECG_SAMPLE_RATE_HZ: u32 = 250;
    pub const DEFAULT_PLETH_SAMPLE_RATE_HZ: u32 = 125;
    pub const DEFAULT_RESP_SAMPLE_RATE_HZ: u32 = 25;
}

/// Alarm policy defaults
pub mod alarms {
    pub const DEFAULT_HYSTERESIS_SAMPLES: u32 = 3;
    pub const DEFAULT_HIGH_ESCALATION_SECONDS: u64 = 60;
    pub const DEFAULT_MEDIUM_ESCALATION_SECONDS: u64 = 120;
    pub const DEFAULT_MAX_SILENCE_SECONDS: u64 = 120;
    pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;
    pub const DEFAULT_RESYNC_INTERVAL_SECONDS: u64 = 30;
}

/// Persistence scheduling defaults
pub mod persistence {
    pub const DEFAULT_FLUSH_INTERVAL_SECONDS: u64 = 600;
    pub const DEFAULT_FLUSH_THRESHOLD: usize = 10_000;
    pub const DEFAULT_CHUNK_SIZE: usize = 500;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
    pub const DEFAULT_MAX_PENDING: usize = 100_000;
}

/// Retention policy defaults
pub mod retention {
    pub const DEFAULT_RUN_AT_HOUR_UTC: u32 = 3;
    pub const DEFAULT_VITALS_RETENTION_DAYS: u32 = 7;
    pub const DEFAULT_ALARMS_RETENTION_DAYS: u32 = 90;
    pub const DEFAULT_EMERGENCY_VITALS_RETENTION_DAYS: u32 = 3;
    pub const DEFAULT_EMERGENCY_ALARM_ARCHIVE_DAYS: u32 = 30;

    /// Upper bound on rows removed by a single delete statement
    pub const MAX_DELETE_BATCH_SIZE: usize = 10_000;

    pub const DEFAULT_SIZE_CEILING_BYTES: u64 = 512 * 1024 * 1024;
    pub const DEFAULT_SIZE_CHECK_INTERVAL_SECONDS: u64 = 300;
    pub const DEFAULT_RECOVERY_RATIO: f64 = 0.8;
}

/// Real-time loop defaults
pub mod realtime {
    pub const DEFAULT_TICK_INTERVAL_MS: u64 = 50;

    /// End-to-end budget from sample ingestion to visible alarm (p99)
    pub const LATENCY_BUDGET_MS: u64 = 50;

    /// Samples handled back to back before timers and commands get a turn
    pub const MAX_INGRESS_BURST: usize = 256;

    /// Evicted alarm revisions held for redelivery to the storage thread
    pub const ALARM_REDELIVERY_CAPACITY: usize = 1_024;

    /// How long the shutdown drain waits for room for each evicted alarm
    pub const SHUTDOWN_REDELIVERY_TIMEOUT_MS: u64 = 2_000;

    /// How long a clinician command waits for the real-time thread to answer
    pub const COMMAND_REPLY_TIMEOUT_MS: u64 = 1_000;

    pub const MS_PER_SECOND: i64 = 1_000;
    pub const MS_PER_DAY: i64 = 86_400_000;
}

/// State groupings used by the alarm engine and repositories
pub mod state_groups {
    use super::AlarmState;

    /// States in which an alarm instance is live and clinically relevant
    pub const ACTIVE_STATES: &[AlarmState] = &[
        AlarmState::Raised,
        AlarmState::Escalated,
        AlarmState::Acknowledged,
        AlarmState::Silenced,
    ];

    /// States from which a new alarm instance may be raised on the same slot
    pub const RAISABLE_STATES: &[AlarmState] = &[AlarmState::Inactive, AlarmState::Resolved];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_groups_are_disjoint() {
        for state in state_groups::ACTIVE_STATES {
            assert!(!state_groups::RAISABLE_STATES.contains(state));
        }
    }

    #[test]
    fn test_default_vitals_capacity_covers_three_days() {
        assert_eq!(cache::DEFAULT_VITALS_CAPACITY as i64, 3 * realtime::MS_PER_DAY / 1_000);
    }
}
