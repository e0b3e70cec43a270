use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::vital_record::{RecordRef, VitalKind};
use crate::state_machine::AlarmState;

/// Alarm priority levels, ordered from advisory to critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmPriority {
    Low,
    Medium,
    High,
}

impl AlarmPriority {
    /// Next priority level on escalation; High is the ceiling
    pub fn elevated(&self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }
}

impl fmt::Display for AlarmPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for AlarmPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Invalid alarm priority: {s}")),
        }
    }
}

/// Limit crossed by an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitDirection {
    /// Value above the high limit
    Above,
    /// Value below the low limit
    Below,
}

/// Alarm condition type; one live alarm per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    HeartRateHigh,
    HeartRateLow,
    Spo2High,
    Spo2Low,
    RespirationRateHigh,
    RespirationRateLow,
}

impl AlarmKind {
    pub fn new(vital: VitalKind, direction: LimitDirection) -> Self {
        match (vital, direction) {
            (VitalKind::HeartRate, LimitDirection::Above) => Self::HeartRateHigh,
            (VitalKind::HeartRate, LimitDirection::Below) => Self::HeartRateLow,
            (VitalKind::Spo2, LimitDirection::Above) => Self::Spo2High,
            (VitalKind::Spo2, LimitDirection::Below) => Self::Spo2Low,
            (VitalKind::RespirationRate, LimitDirection::Above) => Self::RespirationRateHigh,
            (VitalKind::RespirationRate, LimitDirection::Below) => Self::RespirationRateLow,
        }
    }

    pub fn vital(&self) -> VitalKind {
        match self {
            Self::HeartRateHigh | Self::HeartRateLow => VitalKind::HeartRate,
            Self::Spo2High | Self::Spo2Low => VitalKind::Spo2,
            Self::RespirationRateHigh | Self::RespirationRateLow => VitalKind::RespirationRate,
        }
    }

    pub fn direction(&self) -> LimitDirection {
        match self {
            Self::HeartRateHigh | Self::Spo2High | Self::RespirationRateHigh => {
                LimitDirection::Above
            }
            Self::HeartRateLow | Self::Spo2Low | Self::RespirationRateLow => LimitDirection::Below,
        }
    }
}

impl fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartRateHigh => write!(f, "heart_rate_high"),
            Self::HeartRateLow => write!(f, "heart_rate_low"),
            Self::Spo2High => write!(f, "spo2_high"),
            Self::Spo2Low => write!(f, "spo2_low"),
            Self::RespirationRateHigh => write!(f, "respiration_rate_high"),
            Self::RespirationRateLow => write!(f, "respiration_rate_low"),
        }
    }
}

impl std::str::FromStr for AlarmKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heart_rate_high" => Ok(Self::HeartRateHigh),
            "heart_rate_low" => Ok(Self::HeartRateLow),
            "spo2_high" => Ok(Self::Spo2High),
            "spo2_low" => Ok(Self::Spo2Low),
            "respiration_rate_high" => Ok(Self::RespirationRateHigh),
            "respiration_rate_low" => Ok(Self::RespirationRateLow),
            _ => Err(format!("Invalid alarm kind: {s}")),
        }
    }
}

/// Clinician or system actor that acknowledged an alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorRef(pub u32);

impl fmt::Display for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Point-in-time copy of an alarm instance.
///
/// Only the alarm engine creates and advances snapshots; every other thread
/// receives `Copy` values through channels. `revision` grows by one on each
/// transition, so `(alarm_id, revision)` identifies a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlarmSnapshot {
    pub(crate) alarm_id: Uuid,
    pub(crate) kind: AlarmKind,
    pub(crate) priority: AlarmPriority,
    pub(crate) state: AlarmState,
    pub(crate) raised_at_ms: i64,
    pub(crate) acknowledged_at_ms: Option<i64>,
    pub(crate) acknowledged_by: Option<ActorRef>,
    pub(crate) silenced_until_ms: Option<i64>,
    pub(crate) escalation_level: u8,
    pub(crate) trigger: RecordRef,
    pub(crate) value: f64,
    pub(crate) threshold: f64,
    pub(crate) revision: u32,
    pub(crate) updated_at_ms: i64,
}

impl AlarmSnapshot {
    pub(crate) fn raised(
        kind: AlarmKind,
        priority: AlarmPriority,
        trigger: RecordRef,
        value: f64,
        threshold: f64,
        now_ms: i64,
    ) -> Self {
        Self {
            alarm_id: Uuid::new_v4(),
            kind,
            priority,
            state: AlarmState::Raised,
            raised_at_ms: now_ms,
            acknowledged_at_ms: None,
            acknowledged_by: None,
            silenced_until_ms: None,
            escalation_level: 0,
            trigger,
            value,
            threshold,
            revision: 1,
            updated_at_ms: now_ms,
        }
    }

    pub fn alarm_id(&self) -> Uuid {
        self.alarm_id
    }

    pub fn kind(&self) -> AlarmKind {
        self.kind
    }

    pub fn priority(&self) -> AlarmPriority {
        self.priority
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn raised_at_ms(&self) -> i64 {
        self.raised_at_ms
    }

    pub fn acknowledged_at_ms(&self) -> Option<i64> {
        self.acknowledged_at_ms
    }

    pub fn acknowledged_by(&self) -> Option<ActorRef> {
        self.acknowledged_by
    }

    pub fn silenced_until_ms(&self) -> Option<i64> {
        self.silenced_until_ms
    }

    pub fn escalation_level(&self) -> u8 {
        self.escalation_level
    }

    pub fn trigger(&self) -> RecordRef {
        self.trigger
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn updated_at_ms(&self) -> i64 {
        self.updated_at_ms
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceId;

    #[test]
    fn test_priority_elevation_caps_at_high() {
        assert_eq!(AlarmPriority::Low.elevated(), AlarmPriority::Medium);
        assert_eq!(AlarmPriority::Medium.elevated(), AlarmPriority::High);
        assert_eq!(AlarmPriority::High.elevated(), AlarmPriority::High);
        assert!(AlarmPriority::High > AlarmPriority::Low);
    }

    #[test]
    fn test_kind_round_trips_through_parts() {
        for vital in VitalKind::ALL {
            for direction in [LimitDirection::Above, LimitDirection::Below] {
                let kind = AlarmKind::new(vital, direction);
                assert_eq!(kind.vital(), vital);
                assert_eq!(kind.direction(), direction);
                assert_eq!(kind.to_string().parse::<AlarmKind>().unwrap(), kind);
            }
        }
    }

    #[test]
    fn test_raised_snapshot_starts_at_revision_one() {
        let trigger = RecordRef {
            source_id: SourceId(1),
            timestamp_ms: 5_000,
        };
        let snapshot = AlarmSnapshot::raised(
            AlarmKind::HeartRateHigh,
            AlarmPriority::High,
            trigger,
            110.0,
            100.0,
            5_010,
        );
        assert_eq!(snapshot.state(), AlarmState::Raised);
        assert_eq!(snapshot.revision(), 1);
        assert_eq!(snapshot.raised_at_ms(), 5_010);
        assert!(snapshot.is_active());
    }
}
