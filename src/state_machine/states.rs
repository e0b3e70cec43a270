use serde::{Deserialize, Serialize};
use std::fmt;

/// Alarm lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    /// No alarm condition on this slot
    Inactive,
    /// Threshold crossed, escalation timer running
    Raised,
    /// Unacknowledged past the escalation timeout
    Escalated,
    /// Acknowledged by a clinician
    Acknowledged,
    /// Audible indication suppressed until a deadline
    Silenced,
    /// Condition cleared; immutable history from here on
    Resolved,
}

impl AlarmState {
    /// Check if this is a terminal state for the alarm instance
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Check if the alarm instance is live and clinically relevant
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Raised | Self::Escalated | Self::Acknowledged | Self::Silenced
        )
    }

    /// Check if a new alarm instance may be raised from this state
    pub fn can_raise(&self) -> bool {
        matches!(self, Self::Inactive | Self::Resolved)
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Raised => write!(f, "raised"),
            Self::Escalated => write!(f, "escalated"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Silenced => write!(f, "silenced"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for AlarmState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "raised" => Ok(Self::Raised),
            "escalated" => Ok(Self::Escalated),
            "acknowledged" => Ok(Self::Acknowledged),
            "silenced" => Ok(Self::Silenced),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("Invalid alarm state: {s}")),
        }
    }
}

/// Default state for new alarm slots
impl Default for AlarmState {
    fn default() -> Self {
        Self::Inactive
    }
}
