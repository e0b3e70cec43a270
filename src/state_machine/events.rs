use serde::{Deserialize, Serialize};

/// Events that can trigger alarm state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlarmEvent {
    /// Threshold crossed on an idle slot
    Raise,
    /// Escalation timer elapsed without acknowledgment
    Escalate,
    /// Clinician acknowledged the alarm
    Acknowledge,
    /// Clinician silenced the alarm for a bounded duration
    Silence,
    /// Silence deadline passed
    SilenceExpired { condition_active: bool },
    /// Hysteresis satisfied, condition cleared
    Resolve,
}

impl AlarmEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Raise => "raise",
            Self::Escalate => "escalate",
            Self::Acknowledge => "acknowledge",
            Self::Silence => "silence",
            Self::SilenceExpired { .. } => "silence_expired",
            Self::Resolve => "resolve",
        }
    }
}
