use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::VitalsError;

/// Identifier of the sensor source that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Where a vital record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Measured by an attached sensor
    Sensor,
    /// Produced by a simulator or replay source
    Simulated,
    /// Entered manually by a clinician
    Manual,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sensor => write!(f, "sensor"),
            Self::Simulated => write!(f, "simulated"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sensor" => Ok(Self::Sensor),
            "simulated" => Ok(Self::Simulated),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Invalid record origin: {s}")),
        }
    }
}

/// Physiological parameter carried by a vital record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalKind {
    HeartRate,
    Spo2,
    RespirationRate,
}

impl VitalKind {
    pub const ALL: [VitalKind; 3] = [Self::HeartRate, Self::Spo2, Self::RespirationRate];

    /// Inclusive range of values accepted at ingress
    pub fn plausible_range(&self) -> (f64, f64) {
        match self {
            Self::HeartRate => (0.0, 350.0),
            Self::Spo2 => (0.0, 100.0),
            Self::RespirationRate => (0.0, 150.0),
        }
    }
}

impl fmt::Display for VitalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartRate => write!(f, "heart_rate"),
            Self::Spo2 => write!(f, "spo2"),
            Self::RespirationRate => write!(f, "respiration_rate"),
        }
    }
}

/// Reference to the record that triggered an alarm, keyed like the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub source_id: SourceId,
    pub timestamp_ms: i64,
}

/// A single multi-parameter vital-sign measurement.
///
/// Records are `Copy` values so the real-time path can move them through
/// caches and channels without touching the heap. Fields are private: a
/// record never changes after construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VitalRecord {
    source_id: SourceId,
    timestamp_ms: i64,
    heart_rate: Option<f64>,
    spo2: Option<f64>,
    respiration_rate: Option<f64>,
    origin: Origin,
}

impl VitalRecord {
    pub fn new(
        source_id: SourceId,
        timestamp_ms: i64,
        heart_rate: Option<f64>,
        spo2: Option<f64>,
        respiration_rate: Option<f64>,
        origin: Origin,
    ) -> Self {
        Self {
            source_id,
            timestamp_ms,
            heart_rate,
            spo2,
            respiration_rate,
            origin,
        }
    }

    /// Convenience constructor for a sensor record carrying every parameter
    pub fn measured(
        source_id: SourceId,
        timestamp_ms: i64,
        heart_rate: f64,
        spo2: f64,
        respiration_rate: f64,
    ) -> Self {
        Self::new(
            source_id,
            timestamp_ms,
            Some(heart_rate),
            Some(spo2),
            Some(respiration_rate),
            Origin::Sensor,
        )
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn heart_rate(&self) -> Option<f64> {
        self.heart_rate
    }

    pub fn spo2(&self) -> Option<f64> {
        self.spo2
    }

    pub fn respiration_rate(&self) -> Option<f64> {
        self.respiration_rate
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Value of a given parameter, if the record carries it
    #[inline]
    pub fn value(&self, kind: VitalKind) -> Option<f64> {
        match kind {
            VitalKind::HeartRate => self.heart_rate,
            VitalKind::Spo2 => self.spo2,
            VitalKind::RespirationRate => self.respiration_rate,
        }
    }

    pub fn record_ref(&self) -> RecordRef {
        RecordRef {
            source_id: self.source_id,
            timestamp_ms: self.timestamp_ms,
        }
    }

    /// Structural validation: finite, plausible values and at least one parameter.
    ///
    /// Ordering checks are stateful and live in the ingress and cache.
    pub fn validate(&self) -> Result<(), VitalsError> {
        if self.timestamp_ms <= 0 {
            return Err(VitalsError::Validation(format!(
                "{} produced non-positive timestamp {}",
                self.source_id, self.timestamp_ms
            )));
        }

        let mut present = 0;
        for kind in VitalKind::ALL {
            if let Some(value) = self.value(kind) {
                let (min, max) = kind.plausible_range();
                if !value.is_finite() || value < min || value > max {
                    return Err(VitalsError::Validation(format!(
                        "{} reported implausible {kind} value {value}",
                        self.source_id
                    )));
                }
                present += 1;
            }
        }

        if present == 0 {
            return Err(VitalsError::Validation(format!(
                "{} produced an empty record at {}",
                self.source_id, self.timestamp_ms
            )));
        }

        Ok(())
    }

    /// Non-allocating form of [`validate`](Self::validate) for the real-time path
    #[inline]
    pub fn is_well_formed(&self) -> bool {
        if self.timestamp_ms <= 0 {
            return false;
        }
        let mut present = false;
        for kind in VitalKind::ALL {
            if let Some(value) = self.value(kind) {
                let (min, max) = kind.plausible_range();
                if !value.is_finite() || value < min || value > max {
                    return false;
                }
                present = true;
            }
        }
        present
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_record_passes() {
        let record = VitalRecord::measured(SourceId(1), 1_000, 72.0, 98.0, 16.0);
        assert!(record.validate().is_ok());
        assert!(record.is_well_formed());
    }

    #[test]
    fn test_nan_and_out_of_range_rejected() {
        let nan = VitalRecord::measured(SourceId(1), 1_000, f64::NAN, 98.0, 16.0);
        assert!(nan.validate().is_err());
        assert!(!nan.is_well_formed());

        let spo2 = VitalRecord::measured(SourceId(1), 1_000, 72.0, 104.0, 16.0);
        assert!(spo2.validate().is_err());
    }

    #[test]
    fn test_empty_record_rejected() {
        let empty = VitalRecord::new(SourceId(3), 1_000, None, None, None, Origin::Sensor);
        assert!(empty.validate().is_err());
        assert!(!empty.is_well_formed());
    }

    #[test]
    fn test_partial_record_accepted() {
        let hr_only = VitalRecord::new(SourceId(3), 1_000, Some(60.0), None, None, Origin::Manual);
        assert!(hr_only.is_well_formed());
        assert_eq!(hr_only.value(VitalKind::HeartRate), Some(60.0));
        assert_eq!(hr_only.value(VitalKind::Spo2), None);
    }

    #[test]
    fn test_origin_string_conversion() {
        assert_eq!(Origin::Simulated.to_string(), "simulated");
        assert_eq!("manual".parse::<Origin>().unwrap(), Origin::Manual);
        assert!("bogus".parse::<Origin>().is_err());
    }
}
