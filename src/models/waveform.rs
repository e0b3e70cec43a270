use serde::{Deserialize, Serialize};
use std::fmt;

/// Waveform channel displayed by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveformChannel {
    Ecg,
    Pleth,
    Resp,
}

impl WaveformChannel {
    pub const ALL: [WaveformChannel; 3] = [Self::Ecg, Self::Pleth, Self::Resp];

    /// Stable slot index used by fixed-size per-channel tables
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            Self::Ecg => 0,
            Self::Pleth => 1,
            Self::Resp => 2,
        }
    }
}

impl fmt::Display for WaveformChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ecg => write!(f, "ecg"),
            Self::Pleth => write!(f, "pleth"),
            Self::Resp => write!(f, "resp"),
        }
    }
}

/// One high-rate waveform point. Display only, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaveformSample {
    channel: WaveformChannel,
    timestamp_ms: i64,
    amplitude: f32,
}

impl WaveformSample {
    pub fn new(channel: WaveformChannel, timestamp_ms: i64, amplitude: f32) -> Self {
        Self {
            channel,
            timestamp_ms,
            amplitude,
        }
    }

    pub fn channel(&self) -> WaveformChannel {
        self.channel
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude
    }

    #[inline]
    pub fn is_well_formed(&self) -> bool {
        self.timestamp_ms > 0 && self.amplitude.is_finite()
    }
}
