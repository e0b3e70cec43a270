use parking_lot::RwLock;

use super::ring::RingBuffer;
use crate::models::{WaveformChannel, WaveformSample};

/// Fixed-duration circular buffer for one waveform channel.
///
/// Sized for `window_seconds × sample_rate_hz` samples. Once full, every
/// append overwrites the oldest slot, so readers always see the most recent
/// window. Writes and reads are serialized by the lock, so a reader never
/// observes a half-written slot.
#[derive(Debug)]
pub struct WaveformCache {
    channel: WaveformChannel,
    sample_rate_hz: u32,
    window_seconds: u32,
    ring: RwLock<RingBuffer<WaveformSample>>,
}

impl WaveformCache {
    pub fn new(channel: WaveformChannel, sample_rate_hz: u32, window_seconds: u32) -> Self {
        let sample_rate_hz = sample_rate_hz.max(1);
        let window_seconds = window_seconds.max(1);
        let capacity = sample_rate_hz as usize * window_seconds as usize;
        Self {
            channel,
            sample_rate_hz,
            window_seconds,
            ring: RwLock::new(RingBuffer::with_capacity(capacity)),
        }
    }

    /// Append a sample. Returns `false` for samples from another channel or
    /// with non-finite amplitude.
    pub fn append(&self, sample: WaveformSample) -> bool {
        if sample.channel() != self.channel || !sample.is_well_formed() {
            return false;
        }
        self.ring.write().push(sample);
        true
    }

    /// The most recent `seconds` worth of samples, oldest first
    pub fn get_last_seconds(&self, seconds: u32) -> Vec<WaveformSample> {
        let wanted = seconds.min(self.window_seconds) as usize * self.sample_rate_hz as usize;
        let ring = self.ring.read();
        let skip = ring.len().saturating_sub(wanted);
        ring.iter_from(skip).copied().collect()
    }

    pub fn channel(&self) -> WaveformChannel {
        self.channel
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    pub fn len(&self) -> usize {
        self.ring.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.read().capacity()
    }

    pub fn clear(&self) {
        self.ring.write().clear();
    }
}

/// Per-channel waveform caches, routed by [`WaveformChannel`]
#[derive(Debug)]
pub struct WaveformCaches {
    caches: [WaveformCache; 3],
}

impl WaveformCaches {
    pub fn new(window_seconds: u32, ecg_hz: u32, pleth_hz: u32, resp_hz: u32) -> Self {
        Self {
            caches: [
                WaveformCache::new(WaveformChannel::Ecg, ecg_hz, window_seconds),
                WaveformCache::new(WaveformChannel::Pleth, pleth_hz, window_seconds),
                WaveformCache::new(WaveformChannel::Resp, resp_hz, window_seconds),
            ],
        }
    }

    #[inline]
    pub fn append(&self, sample: WaveformSample) -> bool {
        self.caches[sample.channel().index()].append(sample)
    }

    pub fn channel(&self, channel: WaveformChannel) -> &WaveformCache {
        &self.caches[channel.index()]
    }

    pub fn get_last_seconds(&self, channel: WaveformChannel, seconds: u32) -> Vec<WaveformSample> {
        self.channel(channel).get_last_seconds(seconds)
    }
}
