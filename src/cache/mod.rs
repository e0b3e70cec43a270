//! # Caches
//!
//! Bounded in-memory stores written by the real-time thread and read by
//! everyone else. Both caches are backed by [`RingBuffer`], which allocates
//! once at construction.

pub mod ring;
pub mod vitals_cache;
pub mod waveform_cache;

pub use ring::RingBuffer;
pub use vitals_cache::{CachedVital, VitalsCache};
pub use waveform_cache::{WaveformCache, WaveformCaches};
