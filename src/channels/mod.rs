//! # Channels
//!
//! Typed, pre-allocated channels connecting the pipeline threads.

pub mod bounded;

pub use bounded::{
    bounded, BoundedReceiver, BoundedSender, ChannelError, ChannelStats, ChannelStatsSnapshot,
    OverflowPolicy, SendOutcome,
};
pub use crossbeam::channel::RecvTimeoutError;
