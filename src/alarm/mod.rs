//! # Alarm Engine
//!
//! Threshold evaluation with hysteresis, escalation timers, silencing and a
//! bounded history of resolved alarms. Transitions are delegated to
//! [`crate::state_machine::AlarmStateMachine`].

pub mod engine;

pub use engine::{AlarmEngine, AlarmSink, NullSink};
