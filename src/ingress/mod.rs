//! # Sample Ingress
//!
//! Adapts external sensor sources into validated, typed samples and moves
//! them across the single-producer channel to the real-time thread.

pub mod sample_ingress;
pub mod sensor;

pub use sample_ingress::{IngressEvent, SampleIngress, SensorEvent};
pub use sensor::{ScriptStep, ScriptedSensorSource, SensorSource};
