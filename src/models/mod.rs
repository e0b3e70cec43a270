pub mod alarm;
pub mod telemetry_batch;
pub mod vital_record;
pub mod waveform;

// Re-export core models for easy access
pub use alarm::{ActorRef, AlarmKind, AlarmPriority, AlarmSnapshot, LimitDirection};
pub use telemetry_batch::TelemetryBatch;
pub use vital_record::{Origin, RecordRef, SourceId, VitalKind, VitalRecord};
pub use waveform::{WaveformChannel, WaveformSample};
