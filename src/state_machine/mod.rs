// State machine module for the alarm lifecycle
//
// Transitions are pure functions over `Copy` states so the real-time thread
// can drive them without locking or allocation.

pub mod alarm_state_machine;
pub mod errors;
pub mod events;
pub mod states;

// Re-export main types for convenient access
pub use alarm_state_machine::AlarmStateMachine;
pub use errors::{StateMachineError, StateMachineResult};
pub use events::AlarmEvent;
pub use states::AlarmState;
