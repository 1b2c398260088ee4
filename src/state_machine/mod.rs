//! # Execution State Machine
//!
//! Lifecycle of a single reaction execution. Transitions only move forward;
//! terminal states (`succeeded`, `failed`, `cancelled`) accept no events.

pub mod errors;
pub mod events;
pub mod execution_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::ExecutionEvent;
pub use execution_state_machine::ExecutionStateMachine;
pub use states::ExecutionStatus;
