use thiserror::Error;

/// Errors raised by execution state transitions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on event {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Execution {execution_id} not found")]
    ExecutionNotFound { execution_id: String },

    #[error("Invalid state in store: {0}")]
    InvalidStoredState(String),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
