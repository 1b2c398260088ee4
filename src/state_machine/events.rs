use serde::{Deserialize, Serialize};

/// Events that drive execution state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A worker claimed the execution
    Claim,
    /// The handler returned success
    Succeed,
    /// The handler failed and the failure is terminal
    Fail,
    /// The handler failed and another attempt is scheduled
    Retry,
    /// The execution was cancelled before running
    Cancel,
}

impl ExecutionEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Succeed => "succeed",
            Self::Fail => "fail",
            Self::Retry => "retry",
            Self::Cancel => "cancel",
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeed | Self::Fail | Self::Cancel)
    }
}
