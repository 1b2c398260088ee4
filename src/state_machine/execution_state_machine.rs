use super::{
    errors::{StateMachineError, StateMachineResult},
    events::ExecutionEvent,
    states::ExecutionStatus,
};

/// Transition table for reaction executions.
///
/// ```text
/// Pending  --claim-->  Running
/// Retrying --claim-->  Running
/// Running  --succeed-> Succeeded
/// Running  --fail-->   Failed
/// Running  --retry-->  Retrying
/// Pending  --cancel--> Cancelled
/// Retrying --cancel--> Cancelled
/// ```
///
/// Stores apply transitions as compare-and-set: the row is only updated while
/// its status is one of [`ExecutionStateMachine::source_states`] for the event.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionStateMachine;

impl ExecutionStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: ExecutionStatus,
        event: ExecutionEvent,
    ) -> StateMachineResult<ExecutionStatus> {
        let target = match (current_state, event) {
            (ExecutionStatus::Pending, ExecutionEvent::Claim) => ExecutionStatus::Running,
            (ExecutionStatus::Retrying, ExecutionEvent::Claim) => ExecutionStatus::Running,

            (ExecutionStatus::Running, ExecutionEvent::Succeed) => ExecutionStatus::Succeeded,
            (ExecutionStatus::Running, ExecutionEvent::Fail) => ExecutionStatus::Failed,
            (ExecutionStatus::Running, ExecutionEvent::Retry) => ExecutionStatus::Retrying,

            // Running executions are never aborted
            (ExecutionStatus::Pending, ExecutionEvent::Cancel) => ExecutionStatus::Cancelled,
            (ExecutionStatus::Retrying, ExecutionEvent::Cancel) => ExecutionStatus::Cancelled,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// States from which `event` is a legal transition
    pub fn source_states(event: ExecutionEvent) -> Vec<ExecutionStatus> {
        ExecutionStatus::ALL
            .into_iter()
            .filter(|state| Self::determine_target_state(*state, event).is_ok())
            .collect()
    }

    /// Whether an execution's attempt counter advances on this event
    pub fn increments_attempt(event: ExecutionEvent) -> bool {
        matches!(event, ExecutionEvent::Claim)
    }
}
