use super::{ActionLink, ActionLinkId, Event};
use crate::orchestration::retry_manager::ErrorCategory;
use crate::state_machine::{
    ExecutionEvent, ExecutionStateMachine, ExecutionStatus, StateMachineResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Failure information recorded on retrying and failed executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub attempt: u32,
    pub occurred_at: DateTime<Utc>,
}

/// One tracked attempt, with retries, to run a single reaction for a single event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub area_id: Uuid,
    pub action_link_id: ActionLinkId,
    pub target_instance_id: Uuid,
    pub triggering_event_id: Uuid,
    pub status: ExecutionStatus,
    /// Number of claims so far; 0 until first claimed
    pub attempt: u32,
    pub input_payload: Value,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_payload: Option<Value>,
    pub error_detail: Option<ErrorDetail>,
    pub claimed_by: Option<String>,
}

impl Execution {
    /// New pending execution of `link` triggered by `event`
    pub fn pending(link: &ActionLink, event: &Event, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            area_id: link.area_id,
            action_link_id: link.id(),
            target_instance_id: link.target_instance_id,
            triggering_event_id: event.id,
            status: ExecutionStatus::Pending,
            attempt: 0,
            input_payload: event.raw_payload.clone(),
            created_at,
            last_attempt_at: None,
            next_retry_at: None,
            finished_at: None,
            result_payload: None,
            error_detail: None,
            claimed_by: None,
        }
    }

    /// Whether a worker may claim this execution at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ExecutionStatus::Pending => true,
            ExecutionStatus::Retrying => self.next_retry_at.map_or(true, |at| at <= now),
            _ => false,
        }
    }

    /// Whether the claim `transition` is bound to (if any) is still current
    pub fn holds_claim(&self, transition: &ExecutionTransition) -> bool {
        transition
            .expected_attempt
            .map_or(true, |attempt| attempt == self.attempt)
            && transition
                .expected_worker
                .as_ref()
                .map_or(true, |worker| self.claimed_by.as_ref() == Some(worker))
    }

    /// Apply a transition in place, rejecting illegal ones
    pub fn apply(&mut self, transition: &ExecutionTransition) -> StateMachineResult<()> {
        let target = ExecutionStateMachine::determine_target_state(self.status, transition.event)?;
        self.status = target;

        match transition.event {
            ExecutionEvent::Claim => {
                self.attempt += 1;
                self.last_attempt_at = Some(transition.at);
                self.next_retry_at = None;
                self.claimed_by = transition.worker_id.clone();
            }
            ExecutionEvent::Succeed => {
                self.result_payload = transition.result_payload.clone();
                self.finished_at = Some(transition.at);
            }
            ExecutionEvent::Retry => {
                self.next_retry_at = transition.next_retry_at;
                self.error_detail = transition.error_detail.clone();
            }
            ExecutionEvent::Fail => {
                self.error_detail = transition.error_detail.clone();
                self.next_retry_at = None;
                self.finished_at = Some(transition.at);
            }
            ExecutionEvent::Cancel => {
                self.next_retry_at = None;
                self.finished_at = Some(transition.at);
            }
        }

        Ok(())
    }
}

/// A requested state change plus the data it records
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionTransition {
    pub event: ExecutionEvent,
    pub at: DateTime<Utc>,
    pub worker_id: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub result_payload: Option<Value>,
    pub error_detail: Option<ErrorDetail>,
    /// Attempt the transition was issued for; `None` accepts any attempt
    pub expected_attempt: Option<u32>,
    /// Worker the transition was issued by; `None` accepts any holder
    pub expected_worker: Option<String>,
}

impl ExecutionTransition {
    fn new(event: ExecutionEvent, at: DateTime<Utc>) -> Self {
        Self {
            event,
            at,
            worker_id: None,
            next_retry_at: None,
            result_payload: None,
            error_detail: None,
            expected_attempt: None,
            expected_worker: None,
        }
    }

    /// Bind this transition to the claim that produced `claimed`, so it only
    /// applies while that claim is still current
    pub fn for_claim(self, claimed: &Execution) -> Self {
        Self {
            expected_attempt: Some(claimed.attempt),
            expected_worker: claimed.claimed_by.clone(),
            ..self
        }
    }

    pub fn claim(worker_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            worker_id: Some(worker_id.into()),
            ..Self::new(ExecutionEvent::Claim, at)
        }
    }

    pub fn succeed(result: Value, at: DateTime<Utc>) -> Self {
        Self {
            result_payload: Some(result),
            ..Self::new(ExecutionEvent::Succeed, at)
        }
    }

    pub fn retry(next_retry_at: DateTime<Utc>, detail: ErrorDetail, at: DateTime<Utc>) -> Self {
        Self {
            next_retry_at: Some(next_retry_at),
            error_detail: Some(detail),
            ..Self::new(ExecutionEvent::Retry, at)
        }
    }

    pub fn fail(detail: ErrorDetail, at: DateTime<Utc>) -> Self {
        Self {
            error_detail: Some(detail),
            ..Self::new(ExecutionEvent::Fail, at)
        }
    }

    pub fn cancel(at: DateTime<Utc>) -> Self {
        Self::new(ExecutionEvent::Cancel, at)
    }
}

/// Audit query over executions; every filter is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionQuery {
    pub area_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    /// Inclusive lower bound on `created_at`
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ExecutionQuery {
    pub fn for_area(area_id: Uuid) -> Self {
        Self {
            area_id: Some(area_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, execution: &Execution) -> bool {
        self.area_id.map_or(true, |id| execution.area_id == id)
            && self.status.map_or(true, |s| execution.status == s)
            && self.from.map_or(true, |from| execution.created_at >= from)
            && self.to.map_or(true, |to| execution.created_at < to)
    }
}

/// Execution counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatistics {
    pub pending: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retrying: u64,
    pub cancelled: u64,
}

impl ExecutionStatistics {
    pub fn record(&mut self, status: ExecutionStatus, count: u64) {
        match status {
            ExecutionStatus::Pending => self.pending += count,
            ExecutionStatus::Running => self.running += count,
            ExecutionStatus::Succeeded => self.succeeded += count,
            ExecutionStatus::Failed => self.failed += count,
            ExecutionStatus::Retrying => self.retrying += count,
            ExecutionStatus::Cancelled => self.cancelled += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.running + self.succeeded + self.failed + self.retrying + self.cancelled
    }
}
