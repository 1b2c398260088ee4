//! # Execution Tracker
//!
//! Creates executions and moves them through the state machine. Every
//! mutation is a compare-and-set in the [`ExecutionStore`]; losing a race is
//! reported as a value, not an error. Workers waiting for work are woken
//! through [`ExecutionTracker::work_available`].

use crate::clock::Clock;
use crate::constants::operations;
use crate::error::Result;
use crate::logging::log_execution_operation;
use crate::models::{ErrorDetail, Execution, ExecutionQuery, ExecutionStatistics, ExecutionTransition};
use crate::store::{ExecutionStore, InsertOutcome};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(Execution),
    /// Another worker claimed it first, or it is not claimable now
    ConcurrencyConflict,
}

pub struct ExecutionTracker {
    store: Arc<dyn ExecutionStore>,
    clock: Arc<dyn Clock>,
    work_available: Arc<Notify>,
}

impl ExecutionTracker {
    pub fn new(store: Arc<dyn ExecutionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            work_available: Arc::new(Notify::new()),
        }
    }

    /// Signalled whenever new claimable work is created
    pub fn work_available(&self) -> Arc<Notify> {
        Arc::clone(&self.work_available)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Persist a pending execution; a second call for the same link and event
    /// returns the existing execution
    #[instrument(skip(self, execution), fields(execution_id = %execution.id, link = %execution.action_link_id))]
    pub async fn create_pending(&self, execution: Execution) -> Result<Execution> {
        match self.store.insert_if_absent(execution).await? {
            InsertOutcome::Created(created) => {
                log_execution_operation(
                    operations::EXECUTION_CREATED,
                    created.id,
                    created.area_id,
                    created.attempt,
                    created.status.as_str(),
                    None,
                );
                self.work_available.notify_one();
                Ok(created)
            }
            InsertOutcome::Existing(existing) => {
                debug!(existing_id = %existing.id, "Execution already exists for link and event");
                Ok(existing)
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Execution>> {
        self.store.get_execution(id).await
    }

    pub async fn claim(&self, id: Uuid, worker_id: &str) -> Result<ClaimOutcome> {
        let outcome = match self.store.claim(id, worker_id, self.clock.now()).await? {
            Some(execution) => ClaimOutcome::Claimed(execution),
            None => ClaimOutcome::ConcurrencyConflict,
        };
        Ok(outcome)
    }

    /// Claim the oldest pending or due retrying execution, if any
    pub async fn claim_next(&self, worker_id: &str) -> Result<Option<Execution>> {
        self.store.claim_next(worker_id, self.clock.now()).await
    }

    /// Running -> Succeeded. `None` when the execution was no longer running.
    pub async fn record_success(
        &self,
        claimed: &Execution,
        result: Value,
    ) -> Result<Option<Execution>> {
        self.store
            .transition(
                claimed.id,
                ExecutionTransition::succeed(result, self.clock.now()).for_claim(claimed),
            )
            .await
    }

    /// Running -> Retrying, due at `next_retry_at`
    pub async fn record_retry(
        &self,
        claimed: &Execution,
        next_retry_at: DateTime<Utc>,
        detail: ErrorDetail,
    ) -> Result<Option<Execution>> {
        let updated = self
            .store
            .transition(
                claimed.id,
                ExecutionTransition::retry(next_retry_at, detail, self.clock.now())
                    .for_claim(claimed),
            )
            .await?;
        if updated.is_some() {
            self.work_available.notify_one();
        }
        Ok(updated)
    }

    /// Running -> Failed
    pub async fn record_failure(
        &self,
        claimed: &Execution,
        detail: ErrorDetail,
    ) -> Result<Option<Execution>> {
        self.store
            .transition(
                claimed.id,
                ExecutionTransition::fail(detail, self.clock.now()).for_claim(claimed),
            )
            .await
    }

    /// Pending/Retrying -> Cancelled. `None` when the execution had already
    /// started or finished.
    pub async fn cancel(&self, id: Uuid) -> Result<Option<Execution>> {
        let cancelled = self
            .store
            .transition(id, ExecutionTransition::cancel(self.clock.now()))
            .await?;
        if let Some(execution) = &cancelled {
            log_execution_operation(
                operations::EXECUTION_CANCELLED,
                execution.id,
                execution.area_id,
                execution.attempt,
                execution.status.as_str(),
                None,
            );
        }
        Ok(cancelled)
    }

    /// Cancel all not-yet-running executions of an area (e.g. the area was
    /// disabled). Running executions finish normally.
    #[instrument(skip(self))]
    pub async fn cancel_area(&self, area_id: Uuid) -> Result<Vec<Uuid>> {
        let cancelled = self.store.cancel_area(area_id, self.clock.now()).await?;
        if !cancelled.is_empty() {
            tracing::info!(
                area_id = %area_id,
                cancelled = cancelled.len(),
                operation = operations::EXECUTION_CANCELLED,
                "Cancelled pending executions for area"
            );
        }
        Ok(cancelled)
    }

    /// Running executions whose current attempt started more than `threshold` ago
    pub async fn find_stalled(&self, threshold: Duration) -> Result<Vec<Execution>> {
        let Some(cutoff) = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|threshold| self.clock.now().checked_sub_signed(threshold))
        else {
            return Ok(Vec::new());
        };
        self.store.find_stalled(cutoff).await
    }

    pub async fn query(&self, query: &ExecutionQuery) -> Result<Vec<Execution>> {
        self.store.query(query).await
    }

    pub async fn statistics(&self) -> Result<ExecutionStatistics> {
        self.store.statistics().await
    }
}
