//! In-process store backed by `dashmap`.
//!
//! Atomicity comes from holding the per-key shard lock for the whole
//! check-and-set or compare-and-set. Multi-row operations (claim-next, cancel
//! by area) snapshot candidate ids first and then compete row by row, so a
//! row is only ever mutated under its own lock.

use super::{DedupStore, EventStore, ExecutionStore, InsertOutcome};
use crate::error::Result;
use crate::models::{
    ActionLinkId, Event, Execution, ExecutionQuery, ExecutionStatistics, ExecutionTransition,
};
use crate::state_machine::{ExecutionEvent, ExecutionStateMachine, ExecutionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct DedupEntry {
    expires_at: Option<DateTime<Utc>>,
}

impl DedupEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    dedup: DashMap<String, DedupEntry>,
    events: DashMap<Uuid, Event>,
    executions: DashMap<Uuid, Execution>,
    by_link_event: DashMap<(ActionLinkId, Uuid), Uuid>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events appended so far
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Drop expired dedup entries; returns how many were removed
    pub fn purge_expired_dedup_keys(&self, now: DateTime<Utc>) -> usize {
        let before = self.dedup.len();
        self.dedup.retain(|_, entry| entry.is_live(now));
        before - self.dedup.len()
    }

    fn claim_row(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Execution>> {
        let Some(mut row) = self.executions.get_mut(&id) else {
            return Ok(None);
        };
        if !row.is_due(now) {
            return Ok(None);
        }
        row.apply(&ExecutionTransition::claim(worker_id, now))?;
        Ok(Some(row.clone()))
    }
}

/// Absolute expiry for a TTL; windows too large to represent never expire
fn expiry(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| now.checked_add_signed(ttl))
}

#[async_trait]
impl DedupStore for InMemoryStore {
    async fn check_and_set(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let fresh = DedupEntry {
            expires_at: expiry(now, ttl),
        };

        match self.dedup.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    Ok(false)
                } else {
                    debug!(dedup_key = %key, "Dedup entry expired; re-admitting");
                    occupied.insert(fresh);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.dedup.remove(key).is_some())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn append(&self, event: &Event) -> Result<()> {
        self.events.entry(event.id).or_insert_with(|| event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        Ok(self.events.get(&id).map(|e| e.clone()))
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn insert_if_absent(&self, execution: Execution) -> Result<InsertOutcome> {
        let unique = (execution.action_link_id, execution.triggering_event_id);

        match self.by_link_event.entry(unique) {
            Entry::Occupied(occupied) => {
                let existing = self
                    .executions
                    .get(occupied.get())
                    .map(|e| e.clone())
                    .ok_or_else(|| {
                        crate::error::AreaError::Internal(format!(
                            "unique index points at missing execution {}",
                            occupied.get()
                        ))
                    })?;
                Ok(InsertOutcome::Existing(existing))
            }
            Entry::Vacant(vacant) => {
                self.executions.insert(execution.id, execution.clone());
                vacant.insert(execution.id);
                Ok(InsertOutcome::Created(execution))
            }
        }
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        Ok(self.executions.get(&id).map(|e| e.clone()))
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>> {
        self.claim_row(id, worker_id, now)
    }

    async fn claim_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Execution>> {
        let mut due: Vec<(DateTime<Utc>, Uuid)> = self
            .executions
            .iter()
            .filter(|row| row.is_due(now))
            .map(|row| (row.created_at, row.id))
            .collect();
        due.sort();

        for (_, id) in due {
            if let Some(claimed) = self.claim_row(id, worker_id, now)? {
                return Ok(Some(claimed));
            }
        }
        Ok(None)
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: ExecutionTransition,
    ) -> Result<Option<Execution>> {
        if transition.event == ExecutionEvent::Claim {
            let worker_id = transition.worker_id.clone().unwrap_or_default();
            return self.claim_row(id, &worker_id, transition.at);
        }

        let Some(mut row) = self.executions.get_mut(&id) else {
            return Ok(None);
        };
        if !ExecutionStateMachine::source_states(transition.event).contains(&row.status)
            || !row.holds_claim(&transition)
        {
            return Ok(None);
        }
        row.apply(&transition)?;
        Ok(Some(row.clone()))
    }

    async fn cancel_area(&self, area_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let candidates: Vec<Uuid> = self
            .executions
            .iter()
            .filter(|row| row.area_id == area_id && row.status.is_claimable())
            .map(|row| row.id)
            .collect();

        let mut cancelled = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(mut row) = self.executions.get_mut(&id) {
                if row.status.is_claimable() {
                    row.apply(&ExecutionTransition::cancel(now))?;
                    cancelled.push(id);
                }
            }
        }
        Ok(cancelled)
    }

    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Execution>> {
        let mut stalled: Vec<Execution> = self
            .executions
            .iter()
            .filter(|row| {
                row.status == ExecutionStatus::Running
                    && row.last_attempt_at.is_some_and(|at| at < started_before)
            })
            .map(|row| row.clone())
            .collect();
        stalled.sort_by_key(|e| e.created_at);
        Ok(stalled)
    }

    async fn query(&self, query: &ExecutionQuery) -> Result<Vec<Execution>> {
        let mut rows: Vec<Execution> = self
            .executions
            .iter()
            .filter(|row| query.matches(row))
            .map(|row| row.clone())
            .collect();
        rows.sort_by_key(|e| e.created_at);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn statistics(&self) -> Result<ExecutionStatistics> {
        let mut stats = ExecutionStatistics::default();
        for row in self.executions.iter() {
            stats.record(row.status, 1);
        }
        Ok(stats)
    }
}
