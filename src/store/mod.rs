//! # Persistence Boundary
//!
//! Storage contracts the orchestration core relies on. Every method that
//! arbitrates between concurrent workers is a single atomic operation in the
//! backing store:
//!
//! - dedup admission is a check-and-set, never read-then-write
//! - execution creation is unique on `(action link, triggering event)`
//! - every status change is a compare-and-set on the current status
//!
//! [`memory::InMemoryStore`] backs tests and single-process deployments;
//! [`postgres::PgStore`] is the durable implementation.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use crate::error::Result;
use crate::models::{Event, Execution, ExecutionQuery, ExecutionStatistics, ExecutionTransition};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Record `key` unless it is already present and unexpired.
    ///
    /// Returns `true` when this call recorded the key (first sighting, or the
    /// previous entry had expired at `now`). `ttl = None` never expires.
    async fn check_and_set(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Forget `key`; returns whether an entry existed
    async fn remove(&self, key: &str) -> Result<bool>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Durably append an event; appending the same id twice is a no-op
    async fn append(&self, event: &Event) -> Result<()>;

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>>;
}

/// Result of an idempotent execution insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(Execution),
    /// An execution for the same link and event already exists
    Existing(Execution),
}

impl InsertOutcome {
    pub fn execution(&self) -> &Execution {
        match self {
            Self::Created(e) | Self::Existing(e) => e,
        }
    }

    pub fn into_execution(self) -> Execution {
        match self {
            Self::Created(e) | Self::Existing(e) => e,
        }
    }
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert unless an execution for the same `(action_link_id, triggering_event_id)` exists
    async fn insert_if_absent(&self, execution: Execution) -> Result<InsertOutcome>;

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>>;

    /// Claim a specific execution if it is pending, or retrying and due at `now`.
    /// `None` means another worker won or the execution is not claimable.
    async fn claim(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>)
        -> Result<Option<Execution>>;

    /// Atomically claim the oldest claimable execution
    async fn claim_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Execution>>;

    /// Apply a non-claim transition if the current status allows it.
    /// `None` means the compare-and-set lost.
    async fn transition(
        &self,
        id: Uuid,
        transition: ExecutionTransition,
    ) -> Result<Option<Execution>>;

    /// Cancel every pending or retrying execution of an area; returns the cancelled ids
    async fn cancel_area(&self, area_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Running executions whose last attempt started before `started_before`
    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Execution>>;

    /// Executions matching `query`, oldest first
    async fn query(&self, query: &ExecutionQuery) -> Result<Vec<Execution>>;

    async fn statistics(&self) -> Result<ExecutionStatistics>;
}
