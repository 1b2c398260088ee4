//! # System Constants
//!
//! Names and defaults shared across the ingestion and dispatch paths.

/// Structured log operation names emitted by the pipeline and dispatcher
pub mod operations {
    pub const EVENT_REJECTED: &str = "event.rejected";
    pub const EVENT_DUPLICATE: &str = "event.duplicate";
    pub const EVENT_UNMATCHED: &str = "event.unmatched";
    pub const EVENT_SCHEDULED: &str = "event.scheduled";

    pub const EXECUTION_CREATED: &str = "execution.created";
    pub const EXECUTION_CLAIMED: &str = "execution.claimed";
    pub const EXECUTION_SUCCEEDED: &str = "execution.succeeded";
    pub const EXECUTION_RETRYING: &str = "execution.retrying";
    pub const EXECUTION_FAILED: &str = "execution.failed";
    pub const EXECUTION_CANCELLED: &str = "execution.cancelled";
    pub const EXECUTION_STALLED: &str = "execution.stalled";
}

/// Fields added to the payload of a chained event
pub mod chain {
    pub const TRIGGER_EXECUTION_ID: &str = "trigger_execution_id";
    pub const TRIGGER_RESULT: &str = "trigger_result";
    pub const SOURCE_ACTION: &str = "source_action";

    /// Prefix of the idempotency key given to chained deliveries
    pub const IDEMPOTENCY_PREFIX: &str = "chain";
}

/// Default namespace for dedup store keys
pub const DEFAULT_DEDUP_KEY_PREFIX: &str = "dedup";

/// Payload fields ignored when computing content hashes
pub const DEFAULT_VOLATILE_FIELDS: &[&str] =
    &["received_at", "delivered_at", "timestamp", "retry_count"];

/// Lower bound applied to computed backoff when the base delay is at least one second
pub const MIN_RETRY_DELAY_SECS: u64 = 1;

/// Upper bound accepted for `retry.max_attempts`
pub const MAX_RETRY_ATTEMPTS: u32 = 100;
