//! # Orchestration
//!
//! The action-reaction pipeline, in the order a delivery flows through it:
//!
//! - [`normalizer`]: raw provider delivery to canonical event
//! - [`deduplicator`]: atomic first-sighting admission per dedup strategy
//! - [`link_resolver`]: armed triggers and filtered outgoing links
//! - [`chain_builder`]: one pending execution per link, and chained re-entry
//! - [`execution_tracker`]: compare-and-set lifecycle over the store
//! - [`dispatcher`]: worker pool invoking reaction handlers
//! - [`retry_manager`]: failure classification and backoff
//!
//! [`pipeline`] composes the ingestion half and [`core`] wires everything.

pub mod chain_builder;
pub mod condition;
pub mod core;
pub mod deduplicator;
pub mod dispatcher;
pub mod execution_tracker;
pub mod link_resolver;
pub mod normalizer;
pub mod pipeline;
pub mod retry_manager;

pub use chain_builder::ReactionChainBuilder;
pub use condition::{ComparisonOperator, Condition, ConditionError};
pub use core::OrchestrationCore;
pub use deduplicator::{Admission, Deduplicator};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use execution_tracker::{ClaimOutcome, ExecutionTracker};
pub use link_resolver::{LinkResolver, Resolution, ResolvedLink};
pub use normalizer::{content_hash, EventNormalizer, NormalizationError};
pub use pipeline::{IngestOutcome, IngestionPipeline};
pub use retry_manager::{ErrorCategory, RetryDecision, RetryManager, TerminalReason};
