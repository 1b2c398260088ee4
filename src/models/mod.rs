//! # Domain Models
//!
//! Catalogue entities (definitions, instances, links, areas) are read-only
//! inputs to the core. Events and executions are produced by it.

pub mod action_definition;
pub mod action_instance;
pub mod action_link;
pub mod area;
pub mod event;
pub mod execution;
pub mod provider;

pub use action_definition::{ActionDefinition, DedupStrategy};
pub use action_instance::{ActionInstance, ActivationMode};
pub use action_link::{ActionLink, ActionLinkId, LinkType};
pub use area::Area;
pub use event::{DeliveryMetadata, Event, IngestionSource, RawDelivery};
pub use execution::{
    ErrorDetail, Execution, ExecutionQuery, ExecutionStatistics, ExecutionTransition,
};
pub use provider::Provider;
