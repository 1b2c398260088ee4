#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Area Core
//!
//! Orchestration core for action-reaction automations ("areas"). A trigger
//! delivery from a provider (webhook, poll, cron tick, manual run, or the
//! output of a previous reaction) is normalized into an event, deduplicated,
//! matched against the links of every armed trigger instance, and expanded
//! into tracked executions that a worker pool runs with retries.
//!
//! ## Module Organization
//!
//! - [`models`] - Providers, definitions, instances, links, events, executions
//! - [`catalog`] - Read-only view of configured areas
//! - [`orchestration`] - Normalizer, deduplicator, resolver, chain builder,
//!   tracker, dispatcher and retry manager
//! - [`state_machine`] - Execution lifecycle transitions
//! - [`store`] - Persistence contracts with in-memory and PostgreSQL backends
//! - [`handlers`] - Reaction handler trait and registry
//! - [`mapping`] - Link data mapping from trigger payload to reaction input
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use area_core::catalog::InMemoryCatalog;
//! use area_core::config::ConfigManager;
//! use area_core::handlers::HandlerRegistry;
//! use area_core::orchestration::OrchestrationCore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! area_core::logging::init_structured_logging();
//! let config = ConfigManager::load()?;
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let handlers = Arc::new(HandlerRegistry::new());
//!
//! let core = OrchestrationCore::in_memory(&config, catalog, handlers)?;
//! core.start();
//! // core.ingest(delivery).await?;
//! core.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod mapping;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod store;
pub mod testing;

pub use catalog::{AreaCatalog, CatalogSnapshot, InMemoryCatalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AreaConfig, ConfigManager};
pub use error::{AreaError, Result};
pub use handlers::{HandlerError, HandlerErrorKind, HandlerKey, HandlerRegistry, ReactionHandler};
pub use models::{
    ActionDefinition, ActionInstance, ActionLink, Area, DeliveryMetadata, Event, Execution,
    IngestionSource, Provider, RawDelivery,
};
pub use orchestration::{IngestOutcome, OrchestrationCore};
pub use state_machine::ExecutionStatus;
