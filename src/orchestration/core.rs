//! # Orchestration Core
//!
//! Single bootstrap path that wires the ingestion pipeline, execution
//! tracker and dispatcher over one store, one catalogue and one clock.
//!
//! ```text
//! RawDelivery ─▶ IngestionPipeline ─▶ ExecutionTracker ◀─ Dispatcher ─▶ ReactionHandler
//!                       ▲                                     │
//!                       └────────── chained delivery ◀────────┘
//! ```

use crate::catalog::AreaCatalog;
use crate::clock::{Clock, SystemClock};
use crate::config::{AreaConfig, ConfigManager};
use crate::error::{AreaError, Result};
use crate::handlers::HandlerRegistry;
use crate::models::RawDelivery;
use crate::orchestration::chain_builder::ReactionChainBuilder;
use crate::orchestration::deduplicator::Deduplicator;
use crate::orchestration::dispatcher::Dispatcher;
use crate::orchestration::execution_tracker::ExecutionTracker;
use crate::orchestration::link_resolver::LinkResolver;
use crate::orchestration::normalizer::EventNormalizer;
use crate::orchestration::pipeline::{IngestOutcome, IngestionPipeline};
use crate::orchestration::retry_manager::RetryManager;
use crate::store::{DedupStore, EventStore, ExecutionStore, InMemoryStore};
use std::sync::Arc;
use tracing::info;

pub struct OrchestrationCore {
    /// Normalize, dedup, resolve and schedule deliveries
    pub pipeline: Arc<IngestionPipeline>,

    /// Execution lifecycle over the store
    pub tracker: Arc<ExecutionTracker>,

    /// Worker pool running reactions
    pub dispatcher: Arc<Dispatcher>,

    /// Read-only view of areas, instances and links
    pub catalog: Arc<dyn AreaCatalog>,

    config: AreaConfig,
}

impl OrchestrationCore {
    /// Wire every component over `store`
    pub fn from_parts<S>(
        config: AreaConfig,
        catalog: Arc<dyn AreaCatalog>,
        store: Arc<S>,
        handlers: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self>
    where
        S: DedupStore + EventStore + ExecutionStore + 'static,
    {
        config.validate().map_err(AreaError::from)?;

        let dedup_store: Arc<dyn DedupStore> = store.clone();
        let event_store: Arc<dyn EventStore> = store.clone();
        let execution_store: Arc<dyn ExecutionStore> = store;

        let tracker = Arc::new(ExecutionTracker::new(execution_store, clock.clone()));
        let pipeline = Arc::new(IngestionPipeline::new(
            EventNormalizer::new(catalog.clone(), &config.dedup),
            Deduplicator::new(dedup_store, catalog.clone(), clock.clone(), &config.dedup),
            LinkResolver::new(catalog.clone()),
            Arc::new(ReactionChainBuilder::new(clock)),
            tracker.clone(),
            event_store,
        ));
        let dispatcher = Arc::new(
            Dispatcher::new(
                config.dispatcher.clone(),
                tracker.clone(),
                catalog.clone(),
                handlers,
                RetryManager::new(config.retry.clone()),
            )
            .with_chaining(pipeline.clone()),
        );

        info!(
            worker_count = config.dispatcher.worker_count,
            max_attempts = config.retry.max_attempts,
            "🔧 Orchestration core initialized"
        );

        Ok(Self {
            pipeline,
            tracker,
            dispatcher,
            catalog,
            config,
        })
    }

    /// Single-process core backed by [`InMemoryStore`] and the system clock
    pub fn in_memory(
        config_manager: &ConfigManager,
        catalog: Arc<dyn AreaCatalog>,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Self> {
        Self::from_parts(
            config_manager.config().clone(),
            catalog,
            Arc::new(InMemoryStore::new()),
            handlers,
            Arc::new(SystemClock),
        )
    }

    /// Durable core backed by PostgreSQL at `database.url`
    #[cfg(feature = "postgres")]
    pub async fn with_postgres(
        config_manager: &ConfigManager,
        catalog: Arc<dyn AreaCatalog>,
        handlers: Arc<HandlerRegistry>,
    ) -> Result<Self> {
        let config = config_manager.config();
        let store = crate::store::PgStore::connect(&config.database).await?;
        if config.database.run_migrations {
            store.migrate().await?;
        }
        info!(environment = config_manager.environment(), "📊 Using PostgreSQL store");

        Self::from_parts(
            config.clone(),
            catalog,
            Arc::new(store),
            handlers,
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &AreaConfig {
        &self.config
    }

    pub async fn ingest(&self, delivery: RawDelivery) -> Result<IngestOutcome> {
        self.pipeline.ingest(delivery).await
    }

    pub fn start(&self) {
        self.dispatcher.start();
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
