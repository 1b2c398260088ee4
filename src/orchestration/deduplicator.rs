//! # Deduplicator
//!
//! Decides whether an event is a repeat delivery according to the dedup
//! strategy of its action definition. Admission is a single atomic
//! check-and-set in the [`DedupStore`], so concurrent identical deliveries
//! admit exactly one event.

use crate::catalog::AreaCatalog;
use crate::clock::Clock;
use crate::config::DedupConfig;
use crate::error::{AreaError, Result};
use crate::models::{DedupStrategy, Event};
use crate::store::DedupStore;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

pub struct Deduplicator {
    store: Arc<dyn DedupStore>,
    catalog: Arc<dyn AreaCatalog>,
    clock: Arc<dyn Clock>,
    key_prefix: String,
}

impl Deduplicator {
    pub fn new(
        store: Arc<dyn DedupStore>,
        catalog: Arc<dyn AreaCatalog>,
        clock: Arc<dyn Clock>,
        config: &DedupConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            key_prefix: config.key_prefix.clone(),
        }
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, dedup_key = %event.dedup_key))]
    pub async fn admit(&self, event: &Event) -> Result<Admission> {
        let strategy = self.strategy_for(event).await?;

        let key = match strategy {
            DedupStrategy::None => return Ok(Admission::Accepted),
            DedupStrategy::ByContentHash => &event.content_hash,
            DedupStrategy::ByKey | DedupStrategy::ByKeyWindowed { .. } => &event.dedup_key,
        };

        let first_sighting = self
            .store
            .check_and_set(&self.store_key(event, key), self.clock.now(), strategy.ttl())
            .await?;

        let admission = if first_sighting {
            Admission::Accepted
        } else {
            Admission::Duplicate
        };
        debug!(strategy = strategy.name(), ?admission, "Dedup decision");
        Ok(admission)
    }

    /// Remove the recorded key for `event` so an identical delivery is admitted again
    pub async fn forget(&self, event: &Event) -> Result<bool> {
        let key = match self.strategy_for(event).await? {
            DedupStrategy::None => return Ok(false),
            DedupStrategy::ByContentHash => &event.content_hash,
            _ => &event.dedup_key,
        };
        self.store.remove(&self.store_key(event, key)).await
    }

    async fn strategy_for(&self, event: &Event) -> Result<DedupStrategy> {
        self.catalog
            .definition_for(event.source_service, &event.source_action_type)
            .await?
            .map(|definition| definition.dedup)
            .ok_or_else(|| {
                AreaError::CatalogError(format!(
                    "no action definition for {}.{}",
                    event.source_service, event.source_action_type
                ))
            })
    }

    /// `{prefix}:{provider}:{action_type}:{key}`
    fn store_key(&self, event: &Event, key: &str) -> String {
        format!(
            "{}:{}:{}:{}",
            self.key_prefix, event.source_service, event.source_action_type, key
        )
    }
}
