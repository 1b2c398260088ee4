//! # Ingestion Pipeline
//!
//! Normalize, deduplicate, resolve, then schedule. Every delivery ends in
//! exactly one [`IngestOutcome`]; only infrastructure faults surface as
//! errors. A fault after admission releases the dedup key and cancels any
//! executions already created, so the provider's redelivery is processed.

use crate::constants::operations;
use crate::error::Result;
use crate::logging::log_ingestion_operation;
use crate::models::{Event, RawDelivery};
use crate::orchestration::chain_builder::ReactionChainBuilder;
use crate::orchestration::deduplicator::{Admission, Deduplicator};
use crate::orchestration::execution_tracker::ExecutionTracker;
use crate::orchestration::link_resolver::{LinkResolver, Resolution};
use crate::orchestration::normalizer::{EventNormalizer, NormalizationError};
use crate::store::EventStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// The delivery could not be normalized
    Rejected { reason: String },
    /// An equivalent event was already admitted
    Duplicate { dedup_key: String },
    /// Admitted, but no enabled link fires for it
    NoMatchingLink { event_id: Uuid },
    /// One pending execution per fired link
    Scheduled {
        event_id: Uuid,
        execution_ids: Vec<Uuid>,
    },
}

impl IngestOutcome {
    pub fn execution_ids(&self) -> &[Uuid] {
        match self {
            Self::Scheduled { execution_ids, .. } => execution_ids,
            _ => &[],
        }
    }
}

pub struct IngestionPipeline {
    normalizer: EventNormalizer,
    deduplicator: Deduplicator,
    resolver: LinkResolver,
    chain_builder: Arc<ReactionChainBuilder>,
    tracker: Arc<ExecutionTracker>,
    events: Arc<dyn EventStore>,
}

impl IngestionPipeline {
    pub fn new(
        normalizer: EventNormalizer,
        deduplicator: Deduplicator,
        resolver: LinkResolver,
        chain_builder: Arc<ReactionChainBuilder>,
        tracker: Arc<ExecutionTracker>,
        events: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            normalizer,
            deduplicator,
            resolver,
            chain_builder,
            tracker,
            events,
        }
    }

    pub fn chain_builder(&self) -> &ReactionChainBuilder {
        &self.chain_builder
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.tracker
    }

    #[instrument(skip(self, delivery), fields(provider = %delivery.provider, action_type = %delivery.action_type, source = %delivery.metadata.source))]
    pub async fn ingest(&self, delivery: RawDelivery) -> Result<IngestOutcome> {
        let provider = delivery.provider.clone();
        let action_type = delivery.action_type.clone();

        let event = match self.normalizer.normalize(delivery).await {
            Ok(event) => event,
            Err(NormalizationError::Store(e)) => return Err(e),
            Err(e) => {
                let reason = e.to_string();
                log_ingestion_operation(
                    operations::EVENT_REJECTED,
                    &provider,
                    &action_type,
                    None,
                    Some(&reason),
                );
                return Ok(IngestOutcome::Rejected { reason });
            }
        };

        if self.deduplicator.admit(&event).await? == Admission::Duplicate {
            log_ingestion_operation(
                operations::EVENT_DUPLICATE,
                &provider,
                &action_type,
                Some(event.id),
                Some(&event.dedup_key),
            );
            return Ok(IngestOutcome::Duplicate {
                dedup_key: event.dedup_key,
            });
        }

        let mut created = Vec::new();
        let scheduled = self
            .schedule(&event, &provider, &action_type, &mut created)
            .await;
        if scheduled.is_err() {
            self.release(&event, &created).await;
        }
        scheduled
    }

    /// Persist an admitted event and create its executions. Ids are pushed to
    /// `created` as they are inserted.
    async fn schedule(
        &self,
        event: &Event,
        provider: &str,
        action_type: &str,
        created: &mut Vec<Uuid>,
    ) -> Result<IngestOutcome> {
        self.events.append(event).await?;

        let links = match self.resolver.resolve(event).await? {
            Resolution::Matched(links) => links,
            Resolution::NoMatchingLink => {
                log_ingestion_operation(
                    operations::EVENT_UNMATCHED,
                    provider,
                    action_type,
                    Some(event.id),
                    None,
                );
                return Ok(IngestOutcome::NoMatchingLink { event_id: event.id });
            }
        };

        for execution in self.chain_builder.build(event, &links) {
            let execution = self.tracker.create_pending(execution).await?;
            created.push(execution.id);
        }

        let details = format!("{} execution(s)", created.len());
        log_ingestion_operation(
            operations::EVENT_SCHEDULED,
            provider,
            action_type,
            Some(event.id),
            Some(&details),
        );

        Ok(IngestOutcome::Scheduled {
            event_id: event.id,
            execution_ids: created.clone(),
        })
    }

    /// Undo admission after a failed schedule so a redelivery is not dropped
    /// as a duplicate
    async fn release(&self, event: &Event, created: &[Uuid]) {
        for id in created {
            if let Err(e) = self.tracker.cancel(*id).await {
                warn!(event_id = %event.id, execution_id = %id, error = %e, "Failed to cancel execution of a failed ingest");
            }
        }
        match self.deduplicator.forget(event).await {
            Ok(_) => debug!(event_id = %event.id, dedup_key = %event.dedup_key, "Released dedup key after failed ingest"),
            Err(e) => {
                warn!(event_id = %event.id, dedup_key = %event.dedup_key, error = %e, "Failed to release dedup key; redelivery will be treated as a duplicate");
            }
        }
    }
}
