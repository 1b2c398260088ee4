//! # Reaction Chain Builder
//!
//! Expands resolved links into pending executions, one per link, and turns a
//! successful reaction into the delivery that continues the chain. Chains are
//! never expanded eagerly: each hop re-enters the ingestion pipeline as a new
//! event bound to the instance that just reacted.

use crate::clock::Clock;
use crate::constants::chain;
use crate::models::{
    ActionDefinition, ActionInstance, DeliveryMetadata, Event, Execution, IngestionSource,
    RawDelivery,
};
use crate::orchestration::link_resolver::ResolvedLink;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct ReactionChainBuilder {
    clock: Arc<dyn Clock>,
}

impl ReactionChainBuilder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// One pending execution per resolved link, all sharing the event id
    pub fn build(&self, event: &Event, links: &[ResolvedLink]) -> Vec<Execution> {
        let now = self.clock.now();
        links
            .iter()
            .map(|resolved| Execution::pending(&resolved.link, event, now))
            .collect()
    }

    /// Delivery that feeds a successful reaction's output to its own outgoing links.
    ///
    /// The payload is the mapped input the reaction ran with, enriched with the
    /// trigger execution id, the handler result and the producing action.
    pub fn chained_delivery(
        &self,
        execution: &Execution,
        instance: &ActionInstance,
        definition: &ActionDefinition,
        input: &Value,
        result: &Value,
    ) -> RawDelivery {
        let mut payload = match input {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other.clone());
                map
            }
        };
        payload.insert(
            chain::TRIGGER_EXECUTION_ID.to_string(),
            Value::String(execution.id.to_string()),
        );
        payload.insert(chain::TRIGGER_RESULT.to_string(), result.clone());
        payload.insert(
            chain::SOURCE_ACTION.to_string(),
            Value::String(format!("{}.{}", definition.provider, definition.key)),
        );

        let metadata = DeliveryMetadata::new(IngestionSource::Chain, self.clock.now())
            .with_idempotency_key(format!("{}:{}", chain::IDEMPOTENCY_PREFIX, execution.id))
            .for_instance(instance.id);

        RawDelivery::new(
            definition.provider.as_str(),
            definition.key.clone(),
            Value::Object(payload),
            metadata,
        )
    }
}
