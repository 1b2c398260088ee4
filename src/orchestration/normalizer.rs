//! # Event Normalizer
//!
//! Turns raw provider deliveries into canonical [`Event`]s. A delivery is
//! rejected (never silently dropped) when its provider is unknown, when the
//! catalogue has no event-capable definition for its action type, or when the
//! payload lacks fields the definition's output schema requires.
//!
//! Dedup key precedence: delivery idempotency key, then the value at the
//! definition's natural-key path, then the content hash.

use crate::catalog::AreaCatalog;
use crate::config::DedupConfig;
use crate::error::AreaError;
use crate::models::{ActionDefinition, Event, IngestionSource, Provider, RawDelivery};
use crate::orchestration::condition::{lookup, value_as_text};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NormalizationError {
    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Unrecognized payload for {provider}.{action_type}: {reason}")]
    UnrecognizedPayload {
        provider: String,
        action_type: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] AreaError),
}

impl NormalizationError {
    fn unrecognized(delivery: &RawDelivery, reason: impl Into<String>) -> Self {
        Self::UnrecognizedPayload {
            provider: delivery.provider.clone(),
            action_type: delivery.action_type.clone(),
            reason: reason.into(),
        }
    }
}

pub struct EventNormalizer {
    catalog: Arc<dyn AreaCatalog>,
    volatile_fields: Vec<String>,
}

impl EventNormalizer {
    pub fn new(catalog: Arc<dyn AreaCatalog>, config: &DedupConfig) -> Self {
        Self {
            catalog,
            volatile_fields: config.volatile_fields.clone(),
        }
    }

    #[instrument(skip(self, delivery), fields(provider = %delivery.provider, action_type = %delivery.action_type))]
    pub async fn normalize(&self, delivery: RawDelivery) -> Result<Event, NormalizationError> {
        let provider: Provider = delivery.provider.parse().map_err(|_| {
            warn!("Rejecting delivery from unknown provider");
            NormalizationError::UnknownProvider(delivery.provider.clone())
        })?;

        let definition = self
            .catalog
            .definition_for(provider, &delivery.action_type)
            .await?
            .ok_or_else(|| NormalizationError::unrecognized(&delivery, "no action definition"))
            .inspect_err(|e| warn!(error = %e, "Rejecting delivery"))?;

        self.validate(&definition, &delivery)
            .inspect_err(|e| warn!(error = %e, "Rejecting delivery"))?;

        let content_hash = content_hash(&delivery.payload, &self.volatile_for(&definition));
        let dedup_key = delivery
            .metadata
            .idempotency_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| natural_key(&definition, &delivery.payload))
            .unwrap_or_else(|| content_hash.clone());

        let event = Event {
            id: Uuid::new_v4(),
            source_service: provider,
            source_action_type: delivery.action_type,
            occurred_at: delivery.metadata.received_at,
            raw_payload: delivery.payload,
            dedup_key,
            content_hash,
            ingestion: delivery.metadata.source,
            action_instance_id: delivery.metadata.action_instance_id,
        };

        debug!(event_id = %event.id, dedup_key = %event.dedup_key, "Normalized delivery");
        Ok(event)
    }

    fn validate(
        &self,
        definition: &ActionDefinition,
        delivery: &RawDelivery,
    ) -> Result<(), NormalizationError> {
        let Some(payload) = delivery.payload.as_object() else {
            return Err(NormalizationError::unrecognized(
                delivery,
                "payload is not a JSON object",
            ));
        };

        // Chained payloads are reaction outputs, not trigger payloads
        if delivery.metadata.source == IngestionSource::Chain {
            return Ok(());
        }

        if !definition.is_event_capable {
            return Err(NormalizationError::unrecognized(
                delivery,
                "action cannot emit events",
            ));
        }

        let missing: Vec<&str> = definition
            .required_output_fields()
            .into_iter()
            .filter(|field| payload.get(*field).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(NormalizationError::unrecognized(
                delivery,
                format!("missing required fields: {}", missing.join(", ")),
            ));
        }

        Ok(())
    }

    fn volatile_for(&self, definition: &ActionDefinition) -> Vec<String> {
        let mut fields = self.volatile_fields.clone();
        fields.extend(definition.volatile_fields.iter().cloned());
        fields
    }
}

fn natural_key(definition: &ActionDefinition, payload: &Value) -> Option<String> {
    let path = definition.idempotency_key_path.as_deref()?;
    lookup(payload, path)
        .filter(|v| !v.is_null())
        .map(value_as_text)
        .filter(|key| !key.is_empty())
}

/// Hex SHA-256 over the canonical form of `payload` without `volatile_fields`.
///
/// The canonical form sorts object keys and drops volatile keys at any depth,
/// so re-deliveries that differ only in timestamps hash identically.
pub fn content_hash(payload: &Value, volatile_fields: &[String]) -> String {
    let mut canonical = String::new();
    write_canonical(payload, volatile_fields, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, volatile_fields: &[String], out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map
                .keys()
                .filter(|k| !volatile_fields.iter().any(|v| v == *k))
                .collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], volatile_fields, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, volatile_fields, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::models::DeliveryMetadata;
    use chrono::Utc;
    use serde_json::json;

    fn normalizer() -> EventNormalizer {
        let catalog = InMemoryCatalog::new();
        catalog.add_definition(
            ActionDefinition::trigger(Provider::Github, "push")
                .with_output_schema(json!({"required": ["repository"]}))
                .with_idempotency_key_path("head_commit.id"),
        );
        catalog.add_definition(ActionDefinition::trigger(Provider::Timer, "tick"));
        catalog.add_definition(ActionDefinition::reaction(Provider::Slack, "send_message"));
        EventNormalizer::new(Arc::new(catalog), &DedupConfig::default())
    }

    fn webhook(provider: &str, action: &str, payload: Value) -> RawDelivery {
        RawDelivery::new(
            provider,
            action,
            payload,
            DeliveryMetadata::new(IngestionSource::Webhook, Utc::now()),
        )
    }

    #[tokio::test]
    async fn test_dedup_key_precedence() {
        let normalizer = normalizer();
        let payload = json!({"repository": "area", "head_commit": {"id": "c0ffee"}});

        let mut with_header = webhook("github", "push", payload.clone());
        with_header.metadata.idempotency_key = Some("delivery-42".to_string());
        let event = normalizer.normalize(with_header).await.unwrap();
        assert_eq!(event.dedup_key, "delivery-42");

        let event = normalizer
            .normalize(webhook("github", "push", payload))
            .await
            .unwrap();
        assert_eq!(event.dedup_key, "c0ffee");

        let event = normalizer
            .normalize(webhook("timer", "tick", json!({"slot": 3})))
            .await
            .unwrap();
        assert_eq!(event.dedup_key, event.content_hash);
    }

    #[tokio::test]
    async fn test_volatile_fields_do_not_change_the_hash() {
        let normalizer = normalizer();

        let first = normalizer
            .normalize(webhook("timer", "tick", json!({"slot": 3, "timestamp": "10:00", "meta": {"received_at": 1}})))
            .await
            .unwrap();
        let second = normalizer
            .normalize(webhook("timer", "tick", json!({"meta": {"received_at": 2}, "timestamp": "10:05", "slot": 3})))
            .await
            .unwrap();

        assert_eq!(first.dedup_key, second.dedup_key);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_rejections() {
        let normalizer = normalizer();

        assert!(matches!(
            normalizer.normalize(webhook("gitlab", "push", json!({}))).await,
            Err(NormalizationError::UnknownProvider(_))
        ));
        assert!(matches!(
            normalizer.normalize(webhook("github", "star", json!({}))).await,
            Err(NormalizationError::UnrecognizedPayload { .. })
        ));
        assert!(matches!(
            normalizer.normalize(webhook("github", "push", json!({"ref": "main"}))).await,
            Err(NormalizationError::UnrecognizedPayload { .. })
        ));
        assert!(matches!(
            normalizer.normalize(webhook("github", "push", json!("not an object"))).await,
            Err(NormalizationError::UnrecognizedPayload { .. })
        ));
        assert!(matches!(
            normalizer.normalize(webhook("slack", "send_message", json!({"text": "hi"}))).await,
            Err(NormalizationError::UnrecognizedPayload { .. })
        ));
    }

    #[test]
    fn test_canonical_form_sorts_keys() {
        let volatile = vec!["timestamp".to_string()];
        assert_eq!(
            content_hash(&json!({"b": [1, {"y": 1, "x": 2}], "a": "s"}), &volatile),
            content_hash(&json!({"a": "s", "b": [1, {"x": 2, "y": 1}], "timestamp": 9}), &volatile)
        );
        assert_ne!(
            content_hash(&json!({"a": [1, 2]}), &volatile),
            content_hash(&json!({"a": [2, 1]}), &volatile)
        );
    }
}
