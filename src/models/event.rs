use super::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// The producer that delivered a trigger payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionSource {
    Webhook,
    Poll,
    Cron,
    Manual,
    /// Output of a successful upstream reaction
    Chain,
}

impl IngestionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Poll => "poll",
            Self::Cron => "cron",
            Self::Manual => "manual",
            Self::Chain => "chain",
        }
    }
}

impl fmt::Display for IngestionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for IngestionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "poll" => Ok(Self::Poll),
            "cron" => Ok(Self::Cron),
            "manual" => Ok(Self::Manual),
            "chain" => Ok(Self::Chain),
            _ => Err(format!("Invalid ingestion source: {s}")),
        }
    }
}

/// Transport-level facts about a delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    pub received_at: DateTime<Utc>,
    pub source: IngestionSource,
    /// Provider-supplied delivery id (e.g. a webhook delivery header)
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Signature already verified upstream; kept for audit only
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    /// Binds the delivery to one trigger instance (polls, cron ticks, chains)
    #[serde(default)]
    pub action_instance_id: Option<Uuid>,
}

impl DeliveryMetadata {
    pub fn new(source: IngestionSource, received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            source,
            idempotency_key: None,
            signature: None,
            nonce: None,
            action_instance_id: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn for_instance(mut self, action_instance_id: Uuid) -> Self {
        self.action_instance_id = Some(action_instance_id);
        self
    }
}

/// A raw, provider-specific delivery as it arrives at the ingestion boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDelivery {
    pub provider: String,
    pub action_type: String,
    pub payload: Value,
    pub metadata: DeliveryMetadata,
}

impl RawDelivery {
    pub fn new(
        provider: impl Into<String>,
        action_type: impl Into<String>,
        payload: Value,
        metadata: DeliveryMetadata,
    ) -> Self {
        Self {
            provider: provider.into(),
            action_type: action_type.into(),
            payload,
            metadata,
        }
    }
}

/// Canonical representation of one trigger occurrence. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub source_service: Provider,
    pub source_action_type: String,
    pub occurred_at: DateTime<Utc>,
    pub raw_payload: Value,
    pub dedup_key: String,
    /// SHA-256 of the payload with volatile fields removed
    pub content_hash: String,
    pub ingestion: IngestionSource,
    pub action_instance_id: Option<Uuid>,
}
