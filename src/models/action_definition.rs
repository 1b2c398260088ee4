use super::Provider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// How repeat deliveries of a trigger are recognised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum DedupStrategy {
    /// Every delivery is accepted
    None,
    /// Accepted iff the dedup key has never been seen
    #[default]
    ByKey,
    /// Accepted iff the payload content hash has never been seen
    ByContentHash,
    /// Accepted iff the dedup key was not seen within the window
    ByKeyWindowed { ttl_seconds: u64 },
}

impl DedupStrategy {
    pub fn windowed(ttl: Duration) -> Self {
        Self::ByKeyWindowed {
            ttl_seconds: ttl.as_secs(),
        }
    }

    /// Expiry applied to recorded keys; `None` means forever
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::ByKeyWindowed { ttl_seconds } => Some(Duration::from_secs(*ttl_seconds)),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ByKey => "by_key",
            Self::ByContentHash => "by_content_hash",
            Self::ByKeyWindowed { .. } => "by_key_windowed",
        }
    }
}

/// Catalogue entry describing a trigger or reaction type. Read-only at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: Uuid,
    pub provider: Provider,
    /// Action type within the provider, e.g. `push` or `send_message`
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub input_schema: Value,
    /// JSON-schema-like description of trigger payloads; its `required`
    /// array lists fields a payload must carry to be recognised
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default)]
    pub is_event_capable: bool,
    #[serde(default)]
    pub is_executable: bool,
    #[serde(default)]
    pub dedup: DedupStrategy,
    /// Dot path of the payload field holding the provider's natural event id
    #[serde(default)]
    pub idempotency_key_path: Option<String>,
    /// Extra payload fields ignored when hashing, on top of the global list
    #[serde(default)]
    pub volatile_fields: Vec<String>,
}

impl ActionDefinition {
    /// Trigger definition with no schema constraints
    pub fn trigger(provider: Provider, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            id: Uuid::new_v4(),
            provider,
            name: key.clone(),
            key,
            input_schema: Value::Null,
            output_schema: Value::Null,
            is_event_capable: true,
            is_executable: false,
            dedup: DedupStrategy::default(),
            idempotency_key_path: None,
            volatile_fields: Vec::new(),
        }
    }

    /// Reaction definition with no schema constraints
    pub fn reaction(provider: Provider, key: impl Into<String>) -> Self {
        Self {
            is_event_capable: false,
            is_executable: true,
            ..Self::trigger(provider, key)
        }
    }

    pub fn with_dedup(mut self, dedup: DedupStrategy) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_output_schema(mut self, output_schema: Value) -> Self {
        self.output_schema = output_schema;
        self
    }

    pub fn with_idempotency_key_path(mut self, path: impl Into<String>) -> Self {
        self.idempotency_key_path = Some(path.into());
        self
    }

    /// Fields listed in `output_schema.required`
    pub fn required_output_fields(&self) -> Vec<&str> {
        self.output_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}
