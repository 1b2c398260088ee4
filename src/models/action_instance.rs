use super::IngestionSource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a trigger instance is armed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivationMode {
    Webhook,
    /// Polled by an external scheduler; interval and change detection are
    /// confirmed before the delivery reaches the core
    Poll { interval_seconds: u64 },
    Cron { schedule: String },
    Manual,
    /// Armed by an upstream link feeding this instance's output forward
    Chain,
}

impl ActivationMode {
    /// Whether a delivery from `source` fires a trigger armed in this mode
    pub fn accepts(&self, source: IngestionSource) -> bool {
        matches!(
            (self, source),
            (Self::Webhook, IngestionSource::Webhook)
                | (Self::Poll { .. }, IngestionSource::Poll)
                | (Self::Cron { .. }, IngestionSource::Cron)
                | (Self::Manual, IngestionSource::Manual)
                | (Self::Chain, IngestionSource::Chain)
        )
    }
}

/// A configured occurrence of an action definition inside an area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInstance {
    pub id: Uuid,
    pub area_id: Uuid,
    pub definition_id: Uuid,
    pub name: String,
    /// Position of the instance within its area's graph
    pub position: u32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// User-supplied parameters handed to the reaction handler
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub activation_modes: Vec<ActivationMode>,
}

fn enabled_by_default() -> bool {
    true
}

impl ActionInstance {
    pub fn new(area_id: Uuid, definition_id: Uuid, name: impl Into<String>, position: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            area_id,
            definition_id,
            name: name.into(),
            position,
            enabled: true,
            params: Value::Null,
            activation_modes: Vec::new(),
        }
    }

    pub fn with_activation(mut self, mode: ActivationMode) -> Self {
        self.activation_modes.push(mode);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Whether this instance fires for deliveries from `source`.
    ///
    /// Chained deliveries are armed by the upstream link that produced them,
    /// so any enabled instance accepts them.
    pub fn is_armed_for(&self, source: IngestionSource) -> bool {
        if !self.enabled {
            return false;
        }
        source == IngestionSource::Chain || self.activation_modes.iter().any(|m| m.accepts(source))
    }
}
