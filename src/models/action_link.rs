use super::ActionInstance;
use crate::orchestration::condition::Condition;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Identity of a link: the area plus source and target positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionLinkId {
    pub area_id: Uuid,
    pub source_position: u32,
    pub target_position: u32,
}

impl fmt::Display for ActionLinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}",
            self.area_id, self.source_position, self.target_position
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    #[default]
    Chain,
    Conditional,
    Parallel,
    Sequential,
}

/// Directed edge from a trigger instance to a reaction instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLink {
    pub area_id: Uuid,
    pub source_position: u32,
    pub target_position: u32,
    pub source_instance_id: Uuid,
    pub target_instance_id: Uuid,
    /// Filter evaluated against the trigger payload; absent means always
    #[serde(default)]
    pub condition: Option<Condition>,
    /// Data mapping applied to the payload before the reaction runs
    #[serde(default)]
    pub mapping: Option<Value>,
    #[serde(default)]
    pub link_type: LinkType,
    #[serde(default)]
    pub order: i32,
}

impl ActionLink {
    /// Unconditional link from `source` to `target` within the source's area
    pub fn between(source: &ActionInstance, target: &ActionInstance) -> Self {
        Self {
            area_id: source.area_id,
            source_position: source.position,
            target_position: target.position,
            source_instance_id: source.id,
            target_instance_id: target.id,
            condition: None,
            mapping: None,
            link_type: LinkType::default(),
            order: 0,
        }
    }

    pub fn id(&self) -> ActionLinkId {
        ActionLinkId {
            area_id: self.area_id,
            source_position: self.source_position,
            target_position: self.target_position,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_mapping(mut self, mapping: Value) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}
