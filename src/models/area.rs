use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user-authored automation owning action instances and links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
}

impl Area {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
        }
    }
}
