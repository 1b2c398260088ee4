//! # Area Catalog
//!
//! Read-only view of action definitions, areas, instances and links as the
//! orchestration core sees them. Authoring (and graph validation) happens
//! outside the core; [`InMemoryCatalog`] holds a snapshot of the result.

use crate::config::ConfigurationError;
use crate::error::Result;
use crate::models::{ActionDefinition, ActionInstance, ActionLink, ActionLinkId, Area, Provider};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

#[async_trait]
pub trait AreaCatalog: Send + Sync {
    /// Definition for a provider's action type
    async fn definition_for(
        &self,
        provider: Provider,
        action_type: &str,
    ) -> Result<Option<ActionDefinition>>;

    async fn definition(&self, id: Uuid) -> Result<Option<ActionDefinition>>;

    async fn instance(&self, id: Uuid) -> Result<Option<ActionInstance>>;

    /// Every instance of a definition, across all areas
    async fn instances_of(&self, definition_id: Uuid) -> Result<Vec<ActionInstance>>;

    async fn area(&self, id: Uuid) -> Result<Option<Area>>;

    /// Links whose source is `instance_id`
    async fn outgoing_links(&self, instance_id: Uuid) -> Result<Vec<ActionLink>>;

    async fn link(&self, id: &ActionLinkId) -> Result<Option<ActionLink>>;
}

/// Serializable catalogue contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSnapshot {
    pub definitions: Vec<ActionDefinition>,
    pub areas: Vec<Area>,
    pub instances: Vec<ActionInstance>,
    pub links: Vec<ActionLink>,
}

#[derive(Debug, Default)]
struct CatalogState {
    definitions: HashMap<Uuid, ActionDefinition>,
    definitions_by_key: HashMap<(Provider, String), Uuid>,
    areas: HashMap<Uuid, Area>,
    instances: HashMap<Uuid, ActionInstance>,
    links: BTreeMap<ActionLinkId, ActionLink>,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let catalog = Self::new();
        for definition in snapshot.definitions {
            catalog.add_definition(definition);
        }
        for area in snapshot.areas {
            catalog.add_area(area);
        }
        for instance in snapshot.instances {
            catalog.add_instance(instance);
        }
        for link in snapshot.links {
            catalog.add_link(link);
        }
        catalog
    }

    /// Load a JSON snapshot from disk
    pub fn load_snapshot_file(path: &Path) -> std::result::Result<Self, ConfigurationError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::load_error(path.display().to_string(), e))?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&raw)
            .map_err(|e| ConfigurationError::invalid_snapshot(path.display().to_string(), e))?;

        info!(
            path = %path.display(),
            definitions = snapshot.definitions.len(),
            areas = snapshot.areas.len(),
            links = snapshot.links.len(),
            "Loaded catalog snapshot"
        );

        Ok(Self::from_snapshot(snapshot))
    }

    pub fn add_definition(&self, definition: ActionDefinition) {
        let mut state = self.state.write();
        state
            .definitions_by_key
            .insert((definition.provider, definition.key.clone()), definition.id);
        state.definitions.insert(definition.id, definition);
    }

    pub fn add_area(&self, area: Area) {
        self.state.write().areas.insert(area.id, area);
    }

    pub fn add_instance(&self, instance: ActionInstance) {
        self.state.write().instances.insert(instance.id, instance);
    }

    pub fn add_link(&self, link: ActionLink) {
        self.state.write().links.insert(link.id(), link);
    }

    /// Returns false when the area is unknown
    pub fn set_area_enabled(&self, area_id: Uuid, enabled: bool) -> bool {
        match self.state.write().areas.get_mut(&area_id) {
            Some(area) => {
                area.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Returns false when the instance is unknown
    pub fn set_instance_enabled(&self, instance_id: Uuid, enabled: bool) -> bool {
        match self.state.write().instances.get_mut(&instance_id) {
            Some(instance) => {
                instance.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        let state = self.state.read();
        CatalogSnapshot {
            definitions: state.definitions.values().cloned().collect(),
            areas: state.areas.values().cloned().collect(),
            instances: state.instances.values().cloned().collect(),
            links: state.links.values().cloned().collect(),
        }
    }
}

#[async_trait]
impl AreaCatalog for InMemoryCatalog {
    async fn definition_for(
        &self,
        provider: Provider,
        action_type: &str,
    ) -> Result<Option<ActionDefinition>> {
        let state = self.state.read();
        Ok(state
            .definitions_by_key
            .get(&(provider, action_type.to_string()))
            .and_then(|id| state.definitions.get(id))
            .cloned())
    }

    async fn definition(&self, id: Uuid) -> Result<Option<ActionDefinition>> {
        Ok(self.state.read().definitions.get(&id).cloned())
    }

    async fn instance(&self, id: Uuid) -> Result<Option<ActionInstance>> {
        Ok(self.state.read().instances.get(&id).cloned())
    }

    async fn instances_of(&self, definition_id: Uuid) -> Result<Vec<ActionInstance>> {
        let mut instances: Vec<ActionInstance> = self
            .state
            .read()
            .instances
            .values()
            .filter(|i| i.definition_id == definition_id)
            .cloned()
            .collect();
        instances.sort_by_key(|i| (i.area_id, i.position));
        Ok(instances)
    }

    async fn area(&self, id: Uuid) -> Result<Option<Area>> {
        Ok(self.state.read().areas.get(&id).cloned())
    }

    async fn outgoing_links(&self, instance_id: Uuid) -> Result<Vec<ActionLink>> {
        Ok(self
            .state
            .read()
            .links
            .values()
            .filter(|l| l.source_instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn link(&self, id: &ActionLinkId) -> Result<Option<ActionLink>> {
        Ok(self.state.read().links.get(id).cloned())
    }
}
