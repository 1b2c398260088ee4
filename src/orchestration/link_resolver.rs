//! # Link Resolver
//!
//! Finds the action links an event should fire. Candidate triggers are the
//! instance the delivery was bound to, or else every instance of the event's
//! action definition. A candidate fires when its area and the instance are
//! enabled and one of its activation modes matches the delivery source.
//!
//! Links are excluded (not errored) when their filter is false for the
//! payload or when their target is disabled or missing. All remaining links
//! fire, ordered by `order` then target position.

use crate::catalog::AreaCatalog;
use crate::error::Result;
use crate::models::{ActionInstance, ActionLink, Event};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A link that should fire, with both endpoints resolved
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    pub link: ActionLink,
    pub source: ActionInstance,
    pub target: ActionInstance,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Matched(Vec<ResolvedLink>),
    NoMatchingLink,
}

pub struct LinkResolver {
    catalog: Arc<dyn AreaCatalog>,
}

impl LinkResolver {
    pub fn new(catalog: Arc<dyn AreaCatalog>) -> Self {
        Self { catalog }
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, source = %event.ingestion))]
    pub async fn resolve(&self, event: &Event) -> Result<Resolution> {
        let mut resolved = Vec::new();

        for source in self.armed_triggers(event).await? {
            for link in self.catalog.outgoing_links(source.id).await? {
                if let Some(condition) = &link.condition {
                    if !condition.evaluate(&event.raw_payload) {
                        debug!(link = %link.id(), "Link filter excluded event");
                        continue;
                    }
                }

                let target = match self.catalog.instance(link.target_instance_id).await? {
                    Some(target) if target.enabled => target,
                    Some(_) => {
                        debug!(link = %link.id(), "Link target disabled");
                        continue;
                    }
                    None => {
                        warn!(link = %link.id(), target = %link.target_instance_id, "Link target missing from catalog");
                        continue;
                    }
                };

                resolved.push(ResolvedLink {
                    link,
                    source: source.clone(),
                    target,
                });
            }
        }

        if resolved.is_empty() {
            return Ok(Resolution::NoMatchingLink);
        }

        resolved.sort_by_key(|r| (r.link.order, r.link.target_position, r.link.area_id));
        debug!(matched = resolved.len(), "Resolved links");
        Ok(Resolution::Matched(resolved))
    }

    async fn armed_triggers(&self, event: &Event) -> Result<Vec<ActionInstance>> {
        let candidates = match event.action_instance_id {
            Some(id) => self.catalog.instance(id).await?.into_iter().collect(),
            None => match self
                .catalog
                .definition_for(event.source_service, &event.source_action_type)
                .await?
            {
                Some(definition) => self.catalog.instances_of(definition.id).await?,
                None => Vec::new(),
            },
        };

        let mut armed = Vec::with_capacity(candidates.len());
        for instance in candidates {
            if !instance.is_armed_for(event.ingestion) {
                continue;
            }
            let area_enabled = self
                .catalog
                .area(instance.area_id)
                .await?
                .is_some_and(|area| area.enabled);
            if area_enabled {
                armed.push(instance);
            }
        }
        Ok(armed)
    }
}
