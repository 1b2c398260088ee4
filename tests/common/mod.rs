//! Shared fixtures for integration tests.
//!
//! [`Harness`] wires an [`OrchestrationCore`] over an in-memory store and a
//! manual clock so retry schedules and dedup windows can be driven without
//! sleeping.

#![allow(dead_code)]

pub mod strategies;

use area_core::catalog::InMemoryCatalog;
use area_core::clock::ManualClock;
use area_core::config::{AreaConfig, DispatcherConfig, RetryConfig};
use area_core::handlers::{HandlerKey, HandlerRegistry};
use area_core::models::{
    ActionDefinition, ActionInstance, ActionLink, ActivationMode, Area, DeliveryMetadata,
    Execution, IngestionSource, Provider, RawDelivery,
};
use area_core::orchestration::OrchestrationCore;
use area_core::error::{AreaError, Result};
use area_core::models::{Event, ExecutionQuery, ExecutionStatistics, ExecutionTransition};
use area_core::store::{DedupStore, EventStore, ExecutionStore, InMemoryStore, InsertOutcome};
use area_core::testing::ScriptedHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Fast, deterministic settings: no jitter, 1s base backoff doubling to 60s
pub fn test_config() -> AreaConfig {
    AreaConfig {
        dispatcher: DispatcherConfig {
            worker_count: 2,
            poll_interval_ms: 20,
            handler_timeout_ms: 200,
            stalled_execution_timeout_seconds: 10,
            reaper_interval_seconds: 1,
            worker_id_prefix: "test-worker".to_string(),
        },
        retry: RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            max_total_elapsed_seconds: 3_600,
            jitter_factor: 0.0,
        },
        ..AreaConfig::default()
    }
}

pub struct Harness {
    pub clock: ManualClock,
    pub catalog: Arc<InMemoryCatalog>,
    pub store: Arc<InMemoryStore>,
    pub handlers: Arc<HandlerRegistry>,
    pub core: Arc<OrchestrationCore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AreaConfig) -> Self {
        let clock = ManualClock::starting_now();
        let catalog = Arc::new(InMemoryCatalog::new());
        let store = Arc::new(InMemoryStore::new());
        let handlers = Arc::new(HandlerRegistry::new());
        let core = OrchestrationCore::from_parts(
            config,
            catalog.clone(),
            store.clone(),
            handlers.clone(),
            Arc::new(clock.clone()),
        )
        .expect("test configuration is valid");

        Self {
            clock,
            catalog,
            store,
            handlers,
            core: Arc::new(core),
        }
    }

    pub fn register(&self, provider: Provider, action: &str, handler: Arc<ScriptedHandler>) {
        self.handlers.register(HandlerKey::new(provider, action), handler);
    }

    pub async fn execution(&self, id: Uuid) -> Execution {
        self.core
            .tracker
            .get(id)
            .await
            .expect("store read")
            .expect("execution exists")
    }
}

/// "When an issue is opened on GitHub, post to Slack and create a Notion page"
pub struct IssueArea {
    pub area: Area,
    pub opened: ActionDefinition,
    pub trigger: ActionInstance,
    pub slack: ActionInstance,
    pub notion: ActionInstance,
}

impl IssueArea {
    /// Area with the trigger and both reaction instances, but no links
    pub fn install(catalog: &InMemoryCatalog) -> Self {
        let area = Area::new("issues to team");
        let opened = ActionDefinition::trigger(Provider::Github, "issue_opened")
            .with_idempotency_key_path("issue.id")
            .with_output_schema(json!({"required": ["issue"]}));
        let send_message = ActionDefinition::reaction(Provider::Slack, "send_message");
        let create_page = ActionDefinition::reaction(Provider::Notion, "create_page");

        let trigger = ActionInstance::new(area.id, opened.id, "issue opened", 0)
            .with_activation(ActivationMode::Webhook)
            .with_activation(ActivationMode::Manual);
        let slack = ActionInstance::new(area.id, send_message.id, "notify channel", 1)
            .with_params(json!({"channel": "#eng"}));
        let notion = ActionInstance::new(area.id, create_page.id, "log issue", 2);

        catalog.add_definition(opened.clone());
        catalog.add_definition(send_message);
        catalog.add_definition(create_page);
        catalog.add_area(area.clone());
        catalog.add_instance(trigger.clone());
        catalog.add_instance(slack.clone());
        catalog.add_instance(notion.clone());

        Self {
            area,
            opened,
            trigger,
            slack,
            notion,
        }
    }

    /// Trigger fans out to both reactions
    pub fn fan_out(catalog: &InMemoryCatalog) -> Self {
        let area = Self::install(catalog);
        catalog.add_link(ActionLink::between(&area.trigger, &area.slack).with_order(0));
        catalog.add_link(ActionLink::between(&area.trigger, &area.notion).with_order(1));
        area
    }

    /// Trigger -> Slack, with the issue title mapped into the message text
    pub fn mapped(catalog: &InMemoryCatalog) -> Self {
        let area = Self::install(catalog);
        catalog.add_link(
            ActionLink::between(&area.trigger, &area.slack)
                .with_mapping(json!({"text": "New issue: {{issue.title}}"})),
        );
        area
    }

    /// Trigger -> Slack -> Notion
    pub fn chained(catalog: &InMemoryCatalog) -> Self {
        let area = Self::mapped(catalog);
        catalog.add_link(ActionLink::between(&area.slack, &area.notion));
        area
    }
}

pub fn issue_payload(id: u64, title: &str) -> Value {
    json!({
        "action": "opened",
        "issue": {"id": id, "title": title, "labels": ["bug"]},
        "delivered_at": Utc::now().to_rfc3339(),
    })
}

pub fn webhook(provider: &str, action: &str, payload: Value) -> RawDelivery {
    RawDelivery::new(
        provider,
        action,
        payload,
        DeliveryMetadata::new(IngestionSource::Webhook, Utc::now()),
    )
}

pub fn issue_opened(id: u64, title: &str) -> RawDelivery {
    webhook("github", "issue_opened", issue_payload(id, title))
}

/// In-memory store that fails chosen writes with a store error
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    failing_appends: AtomicUsize,
    inserts: AtomicUsize,
    failing_insert: AtomicUsize,
}

impl FlakyStore {
    /// Fail the next `count` event appends
    pub fn fail_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Fail the `nth` execution insert from now on (1-based)
    pub fn fail_insert(&self, nth: usize) {
        self.inserts.store(0, Ordering::SeqCst);
        self.failing_insert.store(nth, Ordering::SeqCst);
    }
}

#[async_trait]
impl DedupStore for FlakyStore {
    async fn check_and_set(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.inner.check_and_set(key, now, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.inner.remove(key).await
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn append(&self, event: &Event) -> Result<()> {
        let failing = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AreaError::StoreError("event log unavailable".to_string()));
        }
        self.inner.append(event).await
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        self.inner.get_event(id).await
    }
}

#[async_trait]
impl ExecutionStore for FlakyStore {
    async fn insert_if_absent(&self, execution: Execution) -> Result<InsertOutcome> {
        let nth = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if nth == self.failing_insert.load(Ordering::SeqCst) {
            return Err(AreaError::StoreError("execution insert failed".to_string()));
        }
        self.inner.insert_if_absent(execution).await
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        self.inner.get_execution(id).await
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>> {
        self.inner.claim(id, worker_id, now).await
    }

    async fn claim_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Execution>> {
        self.inner.claim_next(worker_id, now).await
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: ExecutionTransition,
    ) -> Result<Option<Execution>> {
        self.inner.transition(id, transition).await
    }

    async fn cancel_area(&self, area_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        self.inner.cancel_area(area_id, now).await
    }

    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Execution>> {
        self.inner.find_stalled(started_before).await
    }

    async fn query(&self, query: &ExecutionQuery) -> Result<Vec<Execution>> {
        self.inner.query(query).await
    }

    async fn statistics(&self) -> Result<ExecutionStatistics> {
        self.inner.statistics().await
    }
}

/// Core over a [`FlakyStore`], with the same catalog wiring as [`Harness`]
pub fn flaky_core(catalog: Arc<InMemoryCatalog>, store: Arc<FlakyStore>) -> OrchestrationCore {
    OrchestrationCore::from_parts(
        test_config(),
        catalog,
        store,
        Arc::new(HandlerRegistry::new()),
        Arc::new(ManualClock::starting_now()),
    )
    .expect("test configuration is valid")
}
