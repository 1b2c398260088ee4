//! # Dispatcher
//!
//! Bounded pool of workers that claim ready executions, map their input,
//! invoke the reaction handler under a timeout and record the outcome. Idle
//! workers park on the tracker's work signal or the poll interval, whichever
//! fires first. A reaper task fails (or retries) executions stuck in
//! `running` past the stall timeout.
//!
//! [`Dispatcher::process_next`] runs exactly one claim-and-execute cycle and
//! is what each worker loops over; tests drive it directly.

use crate::catalog::AreaCatalog;
use crate::config::DispatcherConfig;
use crate::constants::operations;
use crate::error::Result;
use crate::handlers::{HandlerError, HandlerErrorKind, HandlerKey, HandlerRegistry, ReactionHandler};
use crate::logging::log_execution_operation;
use crate::mapping::{DataMapper, TemplateDataMapper};
use crate::models::{ActionDefinition, ActionInstance, Execution};
use crate::orchestration::execution_tracker::ExecutionTracker;
use crate::orchestration::pipeline::IngestionPipeline;
use crate::orchestration::retry_manager::{RetryDecision, RetryManager};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result of one claim-and-execute cycle
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Nothing was ready to claim
    Idle,
    /// The execution changed state underneath this worker
    ConcurrencyConflict { execution_id: Uuid },
    Succeeded { execution_id: Uuid },
    Retrying {
        execution_id: Uuid,
        next_retry_at: DateTime<Utc>,
    },
    Failed { execution_id: Uuid },
}

/// Everything needed to invoke a handler for a claimed execution
struct PreparedReaction {
    target: ActionInstance,
    definition: ActionDefinition,
    key: HandlerKey,
    handler: Arc<dyn ReactionHandler>,
    input: Value,
}

pub struct Dispatcher {
    config: DispatcherConfig,
    tracker: Arc<ExecutionTracker>,
    catalog: Arc<dyn AreaCatalog>,
    handlers: Arc<HandlerRegistry>,
    mapper: Arc<dyn DataMapper>,
    retry: RetryManager,
    pipeline: Option<Arc<IngestionPipeline>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        tracker: Arc<ExecutionTracker>,
        catalog: Arc<dyn AreaCatalog>,
        handlers: Arc<HandlerRegistry>,
        retry: RetryManager,
    ) -> Self {
        Self {
            config,
            tracker,
            catalog,
            handlers,
            mapper: Arc::new(TemplateDataMapper::new()),
            retry,
            pipeline: None,
            running: AtomicBool::new(false),
            shutdown_tx: watch::Sender::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn DataMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Re-ingest successful reactions that have outgoing links
    pub fn with_chaining(mut self, pipeline: Arc<IngestionPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the worker pool and the stall reaper
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Dispatcher already running");
            return;
        }

        self.shutdown_tx.send_replace(false);
        let mut workers = self.workers.lock();
        for index in 0..self.config.worker_count {
            let worker_id = format!("{}-{}-{}", self.config.worker_id_prefix, std::process::id(), index);
            let dispatcher = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                dispatcher.worker_loop(worker_id).await;
            }));
        }

        let dispatcher = Arc::clone(self);
        workers.push(tokio::spawn(async move {
            dispatcher.reaper_loop().await;
        }));

        info!(
            worker_count = self.config.worker_count,
            poll_interval_ms = self.config.poll_interval_ms,
            handler_timeout_ms = self.config.handler_timeout_ms,
            "🚀 Dispatcher started"
        );
    }

    /// Stop claiming new work and wait for in-flight attempts to finish
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        let workers = std::mem::take(&mut *self.workers.lock());
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Dispatcher task ended abnormally");
            }
        }
        info!("Dispatcher stopped");
    }

    async fn worker_loop(&self, worker_id: String) {
        let work_available = self.tracker.work_available();
        let mut shutdown = self.shutdown_tx.subscribe();
        debug!(worker_id = %worker_id, "Worker started");

        while self.is_running() && !*shutdown.borrow_and_update() {
            let idle = match self.process_next(&worker_id).await {
                Ok(DispatchOutcome::Idle) => true,
                Ok(_) => false,
                Err(e) => {
                    error!(worker_id = %worker_id, error = %e, "Dispatch cycle failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = work_available.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval()) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }

        debug!(worker_id = %worker_id, "Worker stopped");
    }

    async fn reaper_loop(&self) {
        let mut shutdown = self.shutdown_tx.subscribe();
        while self.is_running() && !*shutdown.borrow_and_update() {
            // A stop requested mid-sweep stays marked on the receiver
            tokio::select! {
                _ = tokio::time::sleep(self.config.reaper_interval()) => {}
                _ = shutdown.changed() => break,
            }

            match self.reap_stalled().await {
                Ok(0) => {}
                Ok(reaped) => warn!(reaped = reaped, "Reaped stalled executions"),
                Err(e) => error!(error = %e, "Stalled execution sweep failed"),
            }

            if let Ok(stats) = self.tracker.statistics().await {
                debug!(
                    pending = stats.pending,
                    running = stats.running,
                    retrying = stats.retrying,
                    succeeded = stats.succeeded,
                    failed = stats.failed,
                    cancelled = stats.cancelled,
                    "Execution statistics"
                );
            }
        }
    }

    /// Claim one ready execution and run it to its next state
    pub async fn process_next(&self, worker_id: &str) -> Result<DispatchOutcome> {
        match self.tracker.claim_next(worker_id).await? {
            Some(execution) => self.execute_claimed(execution).await,
            None => Ok(DispatchOutcome::Idle),
        }
    }

    /// Run a handler for an execution this worker already holds in `running`
    pub async fn execute_claimed(&self, execution: Execution) -> Result<DispatchOutcome> {
        log_execution_operation(
            operations::EXECUTION_CLAIMED,
            execution.id,
            execution.area_id,
            execution.attempt,
            execution.status.as_str(),
            execution.claimed_by.as_deref(),
        );

        let reaction = match self.prepare(&execution).await? {
            Ok(reaction) => reaction,
            Err(error) => return self.handle_failure(&execution, error).await,
        };

        let timeout = self.config.handler_timeout();
        let result = match tokio::time::timeout(
            timeout,
            reaction.handler.execute(&reaction.target, &reaction.input),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(HandlerError::timeout(format!(
                "handler {} did not finish within {}ms",
                reaction.key,
                timeout.as_millis()
            ))),
        };

        match result {
            Ok(output) => self.handle_success(&execution, &reaction, output).await,
            Err(error) => self.handle_failure(&execution, error).await,
        }
    }

    /// Fail or retry executions stuck in `running`; returns how many were moved
    pub async fn reap_stalled(&self) -> Result<usize> {
        let stalled = self
            .tracker
            .find_stalled(self.config.stalled_execution_timeout())
            .await?;

        let mut reaped = 0;
        for execution in stalled {
            log_execution_operation(
                operations::EXECUTION_STALLED,
                execution.id,
                execution.area_id,
                execution.attempt,
                execution.status.as_str(),
                execution.claimed_by.as_deref(),
            );
            let error = HandlerError::timeout(format!(
                "execution stalled in running for more than {}s",
                self.config.stalled_execution_timeout_seconds
            ));
            let outcome = self.handle_failure(&execution, error).await?;
            if !matches!(outcome, DispatchOutcome::ConcurrencyConflict { .. }) {
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    /// Resolve link, area, target, definition, mapping and handler. A disabled
    /// area or target is never invoked. Inner errors are
    /// configuration problems charged to the execution; outer errors are
    /// infrastructure faults.
    async fn prepare(
        &self,
        execution: &Execution,
    ) -> Result<std::result::Result<PreparedReaction, HandlerError>> {
        let Some(link) = self.catalog.link(&execution.action_link_id).await? else {
            return Ok(Err(HandlerError::invalid_configuration(format!(
                "link {} no longer exists",
                execution.action_link_id
            ))));
        };
        if !self
            .catalog
            .area(execution.area_id)
            .await?
            .is_some_and(|area| area.enabled)
        {
            // Sweep siblings that were scheduled after the area was switched off
            let cancelled = self.tracker.cancel_area(execution.area_id).await?;
            warn!(
                execution_id = %execution.id,
                area_id = %execution.area_id,
                cancelled = cancelled.len(),
                "Claimed execution belongs to a disabled or removed area"
            );
            return Ok(Err(HandlerError::invalid_configuration(format!(
                "area {} is disabled",
                execution.area_id
            ))));
        }
        let Some(target) = self.catalog.instance(execution.target_instance_id).await? else {
            return Ok(Err(HandlerError::invalid_configuration(format!(
                "target instance {} no longer exists",
                execution.target_instance_id
            ))));
        };
        if !target.enabled {
            return Ok(Err(HandlerError::invalid_configuration(format!(
                "target instance {} is disabled",
                target.id
            ))));
        }
        let Some(definition) = self.catalog.definition(target.definition_id).await? else {
            return Ok(Err(HandlerError::invalid_configuration(format!(
                "action definition {} no longer exists",
                target.definition_id
            ))));
        };

        let key = HandlerKey::new(definition.provider, definition.key.clone());
        let Some(handler) = self.handlers.get(&key) else {
            return Ok(Err(HandlerError::new(
                HandlerErrorKind::Unsupported,
                format!("no reaction handler registered for {key}"),
            )));
        };

        let input = match self
            .mapper
            .map(link.mapping.as_ref(), &execution.input_payload)
        {
            Ok(input) => input,
            Err(e) => return Ok(Err(HandlerError::invalid_configuration(e.to_string()))),
        };

        Ok(Ok(PreparedReaction {
            target,
            definition,
            key,
            handler,
            input,
        }))
    }

    async fn handle_success(
        &self,
        execution: &Execution,
        reaction: &PreparedReaction,
        output: Value,
    ) -> Result<DispatchOutcome> {
        let Some(succeeded) = self
            .tracker
            .record_success(execution, output.clone())
            .await?
        else {
            warn!(execution_id = %execution.id, "Execution left running state before success was recorded");
            return Ok(DispatchOutcome::ConcurrencyConflict {
                execution_id: execution.id,
            });
        };

        log_execution_operation(
            operations::EXECUTION_SUCCEEDED,
            succeeded.id,
            succeeded.area_id,
            succeeded.attempt,
            succeeded.status.as_str(),
            Some(reaction.key.to_string().as_str()),
        );

        self.continue_chain(&succeeded, reaction, &output).await?;

        Ok(DispatchOutcome::Succeeded {
            execution_id: succeeded.id,
        })
    }

    async fn continue_chain(
        &self,
        execution: &Execution,
        reaction: &PreparedReaction,
        output: &Value,
    ) -> Result<()> {
        let Some(pipeline) = &self.pipeline else {
            return Ok(());
        };
        if self.catalog.outgoing_links(reaction.target.id).await?.is_empty() {
            return Ok(());
        }

        let delivery = pipeline.chain_builder().chained_delivery(
            execution,
            &reaction.target,
            &reaction.definition,
            &reaction.input,
            output,
        );

        match pipeline.ingest(delivery).await {
            Ok(outcome) => {
                debug!(execution_id = %execution.id, ?outcome, "Chained reaction output");
            }
            // The reaction itself succeeded; only the follow-up hop is lost
            Err(e) => {
                error!(execution_id = %execution.id, error = %e, "Failed to chain reaction output");
            }
        }
        Ok(())
    }

    async fn handle_failure(
        &self,
        execution: &Execution,
        error: HandlerError,
    ) -> Result<DispatchOutcome> {
        let now = self.tracker.now();
        let elapsed = (now - execution.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        match self.retry.decide(execution.attempt, &error, elapsed, now) {
            RetryDecision::RetryAfter { delay, detail } => {
                let next_retry_at =
                    now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                if self
                    .tracker
                    .record_retry(execution, next_retry_at, detail)
                    .await?
                    .is_none()
                {
                    return Ok(DispatchOutcome::ConcurrencyConflict {
                        execution_id: execution.id,
                    });
                }

                warn!(
                    execution_id = %execution.id,
                    attempt = execution.attempt,
                    error_kind = error.kind.as_str(),
                    error = %error.message,
                    retry_in_ms = delay.as_millis() as u64,
                    operation = operations::EXECUTION_RETRYING,
                    "Reaction failed; retry scheduled"
                );
                Ok(DispatchOutcome::Retrying {
                    execution_id: execution.id,
                    next_retry_at,
                })
            }
            RetryDecision::Terminal { reason, detail } => {
                if self
                    .tracker
                    .record_failure(execution, detail)
                    .await?
                    .is_none()
                {
                    return Ok(DispatchOutcome::ConcurrencyConflict {
                        execution_id: execution.id,
                    });
                }

                error!(
                    execution_id = %execution.id,
                    area_id = %execution.area_id,
                    attempt = execution.attempt,
                    reason = ?reason,
                    error_kind = error.kind.as_str(),
                    error = %error.message,
                    operation = operations::EXECUTION_FAILED,
                    "Reaction failed permanently"
                );
                Ok(DispatchOutcome::Failed {
                    execution_id: execution.id,
                })
            }
        }
    }
}
