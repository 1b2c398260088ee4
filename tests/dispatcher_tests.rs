mod common;

use area_core::clock::Clock;
use area_core::handlers::HandlerError;
use area_core::models::{Execution, ExecutionQuery, Provider};
use area_core::orchestration::{DispatchOutcome, ErrorCategory, IngestOutcome};
use area_core::state_machine::ExecutionStatus;
use area_core::testing::ScriptedHandler;
use common::{issue_opened, test_config, Harness, IssueArea};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Harness with a single trigger -> Slack link and the given Slack handler
async fn single_reaction(handler: Arc<ScriptedHandler>) -> (Harness, Uuid) {
    let h = Harness::new();
    IssueArea::mapped(&h.catalog);
    h.register(Provider::Slack, "send_message", handler);

    let outcome = h.core.ingest(issue_opened(42, "Crash")).await.unwrap();
    let [execution_id] = outcome.execution_ids() else {
        panic!("expected exactly one execution, got {outcome:?}");
    };
    let execution_id = *execution_id;
    (h, execution_id)
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let handler = Arc::new(
        ScriptedHandler::succeeding(json!({"ts": "1700000000.000100"}))
            .then(Err(HandlerError::network("connection reset")))
            .then(Err(HandlerError::network("connection reset"))),
    );
    let (h, id) = single_reaction(handler.clone()).await;
    let dispatcher = &h.core.dispatcher;

    assert!(matches!(
        dispatcher.process_next("w1").await.unwrap(),
        DispatchOutcome::Retrying { .. }
    ));
    let retrying = h.execution(id).await;
    assert_eq!(retrying.status, ExecutionStatus::Retrying);
    assert_eq!(retrying.attempt, 1);
    assert_eq!(
        retrying.next_retry_at,
        Some(h.clock.now() + chrono::Duration::seconds(1))
    );

    // Not due yet
    assert_eq!(dispatcher.process_next("w1").await.unwrap(), DispatchOutcome::Idle);

    h.clock.advance(Duration::from_secs(1));
    assert!(matches!(
        dispatcher.process_next("w2").await.unwrap(),
        DispatchOutcome::Retrying { .. }
    ));
    assert_eq!(h.execution(id).await.attempt, 2);

    // Second retry backs off for twice as long
    h.clock.advance(Duration::from_secs(1));
    assert_eq!(dispatcher.process_next("w1").await.unwrap(), DispatchOutcome::Idle);
    h.clock.advance(Duration::from_secs(1));
    assert_eq!(
        dispatcher.process_next("w1").await.unwrap(),
        DispatchOutcome::Succeeded { execution_id: id }
    );

    let done = h.execution(id).await;
    assert_eq!(done.status, ExecutionStatus::Succeeded);
    assert_eq!(done.attempt, 3);
    assert_eq!(done.result_payload, Some(json!({"ts": "1700000000.000100"})));
    assert!(done.finished_at.is_some());
    assert_eq!(handler.call_count(), 3);

    // Succeeded executions are never claimed again
    assert_eq!(dispatcher.process_next("w1").await.unwrap(), DispatchOutcome::Idle);
}

#[tokio::test]
async fn test_non_retryable_failure_is_terminal_on_first_attempt() {
    let handler = Arc::new(ScriptedHandler::failing(HandlerError::unauthorized(
        "token revoked",
    )));
    let (h, id) = single_reaction(handler.clone()).await;

    assert_eq!(
        h.core.dispatcher.process_next("w1").await.unwrap(),
        DispatchOutcome::Failed { execution_id: id }
    );

    let failed = h.execution(id).await;
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.attempt, 1);
    let detail = failed.error_detail.unwrap();
    assert_eq!(detail.category, ErrorCategory::Permanent);
    assert_eq!(detail.code, "unauthorized");
    assert_eq!(detail.attempt, 1);

    h.clock.advance(Duration::from_secs(3_600));
    assert_eq!(
        h.core.dispatcher.process_next("w1").await.unwrap(),
        DispatchOutcome::Idle
    );
    assert_eq!(handler.call_count(), 1);
}

#[tokio::test]
async fn test_attempts_are_bounded() {
    let handler = Arc::new(ScriptedHandler::failing(HandlerError::network("down")));
    let (h, id) = single_reaction(handler.clone()).await;
    let max_attempts = test_config().retry.max_attempts;

    let mut last = DispatchOutcome::Idle;
    for _ in 0..max_attempts {
        last = h.core.dispatcher.process_next("w1").await.unwrap();
        h.clock.advance(Duration::from_secs(120));
    }

    assert_eq!(last, DispatchOutcome::Failed { execution_id: id });
    let failed = h.execution(id).await;
    assert_eq!(failed.attempt, max_attempts);
    assert_eq!(handler.call_count() as u32, max_attempts);
    assert_eq!(
        h.core.dispatcher.process_next("w1").await.unwrap(),
        DispatchOutcome::Idle
    );
}

#[tokio::test]
async fn test_rate_limit_honours_retry_after() {
    let handler = Arc::new(
        ScriptedHandler::succeeding(json!({}))
            .then(Err(HandlerError::rate_limited("slow down", Some(Duration::from_secs(30))))),
    );
    let (h, id) = single_reaction(handler).await;

    h.core.dispatcher.process_next("w1").await.unwrap();
    let retrying = h.execution(id).await;
    assert_eq!(
        retrying.next_retry_at,
        Some(h.clock.now() + chrono::Duration::seconds(30))
    );
    assert_eq!(
        retrying.error_detail.map(|d| d.category),
        Some(ErrorCategory::RateLimit)
    );
}

#[tokio::test]
async fn test_handler_timeout_is_retryable() {
    let handler = Arc::new(
        ScriptedHandler::succeeding(json!({"ok": true})).with_delay(Duration::from_millis(1_000)),
    );
    let (h, id) = single_reaction(handler).await;

    let outcome = h.core.dispatcher.process_next("w1").await.unwrap();

    assert!(matches!(outcome, DispatchOutcome::Retrying { .. }));
    let detail = h.execution(id).await.error_detail.unwrap();
    assert_eq!(detail.category, ErrorCategory::Timeout);
    assert_eq!(detail.code, "timeout");
}

#[tokio::test]
async fn test_missing_handler_fails_as_configuration_error() {
    let h = Harness::new();
    IssueArea::fan_out(&h.catalog);
    h.register(
        Provider::Slack,
        "send_message",
        Arc::new(ScriptedHandler::succeeding(json!({}))),
    );

    h.core.ingest(issue_opened(1, "Crash")).await.unwrap();
    let first = h.core.dispatcher.process_next("w1").await.unwrap();
    let second = h.core.dispatcher.process_next("w1").await.unwrap();

    let outcomes = [first, second];
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Succeeded { .. }))
            .count(),
        1
    );
    let failed_id = outcomes
        .iter()
        .find_map(|o| match o {
            DispatchOutcome::Failed { execution_id } => Some(*execution_id),
            _ => None,
        })
        .expect("notion reaction has no handler");
    let detail = h.execution(failed_id).await.error_detail.unwrap();
    assert_eq!(detail.category, ErrorCategory::Configuration);
}

#[tokio::test]
async fn test_link_mapping_shapes_handler_input() {
    let handler = Arc::new(ScriptedHandler::succeeding(json!({"ok": true})));
    let (h, _) = single_reaction(handler.clone()).await;

    h.core.dispatcher.process_next("w1").await.unwrap();

    assert_eq!(handler.calls(), vec![json!({"text": "New issue: Crash"})]);
}

#[tokio::test]
async fn test_successful_reaction_feeds_next_link() {
    let slack = Arc::new(ScriptedHandler::succeeding(json!({"ts": "123.456"})));
    let notion = Arc::new(ScriptedHandler::succeeding(json!({"page_id": "p-1"})));
    let h = Harness::new();
    IssueArea::chained(&h.catalog);
    h.register(Provider::Slack, "send_message", slack);
    h.register(Provider::Notion, "create_page", notion.clone());

    let outcome = h.core.ingest(issue_opened(42, "Crash")).await.unwrap();
    let slack_execution = outcome.execution_ids()[0];

    assert_eq!(
        h.core.dispatcher.process_next("w1").await.unwrap(),
        DispatchOutcome::Succeeded {
            execution_id: slack_execution
        }
    );
    assert_eq!(h.core.tracker.statistics().await.unwrap().pending, 1);

    assert!(matches!(
        h.core.dispatcher.process_next("w1").await.unwrap(),
        DispatchOutcome::Succeeded { .. }
    ));

    let calls = notion.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["text"], "New issue: Crash");
    assert_eq!(calls[0]["trigger_result"], json!({"ts": "123.456"}));
    assert_eq!(calls[0]["source_action"], "slack.send_message");
    assert_eq!(
        calls[0]["trigger_execution_id"],
        slack_execution.to_string()
    );
    assert_eq!(h.store.event_count(), 2);
}

#[tokio::test]
async fn test_cancel_area_spares_running_executions() {
    let h = Harness::new();
    let area = IssueArea::fan_out(&h.catalog);
    let outcome = h.core.ingest(issue_opened(9, "Crash")).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Scheduled { .. }));

    let running = h.core.tracker.claim_next("w1").await.unwrap().unwrap();
    let cancelled = h.core.tracker.cancel_area(area.area.id).await.unwrap();

    assert_eq!(cancelled.len(), 1);
    assert_ne!(cancelled[0], running.id);
    assert_eq!(h.execution(cancelled[0]).await.status, ExecutionStatus::Cancelled);
    assert_eq!(h.execution(running.id).await.status, ExecutionStatus::Running);

    let finished = h
        .core
        .tracker
        .record_success(&running, json!({"ok": true}))
        .await
        .unwrap();
    assert_eq!(finished.map(|e| e.status), Some(ExecutionStatus::Succeeded));
}

#[tokio::test]
async fn test_stalled_execution_is_reaped_as_timeout() {
    let (h, id) = single_reaction(Arc::new(ScriptedHandler::succeeding(json!({})))).await;
    h.core.tracker.claim_next("crashed-worker").await.unwrap().unwrap();

    h.clock.advance(Duration::from_secs(5));
    assert_eq!(h.core.dispatcher.reap_stalled().await.unwrap(), 0);

    h.clock.advance(Duration::from_secs(6));
    assert_eq!(h.core.dispatcher.reap_stalled().await.unwrap(), 1);

    let reaped = h.execution(id).await;
    assert_eq!(reaped.status, ExecutionStatus::Retrying);
    assert_eq!(reaped.error_detail.map(|d| d.category), Some(ErrorCategory::Timeout));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_pool_drains_and_shuts_down() {
    let h = Harness::new();
    IssueArea::fan_out(&h.catalog);
    h.register(
        Provider::Slack,
        "send_message",
        Arc::new(ScriptedHandler::succeeding(json!({"ok": true}))),
    );
    h.register(
        Provider::Notion,
        "create_page",
        Arc::new(ScriptedHandler::succeeding(json!({"ok": true}))),
    );

    h.core.start();
    assert!(h.core.dispatcher.is_running());
    h.core.ingest(issue_opened(11, "Crash")).await.unwrap();

    let mut succeeded = 0;
    for _ in 0..250 {
        succeeded = h.core.tracker.statistics().await.unwrap().succeeded;
        if succeeded == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    h.core.shutdown().await;
    assert_eq!(succeeded, 2);
    assert!(!h.core.dispatcher.is_running());
}

#[tokio::test]
async fn test_late_worker_cannot_finish_a_reclaimed_execution() {
    let handler = Arc::new(ScriptedHandler::succeeding(json!({"from": "second"})));
    let (h, id) = single_reaction(handler.clone()).await;
    let first = h.core.tracker.claim_next("slow-worker").await.unwrap().unwrap();

    h.clock.advance(Duration::from_secs(11));
    assert_eq!(h.core.dispatcher.reap_stalled().await.unwrap(), 1);
    h.clock.advance(Duration::from_secs(2));
    let second = h.core.tracker.claim_next("fresh-worker").await.unwrap().unwrap();
    assert_eq!(second.attempt, 2);

    // The slow worker wakes up while attempt 2 is running
    let late = h
        .core
        .tracker
        .record_success(&first, json!({"from": "first"}))
        .await
        .unwrap();
    assert!(late.is_none());
    assert_eq!(h.execution(id).await.status, ExecutionStatus::Running);

    let outcome = h.core.dispatcher.execute_claimed(second).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Succeeded { execution_id: id });

    let finished = h.execution(id).await;
    assert_eq!(finished.result_payload, Some(json!({"from": "second"})));
    assert_eq!(finished.claimed_by.as_deref(), Some("fresh-worker"));
    assert_eq!(handler.call_count(), 1);
}

#[tokio::test]
async fn test_disabled_area_is_not_invoked() {
    let h = Harness::new();
    let area = IssueArea::fan_out(&h.catalog);
    let slack = Arc::new(ScriptedHandler::succeeding(json!({"ok": true})));
    let notion = Arc::new(ScriptedHandler::succeeding(json!({"ok": true})));
    h.register(Provider::Slack, "send_message", slack.clone());
    h.register(Provider::Notion, "create_page", notion.clone());

    let outcome = h.core.ingest(issue_opened(21, "Crash")).await.unwrap();
    assert_eq!(outcome.execution_ids().len(), 2);

    // Flag flipped without going through cancel_area
    h.catalog.set_area_enabled(area.area.id, false);

    let outcome = h.core.dispatcher.process_next("w1").await.unwrap();
    let DispatchOutcome::Failed { execution_id } = outcome else {
        panic!("expected the claimed execution to fail, got {outcome:?}");
    };
    let failed = h.execution(execution_id).await;
    assert_eq!(
        failed.error_detail.map(|d| d.code),
        Some("invalid_configuration".to_string())
    );

    let sibling = other_execution(&h, execution_id).await;
    assert_eq!(sibling.status, ExecutionStatus::Cancelled);
    assert_eq!(
        h.core.dispatcher.process_next("w1").await.unwrap(),
        DispatchOutcome::Idle
    );
    assert_eq!(slack.call_count() + notion.call_count(), 0);
}

#[tokio::test]
async fn test_disabled_target_is_not_invoked() {
    let handler = Arc::new(ScriptedHandler::succeeding(json!({"ok": true})));
    let h = Harness::new();
    let area = IssueArea::mapped(&h.catalog);
    h.register(Provider::Slack, "send_message", handler.clone());
    h.core.ingest(issue_opened(22, "Crash")).await.unwrap();

    h.catalog.set_instance_enabled(area.slack.id, false);

    let outcome = h.core.dispatcher.process_next("w1").await.unwrap();
    assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
    assert_eq!(handler.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_does_not_wait_for_reaper_interval() {
    let mut config = test_config();
    config.dispatcher.reaper_interval_seconds = 60;
    let h = Harness::with_config(config);

    for _ in 0..5 {
        h.core.start();
        let stopped = tokio::time::timeout(Duration::from_secs(2), h.core.shutdown()).await;
        assert!(stopped.is_ok(), "shutdown waited on the reaper sleep");
        assert!(!h.core.dispatcher.is_running());
    }
}

/// The other execution of the fan-out area
async fn other_execution(h: &Harness, execution_id: Uuid) -> Execution {
    let all = h
        .core
        .tracker
        .query(&ExecutionQuery::default())
        .await
        .unwrap();
    let sibling = all
        .into_iter()
        .find(|e| e.id != execution_id)
        .expect("fan-out scheduled two executions");
    h.execution(sibling.id).await
}
