//! PostgreSQL store.
//!
//! Dedup admission is one `INSERT .. ON CONFLICT .. DO UPDATE .. WHERE expired`
//! statement. Execution claims and transitions lock the row (`FOR UPDATE`,
//! `SKIP LOCKED` when picking the next claimable row), validate the transition
//! against the state machine and write the row back in the same transaction.
//! Schema lives in `migrations/` and is embedded as [`MIGRATOR`].

use super::{DedupStore, EventStore, ExecutionStore, InsertOutcome};
use crate::config::DatabaseConfig;
use crate::error::{AreaError, Result};
use crate::models::{
    ActionLinkId, ErrorDetail, Event, Execution, ExecutionQuery, ExecutionStatistics,
    ExecutionTransition,
};
use crate::state_machine::{ExecutionEvent, ExecutionStateMachine, ExecutionStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Embedded schema migrations for the store tables
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const EXECUTION_COLUMNS: &str = "id, area_id, source_position, target_position, \
    target_instance_id, triggering_event_id, status, attempt, input_payload, created_at, \
    last_attempt_at, next_retry_at, finished_at, result_payload, error_detail, claimed_by";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `database.url`
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let url = config.url.as_deref().ok_or_else(|| {
            AreaError::ConfigurationError("database.url is required for the PostgreSQL store".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(url)
            .await?;

        info!(max_connections = config.max_connections, "📊 Connected PostgreSQL store");
        Ok(Self::new(pool))
    }

    /// Bring the schema up to date; already-applied migrations are skipped
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| AreaError::DatabaseError(format!("migration failed: {e}")))?;
        info!(migrations = MIGRATOR.iter().count(), "📊 Store schema up to date");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Lock a row, apply `transition` when `allowed`, and write it back
    async fn apply_locked(
        &self,
        id: Uuid,
        transition: &ExecutionTransition,
        allowed: impl Fn(&Execution) -> bool + Send,
    ) -> Result<Option<Execution>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM area_executions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut execution = execution_from_row(&row)?;
        if !allowed(&execution) {
            debug!(execution_id = %id, status = %execution.status, event = transition.event.event_type(), "Compare-and-set lost");
            return Ok(None);
        }

        execution.apply(transition)?;
        write_back(&mut tx, &execution).await?;
        tx.commit().await?;
        Ok(Some(execution))
    }
}

async fn write_back(tx: &mut Transaction<'_, Postgres>, execution: &Execution) -> Result<()> {
    let error_detail = execution
        .error_detail
        .as_ref()
        .map(serde_json::to_value)
        .transpose()?;

    sqlx::query(
        r#"
        UPDATE area_executions
        SET status = $2,
            attempt = $3,
            last_attempt_at = $4,
            next_retry_at = $5,
            finished_at = $6,
            result_payload = $7,
            error_detail = $8,
            claimed_by = $9
        WHERE id = $1
        "#,
    )
    .bind(execution.id)
    .bind(execution.status.as_str())
    .bind(execution.attempt as i32)
    .bind(execution.last_attempt_at)
    .bind(execution.next_retry_at)
    .bind(execution.finished_at)
    .bind(&execution.result_payload)
    .bind(error_detail)
    .bind(&execution.claimed_by)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

fn store_error(column: &str, reason: impl std::fmt::Display) -> AreaError {
    AreaError::StoreError(format!("invalid {column} in row: {reason}"))
}

fn execution_from_row(row: &PgRow) -> Result<Execution> {
    let status: String = row.try_get("status")?;
    let error_detail: Option<serde_json::Value> = row.try_get("error_detail")?;
    let error_detail: Option<ErrorDetail> = error_detail.map(serde_json::from_value).transpose()?;
    let source_position: i32 = row.try_get("source_position")?;
    let target_position: i32 = row.try_get("target_position")?;
    let attempt: i32 = row.try_get("attempt")?;

    Ok(Execution {
        id: row.try_get("id")?,
        area_id: row.try_get("area_id")?,
        action_link_id: ActionLinkId {
            area_id: row.try_get("area_id")?,
            source_position: u32::try_from(source_position)
                .map_err(|e| store_error("source_position", e))?,
            target_position: u32::try_from(target_position)
                .map_err(|e| store_error("target_position", e))?,
        },
        target_instance_id: row.try_get("target_instance_id")?,
        triggering_event_id: row.try_get("triggering_event_id")?,
        status: status
            .parse::<ExecutionStatus>()
            .map_err(|e| store_error("status", e))?,
        attempt: u32::try_from(attempt).map_err(|e| store_error("attempt", e))?,
        input_payload: row.try_get("input_payload")?,
        created_at: row.try_get("created_at")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        next_retry_at: row.try_get("next_retry_at")?,
        finished_at: row.try_get("finished_at")?,
        result_payload: row.try_get("result_payload")?,
        error_detail,
        claimed_by: row.try_get("claimed_by")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event> {
    let provider: String = row.try_get("source_service")?;
    let ingestion: String = row.try_get("ingestion")?;

    Ok(Event {
        id: row.try_get("id")?,
        source_service: provider
            .parse()
            .map_err(|e| store_error("source_service", e))?,
        source_action_type: row.try_get("source_action_type")?,
        occurred_at: row.try_get("occurred_at")?,
        raw_payload: row.try_get("raw_payload")?,
        dedup_key: row.try_get("dedup_key")?,
        content_hash: row.try_get("content_hash")?,
        ingestion: ingestion.parse().map_err(|e| store_error("ingestion", e))?,
        action_instance_id: row.try_get("action_instance_id")?,
    })
}

fn status_names(event: ExecutionEvent) -> Vec<String> {
    ExecutionStateMachine::source_states(event)
        .into_iter()
        .map(|status| status.as_str().to_string())
        .collect()
}

#[async_trait]
impl DedupStore for PgStore {
    async fn check_and_set(
        &self,
        key: &str,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));

        let recorded = sqlx::query(
            r#"
            INSERT INTO area_dedup_keys (dedup_key, recorded_at, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (dedup_key) DO UPDATE
            SET recorded_at = EXCLUDED.recorded_at,
                expires_at = EXCLUDED.expires_at
            WHERE area_dedup_keys.expires_at IS NOT NULL
              AND area_dedup_keys.expires_at <= $2
            RETURNING dedup_key
            "#,
        )
        .bind(key)
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(recorded.is_some())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM area_dedup_keys WHERE dedup_key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn append(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO area_events (
                id, source_service, source_action_type, occurred_at, raw_payload,
                dedup_key, content_hash, ingestion, action_instance_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(event.source_service.as_str())
        .bind(&event.source_action_type)
        .bind(event.occurred_at)
        .bind(&event.raw_payload)
        .bind(&event.dedup_key)
        .bind(&event.content_hash)
        .bind(event.ingestion.as_str())
        .bind(event.action_instance_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        sqlx::query("SELECT * FROM area_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(event_from_row)
            .transpose()
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn insert_if_absent(&self, execution: Execution) -> Result<InsertOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO area_executions (
                id, area_id, source_position, target_position, target_instance_id,
                triggering_event_id, status, attempt, input_payload, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (area_id, source_position, target_position, triggering_event_id)
            DO NOTHING
            "#,
        )
        .bind(execution.id)
        .bind(execution.area_id)
        .bind(execution.action_link_id.source_position as i32)
        .bind(execution.action_link_id.target_position as i32)
        .bind(execution.target_instance_id)
        .bind(execution.triggering_event_id)
        .bind(execution.status.as_str())
        .bind(execution.attempt as i32)
        .bind(&execution.input_payload)
        .bind(execution.created_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok(InsertOutcome::Created(execution));
        }

        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM area_executions \
             WHERE area_id = $1 AND source_position = $2 AND target_position = $3 \
               AND triggering_event_id = $4"
        ))
        .bind(execution.area_id)
        .bind(execution.action_link_id.source_position as i32)
        .bind(execution.action_link_id.target_position as i32)
        .bind(execution.triggering_event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(InsertOutcome::Existing(execution_from_row(&row)?))
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>> {
        sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM area_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(execution_from_row)
        .transpose()
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Execution>> {
        self.apply_locked(id, &ExecutionTransition::claim(worker_id, now), |execution| {
            execution.is_due(now)
        })
        .await
    }

    async fn claim_next(&self, worker_id: &str, now: DateTime<Utc>) -> Result<Option<Execution>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM area_executions
            WHERE status = 'pending'
               OR (status = 'retrying' AND (next_retry_at IS NULL OR next_retry_at <= $1))
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#
        ))
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut execution = execution_from_row(&row)?;
        execution.apply(&ExecutionTransition::claim(worker_id, now))?;
        write_back(&mut tx, &execution).await?;
        tx.commit().await?;
        Ok(Some(execution))
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: ExecutionTransition,
    ) -> Result<Option<Execution>> {
        if transition.event == ExecutionEvent::Claim {
            let worker_id = transition.worker_id.clone().unwrap_or_default();
            return self.claim(id, &worker_id, transition.at).await;
        }

        let allowed = ExecutionStateMachine::source_states(transition.event);
        self.apply_locked(id, &transition, |execution| {
            allowed.contains(&execution.status) && execution.holds_claim(&transition)
        })
        .await
    }

    async fn cancel_area(&self, area_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            UPDATE area_executions
            SET status = 'cancelled',
                next_retry_at = NULL,
                finished_at = $2
            WHERE area_id = $1
              AND status = ANY($3)
            RETURNING id
            "#,
        )
        .bind(area_id)
        .bind(now)
        .bind(status_names(ExecutionEvent::Cancel))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(AreaError::from))
            .collect()
    }

    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Execution>> {
        let rows = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM area_executions \
             WHERE status = 'running' AND last_attempt_at < $1 \
             ORDER BY last_attempt_at ASC"
        ))
        .bind(started_before)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn query(&self, query: &ExecutionQuery) -> Result<Vec<Execution>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS}
            FROM area_executions
            WHERE ($1::uuid IS NULL OR area_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            ORDER BY created_at ASC
            LIMIT $5
            "#
        ))
        .bind(query.area_id)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.from)
        .bind(query.to)
        .bind(query.limit.map(|limit| limit as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn statistics(&self) -> Result<ExecutionStatistics> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM area_executions GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = ExecutionStatistics::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let status = status
                .parse::<ExecutionStatus>()
                .map_err(|e| store_error("status", e))?;
            stats.record(status, count as u64);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionLink, IngestionSource, LinkType, Provider};
    use serde_json::json;

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgStore::connect(&DatabaseConfig {
            url: Some(url),
            ..DatabaseConfig::default()
        })
        .await
        .unwrap();
        store.migrate().await.unwrap();
        store
    }

    fn pending_execution() -> Execution {
        let link = ActionLink {
            area_id: Uuid::new_v4(),
            source_position: 0,
            target_position: 1,
            source_instance_id: Uuid::new_v4(),
            target_instance_id: Uuid::new_v4(),
            condition: None,
            mapping: None,
            link_type: LinkType::Chain,
            order: 0,
        };
        let event = Event {
            id: Uuid::new_v4(),
            source_service: Provider::Github,
            source_action_type: "push".to_string(),
            occurred_at: Utc::now(),
            raw_payload: json!({"ref": "main"}),
            dedup_key: "d".to_string(),
            content_hash: "h".to_string(),
            ingestion: IngestionSource::Webhook,
            action_instance_id: None,
        };
        Execution::pending(&link, &event, Utc::now())
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database in DATABASE_URL"]
    async fn test_check_and_set_is_first_writer_wins() {
        let store = store().await;
        let key = format!("test:{}", Uuid::new_v4());
        let now = Utc::now();

        assert!(store.check_and_set(&key, now, None).await.unwrap());
        assert!(!store.check_and_set(&key, now, None).await.unwrap());
        assert!(store.remove(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database in DATABASE_URL"]
    async fn test_claim_then_cas_transition() {
        let store = store().await;
        let execution = pending_execution();
        let id = execution.id;

        assert!(matches!(
            store.insert_if_absent(execution.clone()).await.unwrap(),
            InsertOutcome::Created(_)
        ));
        assert!(matches!(
            store.insert_if_absent(execution).await.unwrap(),
            InsertOutcome::Existing(_)
        ));

        let claimed = store.claim(id, "w1", Utc::now()).await.unwrap().unwrap();
        assert_eq!(claimed.attempt, 1);
        assert!(store.claim(id, "w2", Utc::now()).await.unwrap().is_none());

        let stale = Execution {
            claimed_by: Some("w0".to_string()),
            ..claimed.clone()
        };
        assert!(store
            .transition(
                id,
                ExecutionTransition::succeed(json!({"ok": false}), Utc::now()).for_claim(&stale)
            )
            .await
            .unwrap()
            .is_none());

        let done = store
            .transition(
                id,
                ExecutionTransition::succeed(json!({"ok": true}), Utc::now()).for_claim(&claimed),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ExecutionStatus::Succeeded);
        assert!(store
            .transition(id, ExecutionTransition::cancel(Utc::now()))
            .await
            .unwrap()
            .is_none());
    }
}
