//! Durable execution control records.
//!
//! Each writer's update is a single conditional `UPDATE` touching only its own
//! columns, so a cancel request and the execution loop can't overwrite each
//! other. Terminal resolution happens in SQL so a completion that races a
//! cancel still lands as CANCELLED.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteQueryResult;
use sqlx::{FromRow, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use strangle_core::error::{Result, StrangleError};
use strangle_execution::{BatchProgress, ExecutionControl, ExecutionState, ExecutionStore};

use super::{from_millis, parse_uuid};
use crate::database::storage_err;

const LIVE: &str = "state NOT IN ('COMPLETED', 'CANCELLED', 'FAILED')";

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: String,
    suggestion_id: String,
    state: String,
    cancelled: bool,
    cancel_reason: Option<String>,
    batches_completed: i64,
    batches_total: i64,
    lots_total: i64,
    lots_filled: i64,
    failure_reason: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
    last_heartbeat: i64,
}

impl ExecutionRow {
    fn into_control(self, broker_order_ids: Vec<String>) -> Result<ExecutionControl> {
        let state = ExecutionState::parse(&self.state)
            .ok_or_else(|| StrangleError::storage(format!("unknown state {}", self.state)))?;
        Ok(ExecutionControl {
            id: parse_uuid(&self.id)?,
            suggestion_id: parse_uuid(&self.suggestion_id)?,
            state,
            cancelled: self.cancelled,
            cancel_reason: self.cancel_reason,
            batches_completed: to_u32(self.batches_completed)?,
            batches_total: to_u32(self.batches_total)?,
            lots_total: to_u32(self.lots_total)?,
            lots_filled: to_u32(self.lots_filled)?,
            broker_order_ids,
            failure_reason: self.failure_reason,
            created_at: from_millis(self.created_at)?,
            started_at: self.started_at.map(from_millis).transpose()?,
            finished_at: self.finished_at.map(from_millis).transpose()?,
            last_heartbeat: from_millis(self.last_heartbeat)?,
        })
    }
}

fn to_u32(v: i64) -> Result<u32> {
    u32::try_from(v).map_err(storage_err)
}

#[derive(Debug, Clone)]
pub struct SqliteExecutionStore {
    pool: SqlitePool,
}

impl SqliteExecutionStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn order_ids(&self, id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT broker_order_id FROM execution_orders WHERE execution_id = ?1 ORDER BY rowid",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(rows.into_iter().map(|(oid,)| oid).collect())
    }

    async fn load(&self, row: ExecutionRow) -> Result<ExecutionControl> {
        let ids = self.order_ids(&row.id).await?;
        row.into_control(ids)
    }

    /// Explains why a conditional update touched no row.
    async fn explain_miss(&self, id: Uuid, op: &str) -> StrangleError {
        match self.get(id).await {
            Ok(c) => StrangleError::invalid_transition(format!(
                "cannot {op} execution {id} in {}",
                c.state
            )),
            Err(e) => e,
        }
    }

    async fn require_hit(&self, result: SqliteQueryResult, id: Uuid, op: &str) -> Result<()> {
        if result.rows_affected() == 0 {
            return Err(self.explain_miss(id, op).await);
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn create(&self, control: &ExecutionControl) -> Result<()> {
        let result = sqlx::query(
            r"
            INSERT INTO executions
                (id, suggestion_id, state, cancelled, cancel_reason, batches_completed,
                 batches_total, lots_total, lots_filled, failure_reason, created_at,
                 started_at, finished_at, last_heartbeat)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ",
        )
        .bind(control.id.to_string())
        .bind(control.suggestion_id.to_string())
        .bind(control.state.as_str())
        .bind(control.cancelled)
        .bind(&control.cancel_reason)
        .bind(i64::from(control.batches_completed))
        .bind(i64::from(control.batches_total))
        .bind(i64::from(control.lots_total))
        .bind(i64::from(control.lots_filled))
        .bind(&control.failure_reason)
        .bind(control.created_at.timestamp_millis())
        .bind(control.started_at.map(|t| t.timestamp_millis()))
        .bind(control.finished_at.map(|t| t.timestamp_millis()))
        .bind(control.last_heartbeat.timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(execution = %control.id, suggestion = %control.suggestion_id, "Execution stored");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StrangleError::invalid_transition(format!(
                    "suggestion {} already has an execution",
                    control.suggestion_id
                )))
            }
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn get(&self, id: Uuid) -> Result<ExecutionControl> {
        let row = sqlx::query_as::<_, ExecutionRow>("SELECT * FROM executions WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| StrangleError::not_found(format!("execution {id}")))?;
        self.load(row).await
    }

    async fn find_by_suggestion(&self, suggestion_id: Uuid) -> Result<Option<ExecutionControl>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            "SELECT * FROM executions WHERE suggestion_id = ?1",
        )
        .bind(suggestion_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        match row {
            Some(row) => Ok(Some(self.load(row).await?)),
            None => Ok(None),
        }
    }

    async fn list_active(&self) -> Result<Vec<ExecutionControl>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT * FROM executions WHERE {LIVE} ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut active = Vec::with_capacity(rows.len());
        for row in rows {
            active.push(self.load(row).await?);
        }
        Ok(active)
    }

    async fn mark_running(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE executions
            SET state = 'RUNNING', started_at = ?2, last_heartbeat = ?2
            WHERE id = ?1 AND state = 'CREATED'
            ",
        )
        .bind(id.to_string())
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        self.require_hit(result, id, "start").await
    }

    async fn record_progress(&self, id: Uuid, progress: &BatchProgress) -> Result<()> {
        let key = id.to_string();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let result = sqlx::query(&format!(
            r"
            UPDATE executions
            SET batches_completed = ?2, lots_filled = ?3, last_heartbeat = ?4
            WHERE id = ?1 AND ?2 <= batches_total AND {LIVE}
            "
        ))
        .bind(&key)
        .bind(i64::from(progress.batches_completed))
        .bind(i64::from(progress.lots_filled))
        .bind(progress.at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(storage_err)?;
            return Err(self.explain_miss(id, "record progress on").await);
        }

        for order_id in &progress.broker_order_ids {
            sqlx::query(
                "INSERT INTO execution_orders (execution_id, broker_order_id) VALUES (?1, ?2)",
            )
            .bind(&key)
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)
    }

    async fn heartbeat(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE executions SET last_heartbeat = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(at.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 0 {
            return Err(StrangleError::not_found(format!("execution {id}")));
        }
        Ok(())
    }

    async fn append_order_ids(&self, id: Uuid, broker_order_ids: &[String]) -> Result<()> {
        let key = id.to_string();
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let exists = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM executions WHERE id = ?1")
            .bind(&key)
            .fetch_one(&mut *tx)
            .await
            .map_err(storage_err)?;
        if exists.0 == 0 {
            tx.rollback().await.map_err(storage_err)?;
            return Err(StrangleError::not_found(format!("execution {id}")));
        }
        for order_id in broker_order_ids {
            sqlx::query(
                "INSERT INTO execution_orders (execution_id, broker_order_id) VALUES (?1, ?2)",
            )
            .bind(&key)
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)
    }

    async fn request_cancel(
        &self,
        id: Uuid,
        reason: &str,
        _at: DateTime<Utc>,
    ) -> Result<ExecutionControl> {
        let result = sqlx::query(&format!(
            r"
            UPDATE executions
            SET cancelled = 1, cancel_reason = COALESCE(cancel_reason, ?2)
            WHERE id = ?1 AND {LIVE}
            "
        ))
        .bind(id.to_string())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        self.require_hit(result, id, "cancel").await?;
        self.get(id).await
    }

    async fn finish(
        &self,
        id: Uuid,
        state: ExecutionState,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<ExecutionControl> {
        let result = sqlx::query(&format!(
            r"
            UPDATE executions
            SET state = CASE WHEN ?2 = 'COMPLETED' AND cancelled = 1 THEN 'CANCELLED' ELSE ?2 END,
                failure_reason = CASE WHEN ?2 = 'FAILED' THEN ?3 ELSE failure_reason END,
                finished_at = ?4,
                last_heartbeat = ?4
            WHERE id = ?1 AND {LIVE}
            "
        ))
        .bind(id.to_string())
        .bind(state.as_str())
        .bind(reason)
        .bind(at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        self.require_hit(result, id, "finish").await?;
        self.get(id).await
    }
}
