//! Postgres-backed `EventSink`. The single source of truth for run
//! observability.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

use crate::sink::EventSink;
use crate::types::{AppendStepEvent, StepEvent, StreamEntry};

/// Attempts at the contiguous-id insert before giving up. Conflicts only
/// happen when two writers append to the same run concurrently.
const INSERT_RETRIES: usize = 5;

#[derive(Clone)]
pub struct PgEventSink {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct StepEventRow {
    id: i64,
    run_id: String,
    step_id: String,
    substep: Option<String>,
    status: String,
    current: Option<i64>,
    total: Option<i64>,
    message: Option<String>,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl StepEventRow {
    fn into_event(self) -> Result<StepEvent> {
        Ok(StepEvent {
            id: self.id,
            run_id: self.run_id,
            step_id: self.step_id,
            substep: self.substep,
            status: self.status.parse().map_err(|e: String| anyhow!(e))?,
            current: self.current,
            total: self.total,
            message: self.message,
            metadata: self.metadata.unwrap_or(serde_json::Value::Null),
            created_at: self.created_at,
        })
    }
}

impl PgEventSink {
    /// The tables (step_events, workflow_events, streams) are created by the
    /// store migrations; this crate only reads and writes them.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    /// Contiguous per-run ids: computed as MAX(id)+1 under a unique
    /// `(run_id, id)` constraint, retried on conflict.
    async fn append_step_event(&self, event: AppendStepEvent) -> Result<i64> {
        for attempt in 0..INSERT_RETRIES {
            let result = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO step_events
                    (run_id, id, step_id, substep, status, current, total, message, metadata)
                SELECT $1, COALESCE(MAX(id), 0) + 1, $2, $3, $4, $5, $6, $7, $8
                FROM step_events WHERE run_id = $1
                RETURNING id
                "#,
            )
            .bind(&event.run_id)
            .bind(&event.step_id)
            .bind(&event.substep)
            .bind(event.status.to_string())
            .bind(event.current)
            .bind(event.total)
            .bind(&event.message)
            .bind(&event.metadata)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(id) => return Ok(id),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    warn!(run_id = %event.run_id, attempt, "step_event id conflict, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(anyhow!(
            "step_event insert for run {} conflicted {INSERT_RETRIES} times",
            event.run_id
        ))
    }

    async fn read_step_events(
        &self,
        run_id: &str,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<StepEvent>> {
        let rows = sqlx::query_as::<_, StepEventRow>(
            r#"
            SELECT id, run_id, step_id, substep, status, current, total, message, metadata, created_at
            FROM step_events
            WHERE run_id = $1 AND id > $2
            ORDER BY id ASC
            LIMIT $3
            "#,
        )
        .bind(run_id)
        .bind(since_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // Gap-free guard: stop at the first break in the sequence so readers
        // never skip an event an in-flight transaction is about to commit.
        let mut events = Vec::with_capacity(rows.len());
        let mut expected = since_id + 1;
        for row in rows {
            if row.id != expected {
                break;
            }
            expected = row.id + 1;
            events.push(row.into_event()?);
        }
        Ok(events)
    }

    async fn set_event(&self, run_id: &str, key: &str, value: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_events (run_id, key, value, updated_at)
            VALUES ($1, $2, $3, now())
            ON CONFLICT (run_id, key)
            DO UPDATE SET value = EXCLUDED.value, updated_at = now()
            "#,
        )
        .bind(run_id)
        .bind(key)
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_events(&self, run_id: &str) -> Result<BTreeMap<String, serde_json::Value>> {
        let rows = sqlx::query_as::<_, (String, serde_json::Value)>(
            "SELECT key, value FROM workflow_events WHERE run_id = $1",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    async fn write_stream(
        &self,
        run_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<i64> {
        for attempt in 0..INSERT_RETRIES {
            let result = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO streams (run_id, key, "offset", value)
                SELECT $1, $2, COALESCE(MAX("offset"), 0) + 1, $3
                FROM streams WHERE run_id = $1 AND key = $2
                RETURNING "offset"
                "#,
            )
            .bind(run_id)
            .bind(key)
            .bind(&value)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(offset) => return Ok(offset),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    warn!(run_id, key, attempt, "stream offset conflict, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(anyhow!("stream insert for run {run_id} conflicted {INSERT_RETRIES} times"))
    }

    async fn read_stream(
        &self,
        run_id: &str,
        key: &str,
        since_offset: i64,
        limit: usize,
    ) -> Result<Vec<StreamEntry>> {
        let rows = sqlx::query_as::<_, (i64, String, serde_json::Value, DateTime<Utc>)>(
            r#"
            SELECT "offset", key, value, created_at
            FROM streams
            WHERE run_id = $1 AND key = $2 AND "offset" > $3
            ORDER BY "offset" ASC
            LIMIT $4
            "#,
        )
        .bind(run_id)
        .bind(key)
        .bind(since_offset)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(offset, key, value, created_at)| StreamEntry {
                offset,
                key,
                value,
                created_at,
            })
            .collect())
    }
}
