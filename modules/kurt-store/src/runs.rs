use chrono::Utc;
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::rows::{StepLogRow, WorkflowRunRow};

/// Filters for the workflow listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    /// Internal status strings (already mapped from display statuses).
    pub statuses: Vec<String>,
    pub search: Option<String>,
    pub workflow_type: Option<String>,
    pub parent_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Clone)]
pub struct RunStore {
    pool: PgPool,
}

impl RunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        workflow_id: &str,
        workflow_name: &str,
        inputs: &serde_json::Value,
        metadata: &serde_json::Value,
    ) -> Result<WorkflowRunRow> {
        let row = sqlx::query_as::<_, WorkflowRunRow>(
            r#"
            INSERT INTO workflow_runs (workflow_id, workflow_name, status, inputs, metadata)
            VALUES ($1, $2, 'pending', $3, $4)
            RETURNING *
            "#,
        )
        .bind(workflow_id)
        .bind(workflow_name)
        .bind(inputs)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get(&self, workflow_id: &str) -> Result<WorkflowRunRow> {
        sqlx::query_as::<_, WorkflowRunRow>(
            "SELECT * FROM workflow_runs WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("workflow {workflow_id}")))
    }

    pub async fn list(&self, filter: &RunFilter) -> Result<Vec<WorkflowRunRow>> {
        let statuses: Option<Vec<String>> = if filter.statuses.is_empty() {
            None
        } else {
            Some(filter.statuses.clone())
        };

        let rows = sqlx::query_as::<_, WorkflowRunRow>(
            r#"
            SELECT * FROM workflow_runs
            WHERE ($1::text[] IS NULL OR status = ANY($1))
              AND ($2::text IS NULL OR workflow_name ILIKE '%' || $2 || '%'
                   OR workflow_id ILIKE '%' || $2 || '%')
              AND ($3::text IS NULL OR metadata->>'workflow_type' = $3)
              AND ($4::text IS NULL OR metadata->>'parent_workflow_id' = $4)
            ORDER BY started_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(&statuses)
        .bind(&filter.search)
        .bind(&filter.workflow_type)
        .bind(&filter.parent_id)
        .bind(if filter.limit > 0 { filter.limit } else { 50 })
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Update run status. Terminal statuses also stamp `completed_at`; the
    /// first error is kept.
    pub async fn update_status(
        &self,
        workflow_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<()> {
        let terminal = matches!(
            status,
            "completed" | "completed_with_errors" | "failed" | "canceled"
        );
        sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2,
                error = COALESCE(error, $3),
                completed_at = CASE WHEN $4 THEN COALESCE(completed_at, $5) ELSE completed_at END
            WHERE workflow_id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(status)
        .bind(error)
        .bind(terminal)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Compare-and-set used by cancel: only flips to canceling from an
    /// active status. Returns whether the transition happened.
    pub async fn request_cancel(&self, workflow_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = 'canceling'
            WHERE workflow_id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(workflow_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Current status string, for cancellation checks at step boundaries.
    pub async fn status(&self, workflow_id: &str) -> Result<String> {
        let (status,): (String,) =
            sqlx::query_as("SELECT status FROM workflow_runs WHERE workflow_id = $1")
                .bind(workflow_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("workflow {workflow_id}")))?;
        Ok(status)
    }

    // --- Step logs ---

    /// Durability checkpoint before a step executes.
    pub async fn start_step(
        &self,
        run_id: &str,
        step_id: &str,
        tool: &str,
        input_count: i64,
        input_hash: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO step_logs (run_id, step_id, tool, status, input_count, input_hash)
            VALUES ($1, $2, $3, 'running', $4, $5)
            ON CONFLICT (run_id, step_id)
            DO UPDATE SET status = 'running', started_at = now(),
                          input_count = EXCLUDED.input_count,
                          input_hash = EXCLUDED.input_hash,
                          completed_at = NULL
            "#,
        )
        .bind(run_id)
        .bind(step_id)
        .bind(tool)
        .bind(input_count)
        .bind(input_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal checkpoint after a step returns. Same row as `start_step`.
    #[allow(clippy::too_many_arguments)]
    pub async fn finish_step(
        &self,
        run_id: &str,
        step_id: &str,
        status: &str,
        outputs: &serde_json::Value,
        error_count: i64,
        errors: &serde_json::Value,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let output_count = outputs.as_array().map(|a| a.len() as i64).unwrap_or(0);
        sqlx::query(
            r#"
            UPDATE step_logs
            SET status = $3, completed_at = now(),
                output_count = $4, outputs = $5, error_count = $6, errors = $7, metadata = $8
            WHERE run_id = $1 AND step_id = $2
            "#,
        )
        .bind(run_id)
        .bind(step_id)
        .bind(status)
        .bind(output_count)
        .bind(outputs)
        .bind(error_count)
        .bind(errors)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn step_logs(&self, run_id: &str) -> Result<Vec<StepLogRow>> {
        let rows = sqlx::query_as::<_, StepLogRow>(
            "SELECT * FROM step_logs WHERE run_id = $1 ORDER BY started_at ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Steps that were checkpointed `running` but never finished — the resume
    /// set after a crash.
    pub async fn unfinished_steps(&self, run_id: &str) -> Result<Vec<StepLogRow>> {
        let rows = sqlx::query_as::<_, StepLogRow>(
            r#"
            SELECT * FROM step_logs
            WHERE run_id = $1 AND status = 'running' AND completed_at IS NULL
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
