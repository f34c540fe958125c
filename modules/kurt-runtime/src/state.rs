//! Durable run state behind a trait, so the runner is testable in memory
//! and backed by Postgres in production.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use kurt_common::types::WorkflowStatus;

use crate::types::RuntimeError;

/// A workflow run as the runtime sees it.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub inputs: serde_json::Value,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

/// A step checkpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub run_id: String,
    pub step_id: String,
    pub tool: String,
    pub status: String,
    pub completed_at: Option<DateTime<Utc>>,
    pub input_count: i64,
    pub outputs: serde_json::Value,
    pub error_count: i64,
    pub errors: serde_json::Value,
}

/// Durable state the runner needs: run rows and step checkpoints.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    async fn create_run(
        &self,
        workflow_id: &str,
        workflow_name: &str,
        inputs: &serde_json::Value,
        metadata: &serde_json::Value,
    ) -> Result<(), RuntimeError>;

    async fn get_run(&self, workflow_id: &str) -> Result<RunRecord, RuntimeError>;

    async fn update_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<&str>,
    ) -> Result<(), RuntimeError>;

    /// Flip an active run to canceling. Returns false when the run was
    /// already terminal or canceling.
    async fn request_cancel(&self, workflow_id: &str) -> Result<bool, RuntimeError>;

    async fn status(&self, workflow_id: &str) -> Result<WorkflowStatus, RuntimeError>;

    async fn start_step(
        &self,
        run_id: &str,
        step_id: &str,
        tool: &str,
        input_count: i64,
        input_hash: Option<&str>,
    ) -> Result<(), RuntimeError>;

    #[allow(clippy::too_many_arguments)]
    async fn finish_step(
        &self,
        run_id: &str,
        step_id: &str,
        status: &str,
        outputs: &serde_json::Value,
        error_count: i64,
        errors: &serde_json::Value,
        metadata: &serde_json::Value,
    ) -> Result<(), RuntimeError>;

    async fn step_records(&self, run_id: &str) -> Result<Vec<StepRecord>, RuntimeError>;
}

// --- In-memory implementation (tests, dry runs) ---

#[derive(Default)]
struct MemoryInner {
    runs: BTreeMap<String, RunRecord>,
    steps: BTreeMap<(String, String), StepRecord>,
}

#[derive(Default)]
pub struct MemoryRunState {
    inner: Mutex<MemoryInner>,
}

impl MemoryRunState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStateStore for MemoryRunState {
    async fn create_run(
        &self,
        workflow_id: &str,
        workflow_name: &str,
        inputs: &serde_json::Value,
        metadata: &serde_json::Value,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.runs.insert(
            workflow_id.to_string(),
            RunRecord {
                workflow_id: workflow_id.to_string(),
                workflow_name: workflow_name.to_string(),
                status: WorkflowStatus::Pending,
                started_at: Utc::now(),
                completed_at: None,
                inputs: inputs.clone(),
                error: None,
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn get_run(&self, workflow_id: &str) -> Result<RunRecord, RuntimeError> {
        let inner = self.inner.lock().unwrap();
        inner
            .runs
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(workflow_id.to_string()))
    }

    async fn update_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(workflow_id)
            .ok_or_else(|| RuntimeError::NotFound(workflow_id.to_string()))?;
        run.status = status;
        if run.error.is_none() {
            run.error = error.map(|e| e.to_string());
        }
        if status.is_terminal() && run.completed_at.is_none() {
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn request_cancel(&self, workflow_id: &str) -> Result<bool, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        let run = inner
            .runs
            .get_mut(workflow_id)
            .ok_or_else(|| RuntimeError::NotFound(workflow_id.to_string()))?;
        if matches!(run.status, WorkflowStatus::Pending | WorkflowStatus::Running) {
            run.status = WorkflowStatus::Canceling;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn status(&self, workflow_id: &str) -> Result<WorkflowStatus, RuntimeError> {
        Ok(self.get_run(workflow_id).await?.status)
    }

    async fn start_step(
        &self,
        run_id: &str,
        step_id: &str,
        tool: &str,
        input_count: i64,
        _input_hash: Option<&str>,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.steps.insert(
            (run_id.to_string(), step_id.to_string()),
            StepRecord {
                run_id: run_id.to_string(),
                step_id: step_id.to_string(),
                tool: tool.to_string(),
                status: "running".to_string(),
                completed_at: None,
                input_count,
                outputs: serde_json::json!([]),
                error_count: 0,
                errors: serde_json::json!([]),
            },
        );
        Ok(())
    }

    async fn finish_step(
        &self,
        run_id: &str,
        step_id: &str,
        status: &str,
        outputs: &serde_json::Value,
        error_count: i64,
        errors: &serde_json::Value,
        _metadata: &serde_json::Value,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner
            .steps
            .get_mut(&(run_id.to_string(), step_id.to_string()))
        {
            record.status = status.to_string();
            record.completed_at = Some(Utc::now());
            record.outputs = outputs.clone();
            record.error_count = error_count;
            record.errors = errors.clone();
        }
        Ok(())
    }

    async fn step_records(&self, run_id: &str) -> Result<Vec<StepRecord>, RuntimeError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .steps
            .values()
            .filter(|record| record.run_id == run_id)
            .cloned()
            .collect())
    }
}

// --- Postgres implementation via kurt-store ---

#[async_trait]
impl RunStateStore for kurt_store::RunStore {
    async fn create_run(
        &self,
        workflow_id: &str,
        workflow_name: &str,
        inputs: &serde_json::Value,
        metadata: &serde_json::Value,
    ) -> Result<(), RuntimeError> {
        kurt_store::RunStore::create(self, workflow_id, workflow_name, inputs, metadata)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?;
        Ok(())
    }

    async fn get_run(&self, workflow_id: &str) -> Result<RunRecord, RuntimeError> {
        let row = kurt_store::RunStore::get(self, workflow_id)
            .await
            .map_err(|e| match e {
                kurt_store::StoreError::NotFound(what) => RuntimeError::NotFound(what),
                other => RuntimeError::State(other.to_string()),
            })?;
        Ok(RunRecord {
            status: row
                .status
                .parse()
                .map_err(|e: String| RuntimeError::State(e))?,
            workflow_id: row.workflow_id,
            workflow_name: row.workflow_name,
            started_at: row.started_at,
            completed_at: row.completed_at,
            inputs: row.inputs,
            error: row.error,
            metadata: row.metadata,
        })
    }

    async fn update_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<&str>,
    ) -> Result<(), RuntimeError> {
        kurt_store::RunStore::update_status(self, workflow_id, &status.to_string(), error)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))
    }

    async fn request_cancel(&self, workflow_id: &str) -> Result<bool, RuntimeError> {
        kurt_store::RunStore::request_cancel(self, workflow_id)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))
    }

    async fn status(&self, workflow_id: &str) -> Result<WorkflowStatus, RuntimeError> {
        let status = kurt_store::RunStore::status(self, workflow_id)
            .await
            .map_err(|e| match e {
                kurt_store::StoreError::NotFound(what) => RuntimeError::NotFound(what),
                other => RuntimeError::State(other.to_string()),
            })?;
        status.parse().map_err(|e: String| RuntimeError::State(e))
    }

    async fn start_step(
        &self,
        run_id: &str,
        step_id: &str,
        tool: &str,
        input_count: i64,
        input_hash: Option<&str>,
    ) -> Result<(), RuntimeError> {
        kurt_store::RunStore::start_step(self, run_id, step_id, tool, input_count, input_hash)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))
    }

    async fn finish_step(
        &self,
        run_id: &str,
        step_id: &str,
        status: &str,
        outputs: &serde_json::Value,
        error_count: i64,
        errors: &serde_json::Value,
        metadata: &serde_json::Value,
    ) -> Result<(), RuntimeError> {
        kurt_store::RunStore::finish_step(
            self,
            run_id,
            step_id,
            status,
            outputs,
            error_count,
            errors,
            metadata,
        )
        .await
        .map_err(|e| RuntimeError::State(e.to_string()))
    }

    async fn step_records(&self, run_id: &str) -> Result<Vec<StepRecord>, RuntimeError> {
        let rows = kurt_store::RunStore::step_logs(self, run_id)
            .await
            .map_err(|e| RuntimeError::State(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| StepRecord {
                run_id: row.run_id,
                step_id: row.step_id,
                tool: row.tool,
                status: row.status,
                completed_at: row.completed_at,
                input_count: row.input_count,
                outputs: row.outputs,
                error_count: row.error_count,
                errors: row.errors,
            })
            .collect())
    }
}
