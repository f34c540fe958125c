//! Per-step execution context.
//!
//! Everything a tool needs flows through here — observability channels,
//! workflow inputs, fan-out, cancellation — so steps never read ambient
//! globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::warn;

use kurt_common::types::WorkflowStatus;
use kurt_events::{AppendStepEvent, EventSink, StepEventStatus};

use crate::queue::{SubTask, SubTaskOutcome, TaskQueue};
use crate::state::RunStateStore;
use crate::types::RuntimeError;

/// How often in-flight fan-out re-checks the run status for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct StepContext {
    pub run_id: String,
    pub step_id: String,
    pub workflow_name: String,
    /// Validated workflow inputs (name → value).
    pub inputs: serde_json::Value,
    pub sink: Arc<dyn EventSink>,
    pub state: Arc<dyn RunStateStore>,
}

impl StepContext {
    /// Set a current-value event (`stage`, `stage_current`, ...).
    pub async fn set_event(&self, key: &str, value: serde_json::Value) {
        if let Err(e) = self.sink.set_event(&self.run_id, key, value).await {
            warn!(run_id = %self.run_id, key, error = %e, "failed to set event");
        }
    }

    /// Append to the `logs` stream and mirror to tracing.
    pub async fn log(&self, message: &str) {
        tracing::info!(run_id = %self.run_id, step = %self.step_id, "{message}");
        let entry = json!({
            "step": self.step_id,
            "level": "info",
            "message": message,
            "timestamp": Utc::now().timestamp_millis(),
        });
        if let Err(e) = self.sink.write_stream(&self.run_id, "logs", entry).await {
            warn!(run_id = %self.run_id, error = %e, "failed to write log stream");
        }
    }

    /// Append a per-item progress entry to the `progress` stream.
    pub async fn progress(
        &self,
        idx: usize,
        total: usize,
        status: &str,
        item_id: &str,
        error: Option<&str>,
    ) {
        let mut entry = json!({
            "step": self.step_id,
            "idx": idx,
            "current": idx + 1,
            "total": total,
            "status": status,
            "item_id": item_id,
            "timestamp": Utc::now().timestamp_millis(),
        });
        if let Some(error) = error {
            entry["error"] = json!(error);
        }
        if let Err(e) = self.sink.write_stream(&self.run_id, "progress", entry).await {
            warn!(run_id = %self.run_id, error = %e, "failed to write progress stream");
        }
    }

    /// Record a step event on the ordered log.
    pub async fn step_event(&self, status: StepEventStatus, message: Option<&str>) {
        let mut event = AppendStepEvent::new(&self.run_id, &self.step_id, status);
        if let Some(message) = message {
            event = event.with_message(message);
        }
        if let Err(e) = self.sink.append_step_event(event).await {
            warn!(run_id = %self.run_id, error = %e, "failed to append step event");
        }
    }

    /// Whether cancellation has been requested for this run.
    pub async fn is_canceling(&self) -> bool {
        matches!(
            self.state.status(&self.run_id).await,
            Ok(WorkflowStatus::Canceling | WorkflowStatus::Canceled)
        )
    }

    /// Run sub-tasks on a bounded queue and join their results.
    ///
    /// Cancellation is honored at the dispatch gate: once the run flips to
    /// canceling, pending tasks are drained without execution while
    /// in-flight ones finish and report normally. Each outcome is recorded
    /// as a substep event.
    pub async fn run_subtasks(
        &self,
        queue_name: &str,
        concurrency: usize,
        tasks: Vec<SubTask>,
    ) -> Result<Vec<(String, SubTaskOutcome)>, RuntimeError> {
        // The enqueue-side cancellation check: refuse to start fan-out at
        // all when already canceling.
        if self.is_canceling().await {
            return Err(RuntimeError::Canceled);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let watcher = {
            let cancel = cancel.clone();
            let state = self.state.clone();
            let run_id = self.run_id.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
                    match state.status(&run_id).await {
                        Ok(WorkflowStatus::Canceling | WorkflowStatus::Canceled) => {
                            cancel.store(true, Ordering::SeqCst);
                            break;
                        }
                        Ok(status) if status.is_terminal() => break,
                        _ => {}
                    }
                }
            })
        };

        let queue = TaskQueue::new(queue_name, concurrency);
        let outcomes = queue.run(tasks, Some(cancel.clone())).await;
        watcher.abort();

        let total = outcomes.len();
        for (idx, (task_id, outcome)) in outcomes.iter().enumerate() {
            let (status, message) = match outcome {
                SubTaskOutcome::Completed(_) => (StepEventStatus::Completed, None),
                SubTaskOutcome::Failed(error) => (StepEventStatus::Failed, Some(error.as_str())),
                SubTaskOutcome::Drained => (StepEventStatus::Failed, Some("drained: canceled")),
            };
            let mut event = AppendStepEvent::new(&self.run_id, &self.step_id, status)
                .with_substep(task_id)
                .with_progress(idx as i64 + 1, total as i64);
            if let Some(message) = message {
                event = event.with_message(message);
            }
            if let Err(e) = self.sink.append_step_event(event).await {
                warn!(run_id = %self.run_id, error = %e, "failed to append substep event");
            }
        }

        Ok(outcomes)
    }
}
