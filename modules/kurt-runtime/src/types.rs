use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::parser::ParseError;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Step {step} failed: {message}")]
    StepFailed { step: String, message: String },

    /// Retried with exponential backoff up to the configured bound.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Workflow canceled")]
    Canceled,

    #[error("State store error: {0}")]
    State(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A per-item failure inside a step. These stay per-item: they are recorded
/// on the step log and never fail the workflow by themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    pub item_id: String,
    pub kind: String,
    pub message: String,
}

impl ItemError {
    pub fn new(
        item_id: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// What a tool returns from one step execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    pub output_data: Vec<serde_json::Value>,
    pub errors: Vec<ItemError>,
    pub metadata: serde_json::Value,
}

impl ToolResult {
    pub fn with_output(output_data: Vec<serde_json::Value>) -> Self {
        Self {
            output_data,
            errors: vec![],
            metadata: serde_json::Value::Null,
        }
    }
}

/// Options for starting a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// When true, the run is enqueued and the handle returns immediately.
    pub background: bool,
    pub priority: i32,
    pub parent_workflow_id: Option<String>,
    /// Retry bound for transient step failures.
    pub max_step_attempts: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            background: false,
            priority: 10,
            parent_workflow_id: None,
            max_step_attempts: 3,
        }
    }
}

/// Handle returned by `run`.
#[derive(Debug, Clone)]
pub enum WorkflowHandle {
    /// Synchronous run: terminal result inline.
    Completed(crate::runner::RunOutcome),
    /// Background run: poll by id.
    Background { workflow_id: String },
}

impl WorkflowHandle {
    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowHandle::Completed(outcome) => &outcome.workflow_id,
            WorkflowHandle::Background { workflow_id } => workflow_id,
        }
    }
}
