//! Core types for the observability stores. Domain-agnostic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a step event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEventStatus {
    Pending,
    Running,
    Progress,
    Completed,
    Failed,
}

impl std::fmt::Display for StepEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepEventStatus::Pending => write!(f, "pending"),
            StepEventStatus::Running => write!(f, "running"),
            StepEventStatus::Progress => write!(f, "progress"),
            StepEventStatus::Completed => write!(f, "completed"),
            StepEventStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for StepEventStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "progress" => Ok(Self::Progress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown StepEventStatus: {other}")),
        }
    }
}

/// A step event as stored. `id` is contiguous and strictly increasing within
/// a run; it is the pagination cursor for log streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    pub id: i64,
    pub run_id: String,
    pub step_id: String,
    pub substep: Option<String>,
    pub status: StepEventStatus,
    pub current: Option<i64>,
    pub total: Option<i64>,
    pub message: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A step event to append. The store assigns id/created_at.
#[derive(Debug, Clone)]
pub struct AppendStepEvent {
    pub run_id: String,
    pub step_id: String,
    pub substep: Option<String>,
    pub status: StepEventStatus,
    pub current: Option<i64>,
    pub total: Option<i64>,
    pub message: Option<String>,
    pub metadata: serde_json::Value,
}

impl AppendStepEvent {
    pub fn new(
        run_id: impl Into<String>,
        step_id: impl Into<String>,
        status: StepEventStatus,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            step_id: step_id.into(),
            substep: None,
            status,
            current: None,
            total: None,
            message: None,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_substep(mut self, substep: impl Into<String>) -> Self {
        self.substep = Some(substep.into());
        self
    }

    pub fn with_progress(mut self, current: i64, total: i64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One entry of an append-only named stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    pub offset: i64,
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
