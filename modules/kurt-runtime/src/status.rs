//! Live composite status: run status + per-step progress rolled up from the
//! `progress` stream + the last log line.

use std::collections::BTreeMap;

use serde::Serialize;

use kurt_events::EventSink;

use crate::state::RunStateStore;
use crate::types::RuntimeError;

#[derive(Debug, Clone, Serialize)]
pub struct StepProgress {
    pub name: String,
    pub status: String,
    pub current: i64,
    pub total: i64,
    pub success: i64,
    pub error: i64,
    pub last_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiveStatus {
    pub workflow_id: String,
    pub status: String,
    pub stage: Option<String>,
    pub progress_current: i64,
    pub progress_total: i64,
    pub steps: Vec<StepProgress>,
    pub last_log: Option<String>,
}

/// Assemble the live status snapshot for a run.
pub async fn live_status(
    state: &dyn RunStateStore,
    sink: &dyn EventSink,
    workflow_id: &str,
) -> Result<LiveStatus, RuntimeError> {
    let run = state.get_run(workflow_id).await?;
    let events = sink
        .get_events(workflow_id)
        .await
        .map_err(|e| RuntimeError::State(e.to_string()))?;

    // Roll up per-step progress from the progress stream.
    let progress_entries = sink
        .read_stream(workflow_id, "progress", 0, 10_000)
        .await
        .map_err(|e| RuntimeError::State(e.to_string()))?;

    #[derive(Default)]
    struct Rollup {
        current: i64,
        total: i64,
        success: i64,
        error: i64,
        last_status: Option<String>,
        last_timestamp: Option<i64>,
    }

    let mut rollups: BTreeMap<String, Rollup> = BTreeMap::new();
    for entry in &progress_entries {
        let Some(step) = entry.value.get("step").and_then(|v| v.as_str()) else {
            continue;
        };
        let rollup = rollups.entry(step.to_string()).or_default();
        if let Some(total) = entry.value.get("total").and_then(|v| v.as_i64()) {
            rollup.total = rollup.total.max(total);
        }
        if let Some(current) = entry.value.get("current").and_then(|v| v.as_i64()) {
            rollup.current = rollup.current.max(current);
        }
        match entry.value.get("status").and_then(|v| v.as_str()) {
            Some("success") => {
                rollup.success += 1;
                rollup.last_status = Some("success".to_string());
            }
            Some("error") => {
                rollup.error += 1;
                rollup.last_status = Some("error".to_string());
            }
            Some(other) => rollup.last_status = Some(other.to_string()),
            None => {}
        }
        if let Some(ts) = entry.value.get("timestamp").and_then(|v| v.as_i64()) {
            rollup.last_timestamp = Some(ts);
        }
    }

    let mut steps: Vec<StepProgress> = rollups
        .into_iter()
        .map(|(name, rollup)| {
            let status = match rollup.last_status.as_deref() {
                Some("start") | Some("progress") => "running".to_string(),
                Some("success") | Some("error")
                    if rollup.total > 0 && rollup.current >= rollup.total =>
                {
                    if rollup.error > 0 {
                        "error".to_string()
                    } else {
                        "completed".to_string()
                    }
                }
                Some(s) => s.to_string(),
                None => "running".to_string(),
            };
            StepProgress {
                name,
                status,
                current: rollup.current,
                total: rollup.total,
                success: rollup.success,
                error: rollup.error,
                last_timestamp: rollup.last_timestamp,
            }
        })
        .collect();
    steps.sort_by_key(|s| (s.last_timestamp.is_none(), s.last_timestamp.unwrap_or(0)));

    // Last log line from the logs stream.
    let last_log = {
        let mut last = None;
        let mut cursor = 0;
        loop {
            let page = sink
                .read_stream(workflow_id, "logs", cursor, 500)
                .await
                .map_err(|e| RuntimeError::State(e.to_string()))?;
            match page.last() {
                Some(entry) => {
                    cursor = entry.offset;
                    last = entry
                        .value
                        .get("message")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                }
                None => break,
            }
        }
        last
    };

    Ok(LiveStatus {
        workflow_id: workflow_id.to_string(),
        status: run.status.to_string(),
        stage: events
            .get("stage")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        progress_current: events
            .get("stage_current")
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
        progress_total: events
            .get("stage_total")
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
        steps,
        last_log,
    })
}
