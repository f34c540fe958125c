//! The `EventSink` trait — the runtime's two observability channels plus the
//! step-event log, behind one interface so tests run fully in memory.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{AppendStepEvent, StepEvent, StreamEntry};

/// Observability sink for workflow runs.
///
/// - *Step events*: an ordered log with a per-run contiguous `id` cursor.
/// - *Events*: key/value current values (`stage=fetching`). Reads return the
///   last-written value.
/// - *Streams*: append-only logs keyed by name (`progress`, `logs`) with a
///   per-key monotonic offset.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Append a step event, returning its per-run id.
    async fn append_step_event(&self, event: AppendStepEvent) -> Result<i64>;

    /// Read step events with `id > since_id`, in id order, up to `limit`.
    /// Gap-free: never returns an event while a lower id is still in flight.
    async fn read_step_events(
        &self,
        run_id: &str,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<StepEvent>>;

    /// Upsert a current-value event.
    async fn set_event(&self, run_id: &str, key: &str, value: serde_json::Value) -> Result<()>;

    /// Read all current-value events for a run.
    async fn get_events(&self, run_id: &str) -> Result<BTreeMap<String, serde_json::Value>>;

    /// Append to a named stream, returning the assigned offset.
    async fn write_stream(
        &self,
        run_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<i64>;

    /// Read stream entries with `offset > since_offset`, in offset order.
    async fn read_stream(
        &self,
        run_id: &str,
        key: &str,
        since_offset: i64,
        limit: usize,
    ) -> Result<Vec<StreamEntry>>;
}
