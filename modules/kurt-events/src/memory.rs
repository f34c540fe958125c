//! In-memory `EventSink` for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::sink::EventSink;
use crate::types::{AppendStepEvent, StepEvent, StreamEntry};

#[derive(Default)]
struct Inner {
    step_events: BTreeMap<String, Vec<StepEvent>>,
    events: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    streams: BTreeMap<(String, String), Vec<StreamEntry>>,
}

#[derive(Default)]
pub struct MemoryEventSink {
    inner: Mutex<Inner>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All step events for a run, for test assertions.
    pub fn all_step_events(&self, run_id: &str) -> Vec<StepEvent> {
        let inner = self.inner.lock().unwrap();
        inner.step_events.get(run_id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn append_step_event(&self, event: AppendStepEvent) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let events = inner.step_events.entry(event.run_id.clone()).or_default();
        let id = events.len() as i64 + 1;
        events.push(StepEvent {
            id,
            run_id: event.run_id,
            step_id: event.step_id,
            substep: event.substep,
            status: event.status,
            current: event.current,
            total: event.total,
            message: event.message,
            metadata: event.metadata,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn read_step_events(
        &self,
        run_id: &str,
        since_id: i64,
        limit: usize,
    ) -> Result<Vec<StepEvent>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .step_events
            .get(run_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.id > since_id)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn set_event(&self, run_id: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .events
            .entry(run_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get_events(&self, run_id: &str) -> Result<BTreeMap<String, serde_json::Value>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.events.get(run_id).cloned().unwrap_or_default())
    }

    async fn write_stream(
        &self,
        run_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let entries = inner
            .streams
            .entry((run_id.to_string(), key.to_string()))
            .or_default();
        let offset = entries.len() as i64 + 1;
        entries.push(StreamEntry {
            offset,
            key: key.to_string(),
            value,
            created_at: Utc::now(),
        });
        Ok(offset)
    }

    async fn read_stream(
        &self,
        run_id: &str,
        key: &str,
        since_offset: i64,
        limit: usize,
    ) -> Result<Vec<StreamEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .streams
            .get(&(run_id.to_string(), key.to_string()))
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.offset > since_offset)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepEventStatus;

    #[tokio::test]
    async fn step_event_ids_are_contiguous_per_run() {
        let sink = MemoryEventSink::new();
        for _ in 0..3 {
            sink.append_step_event(AppendStepEvent::new("run-a", "fetch", StepEventStatus::Running))
                .await
                .unwrap();
        }
        sink.append_step_event(AppendStepEvent::new("run-b", "fetch", StepEventStatus::Running))
            .await
            .unwrap();

        let a = sink.read_step_events("run-a", 0, 100).await.unwrap();
        assert_eq!(a.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        let b = sink.read_step_events("run-b", 0, 100).await.unwrap();
        assert_eq!(b.iter().map(|e| e.id).collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn cursor_pagination_sees_each_event_once() {
        let sink = MemoryEventSink::new();
        for i in 0..5 {
            sink.append_step_event(
                AppendStepEvent::new("run", "step", StepEventStatus::Progress)
                    .with_progress(i, 5),
            )
            .await
            .unwrap();
        }

        let mut cursor = 0;
        let mut seen = vec![];
        loop {
            let page = sink.read_step_events("run", cursor, 2).await.unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().unwrap().id;
            seen.extend(page.into_iter().map(|e| e.id));
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn events_return_last_written_value() {
        let sink = MemoryEventSink::new();
        sink.set_event("run", "stage", serde_json::json!("fetching")).await.unwrap();
        sink.set_event("run", "stage", serde_json::json!("saving")).await.unwrap();
        let events = sink.get_events("run").await.unwrap();
        assert_eq!(events["stage"], serde_json::json!("saving"));
    }

    #[tokio::test]
    async fn streams_paginate_by_offset() {
        let sink = MemoryEventSink::new();
        for i in 0..4 {
            sink.write_stream("run", "progress", serde_json::json!({"idx": i}))
                .await
                .unwrap();
        }
        let page = sink.read_stream("run", "progress", 2, 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].offset, 3);
        assert_eq!(page[1].offset, 4);
    }
}
