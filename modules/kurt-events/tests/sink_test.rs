//! Integration tests for the Postgres event sink.
//! Requires a Postgres instance. Set DATABASE_TEST_URL or these tests are skipped.

use serde_json::json;
use sqlx::PgPool;

use kurt_events::{AppendStepEvent, EventSink, PgEventSink, StepEventStatus};

/// Get a test sink, or skip if no test DB is available.
async fn test_sink() -> Option<PgEventSink> {
    let url = std::env::var("DATABASE_TEST_URL").ok()?;
    let pool = PgPool::connect(&url).await.ok()?;

    // Create the observability tables for testing
    for ddl in [
        r#"
        CREATE TABLE IF NOT EXISTS step_events (
            run_id      TEXT NOT NULL,
            id          BIGINT NOT NULL,
            step_id     TEXT NOT NULL,
            substep     TEXT,
            status      TEXT NOT NULL,
            current     BIGINT,
            total       BIGINT,
            message     TEXT,
            metadata    JSONB,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (run_id, id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS workflow_events (
            run_id      TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       JSONB NOT NULL,
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (run_id, key)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS streams (
            run_id      TEXT NOT NULL,
            key         TEXT NOT NULL,
            "offset"    BIGINT NOT NULL,
            value       JSONB NOT NULL,
            created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
            PRIMARY KEY (run_id, key, "offset")
        )
        "#,
    ] {
        sqlx::query(ddl).execute(&pool).await.ok()?;
    }

    // Clean slate for each test
    sqlx::query("TRUNCATE step_events, workflow_events, streams")
        .execute(&pool)
        .await
        .ok()?;

    Some(PgEventSink::new(pool))
}

#[tokio::test]
async fn step_event_ids_are_contiguous_per_run() {
    let Some(sink) = test_sink().await else {
        return;
    };

    for i in 0..5 {
        let id = sink
            .append_step_event(
                AppendStepEvent::new("run-a", "fetch", StepEventStatus::Progress)
                    .with_progress(i, 5),
            )
            .await
            .unwrap();
        assert_eq!(id, i + 1);
    }
    // A second run starts its own sequence.
    let id = sink
        .append_step_event(AppendStepEvent::new("run-b", "fetch", StepEventStatus::Running))
        .await
        .unwrap();
    assert_eq!(id, 1);
}

#[tokio::test]
async fn cursor_pagination_sees_every_event_once() {
    let Some(sink) = test_sink().await else {
        return;
    };

    for i in 0..7 {
        sink.append_step_event(
            AppendStepEvent::new("run-paginate", "step", StepEventStatus::Progress)
                .with_message(format!("event {i}")),
        )
        .await
        .unwrap();
    }

    let mut cursor = 0;
    let mut seen = vec![];
    loop {
        let page = sink.read_step_events("run-paginate", cursor, 3).await.unwrap();
        if page.is_empty() {
            break;
        }
        cursor = page.last().unwrap().id;
        seen.extend(page.into_iter().map(|e| e.id));
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7]);
}

#[tokio::test]
async fn events_channel_returns_last_written_value() {
    let Some(sink) = test_sink().await else {
        return;
    };

    sink.set_event("run-ev", "stage", json!("fetching")).await.unwrap();
    sink.set_event("run-ev", "stage_current", json!(3)).await.unwrap();
    sink.set_event("run-ev", "stage", json!("saving")).await.unwrap();

    let events = sink.get_events("run-ev").await.unwrap();
    assert_eq!(events["stage"], json!("saving"));
    assert_eq!(events["stage_current"], json!(3));
}

#[tokio::test]
async fn streams_are_append_only_with_per_key_offsets() {
    let Some(sink) = test_sink().await else {
        return;
    };

    for i in 0..4 {
        let offset = sink
            .write_stream("run-st", "progress", json!({"idx": i}))
            .await
            .unwrap();
        assert_eq!(offset, i + 1);
    }
    // A different key gets its own offset sequence.
    let offset = sink.write_stream("run-st", "logs", json!({"message": "hi"})).await.unwrap();
    assert_eq!(offset, 1);

    let page = sink.read_stream("run-st", "progress", 2, 10).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].offset, 3);
    assert_eq!(page[1].value, json!({"idx": 3}));
}

#[tokio::test]
async fn substep_events_round_trip() {
    let Some(sink) = test_sink().await else {
        return;
    };

    sink.append_step_event(
        AppendStepEvent::new("run-sub", "fetch_documents", StepEventStatus::Completed)
            .with_substep("fetch_batch_0")
            .with_progress(1, 2)
            .with_metadata(json!({"engine": "tavily"})),
    )
    .await
    .unwrap();

    let events = sink.read_step_events("run-sub", 0, 10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].substep.as_deref(), Some("fetch_batch_0"));
    assert_eq!(events[0].status, StepEventStatus::Completed);
    assert_eq!(events[0].current, Some(1));
    assert_eq!(events[0].total, Some(2));
    assert_eq!(events[0].metadata["engine"], json!("tavily"));
}
