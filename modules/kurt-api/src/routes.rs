use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

use kurt_common::types::{DisplayStatus, WorkflowStatus};
use kurt_events::EventSink;
use kurt_runtime::{RuntimeError, WorkflowRunner};
use kurt_store::runs::RunFilter;
use kurt_store::rows::WorkflowRunRow;
use kurt_store::RunStore;

/// How often the SSE endpoints re-poll the stores.
const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct ApiState {
    pub runs: RunStore,
    pub sink: Arc<dyn EventSink>,
    pub runner: Arc<WorkflowRunner>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/status", get(get_status))
        .route("/api/workflows/{id}/status/stream", get(stream_status))
        .route("/api/workflows/{id}/logs", get(get_logs))
        .route("/api/workflows/{id}/logs/stream", get(stream_logs))
        .route("/api/workflows/{id}/cancel", post(cancel_workflow))
        .route("/api/workflows/{id}/retry", post(retry_workflow))
        .with_state(state)
}

// --- Errors ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<kurt_store::StoreError> for ApiError {
    fn from(e: kurt_store::StoreError) -> Self {
        match e {
            kurt_store::StoreError::NotFound(what) => ApiError::NotFound(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RuntimeError> for ApiError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NotFound(what) => ApiError::NotFound(what),
            RuntimeError::Validation(message) => ApiError::BadRequest(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// --- Serialization ---

/// A workflow run as clients see it: display status plus the raw record.
#[derive(Serialize)]
struct WorkflowView {
    workflow_id: String,
    workflow_name: String,
    status: String,
    internal_status: String,
    started_at: chrono::DateTime<chrono::Utc>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    error: Option<String>,
    metadata: serde_json::Value,
}

fn to_view(row: WorkflowRunRow) -> WorkflowView {
    let display = row
        .status
        .parse::<WorkflowStatus>()
        .map(DisplayStatus::from)
        .map(|s| s.to_string())
        .unwrap_or_else(|_| row.status.to_uppercase());
    WorkflowView {
        workflow_id: row.workflow_id,
        workflow_name: row.workflow_name,
        status: display,
        internal_status: row.status,
        started_at: row.started_at,
        completed_at: row.completed_at,
        error: row.error,
        metadata: row.metadata,
    }
}

// --- Handlers ---

#[derive(Deserialize)]
struct ListParams {
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    search: Option<String>,
    workflow_type: Option<String>,
    parent_id: Option<String>,
}

async fn list_workflows(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Display-status filters map back onto the internal status set.
    let statuses = match params.status.as_deref() {
        Some(raw) => {
            let display: DisplayStatus = raw
                .parse()
                .map_err(|e: String| ApiError::BadRequest(e))?;
            display
                .internal_statuses()
                .iter()
                .map(|s| s.to_string())
                .collect()
        }
        None => vec![],
    };

    let filter = RunFilter {
        statuses,
        search: params.search,
        workflow_type: params.workflow_type,
        parent_id: params.parent_id,
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
    };

    let rows = state.runs.list(&filter).await?;
    let views: Vec<WorkflowView> = rows.into_iter().map(to_view).collect();
    let count = views.len();
    Ok(Json(json!({ "workflows": views, "count": count })))
}

async fn get_workflow(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowView>, ApiError> {
    let row = state.runs.get(&id).await?;
    Ok(Json(to_view(row)))
}

async fn get_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<kurt_runtime::LiveStatus>, ApiError> {
    let status = kurt_runtime::live_status(
        state.runner.state().as_ref(),
        state.sink.as_ref(),
        &id,
    )
    .await?;
    Ok(Json(status))
}

async fn stream_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // 404 before the stream starts.
    state.runs.get(&id).await?;

    let stream = async_stream::stream! {
        loop {
            let status = kurt_runtime::live_status(
                state.runner.state().as_ref(),
                state.sink.as_ref(),
                &id,
            )
            .await;

            match status {
                Ok(status) => {
                    let terminal = status
                        .status
                        .parse::<WorkflowStatus>()
                        .map(|s| s.is_terminal())
                        .unwrap_or(true);
                    let event = Event::default()
                        .event("status")
                        .data(serde_json::to_string(&status).unwrap_or_default());
                    yield Ok(event);
                    if terminal {
                        break;
                    }
                }
                Err(_) => break,
            }

            tokio::time::sleep(STREAM_POLL_INTERVAL).await;
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Deserialize)]
struct LogParams {
    step_id: Option<String>,
    since_id: Option<i64>,
    limit: Option<usize>,
}

async fn get_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<LogParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.runs.get(&id).await?;

    let events = state
        .sink
        .read_step_events(&id, params.since_id.unwrap_or(0), params.limit.unwrap_or(200))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    // The cursor advances over the raw page. Deriving it from the filtered
    // view would stall a paginating client on any window with no matching
    // step.
    let next_id = events.last().map(|e| e.id).unwrap_or(params.since_id.unwrap_or(0));

    let events: Vec<_> = match &params.step_id {
        Some(step_id) => events.into_iter().filter(|e| &e.step_id == step_id).collect(),
        None => events,
    };

    Ok(Json(json!({ "events": events, "next_id": next_id })))
}

async fn stream_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state.runs.get(&id).await?;

    let stream = async_stream::stream! {
        let mut cursor = 0i64;
        loop {
            let page = state.sink.read_step_events(&id, cursor, 200).await;
            match page {
                Ok(events) => {
                    for event in &events {
                        cursor = event.id;
                        let sse = Event::default()
                            .event("log")
                            .id(event.id.to_string())
                            .data(serde_json::to_string(event).unwrap_or_default());
                        yield Ok(sse);
                    }
                }
                Err(_) => break,
            }

            // The stream ends once the run is terminal and drained.
            match state.runs.status(&id).await {
                Ok(status) => {
                    let terminal = status
                        .parse::<WorkflowStatus>()
                        .map(|s| s.is_terminal())
                        .unwrap_or(true);
                    if terminal {
                        let remaining = state
                            .sink
                            .read_step_events(&id, cursor, 200)
                            .await
                            .unwrap_or_default();
                        if remaining.is_empty() {
                            break;
                        }
                    }
                }
                Err(_) => break,
            }

            tokio::time::sleep(STREAM_POLL_INTERVAL).await;
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn cancel_workflow(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Distinguish "unknown id" from "already terminal".
    state.runs.get(&id).await?;
    let flipped = state.runner.cancel(&id).await?;
    Ok(Json(json!({
        "workflow_id": id,
        "canceling": flipped,
    })))
}

async fn retry_workflow(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let handle = state.runner.retry(&id).await?;
    Ok(Json(json!({
        "workflow_id": handle.workflow_id(),
        "retried_from": id,
    })))
}
