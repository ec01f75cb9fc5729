//! Log, test result, artifact and telemetry ingestion.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    Extension, Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use fleet_core::protocol::TestLogReply;
use fleet_core::{ArtifactEntry, ArtifactFile, Event, EventType, TaskLog, TestLog, TestResults};

use crate::crypto::generate_record_id;
use crate::http::responses::MessageResponse;
use crate::http::{ApiError, AppJson, RequestContext};
use crate::state::AppState;

/// Read the whole body, rejecting anything over `limit` bytes.
///
/// At most `limit + 1` bytes are buffered, so an oversized body is detected
/// without reading it all.
pub async fn read_capped(body: Body, limit: usize) -> Result<Bytes, ApiError> {
    match axum::body::to_bytes(body, limit.saturating_add(1)).await {
        Ok(bytes) if bytes.len() <= limit => Ok(bytes),
        Ok(_) => Err(ApiError::PayloadTooLarge { limit }),
        Err(e) => {
            warn!(error = %e, limit, "Error reading request body");
            Err(ApiError::PayloadTooLarge { limit })
        }
    }
}

async fn parse_capped<T: DeserializeOwned>(state: &AppState, body: Body) -> Result<T, ApiError> {
    let bytes = read_capped(body, state.config.max_log_bytes).await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Validation(format!("Invalid request body: {}", e)))
}

/// Store a batch of agent log lines for the current execution.
pub async fn append_log(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Body,
) -> Result<Json<MessageResponse>, ApiError> {
    let task = ctx.task()?;
    let mut log: TaskLog = parse_capped(&state, body).await?;

    log.task_id = Some(task.id.clone());
    log.execution = task.execution;
    log.timestamp.get_or_insert_with(Utc::now);

    debug!(task_id = %task.id, lines = log.messages.len(), "Appending task log");
    state.task_logs.write().await.push(log);

    Ok(Json(MessageResponse::new("Logs added")))
}

/// Replace the task's test results. A retried post does not duplicate them.
pub async fn attach_results(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Body,
) -> Result<Json<MessageResponse>, ApiError> {
    let task = ctx.task()?;
    let results: TestResults = parse_capped(&state, body).await?;
    let count = results.results.len();

    state
        .update_task(&task.id, |t| t.test_results = results.results)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", task.id)))?;

    info!(task_id = %task.id, count, "Test results attached");
    Ok(Json(MessageResponse::new("Test results attached")))
}

/// Store one test log and link it to the task.
pub async fn attach_test_log(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Body,
) -> Result<Json<TestLogReply>, ApiError> {
    let task = ctx.task()?;
    let mut log: TestLog = parse_capped(&state, body).await?;

    log.id = generate_record_id();
    log.task = Some(task.id.clone());
    log.task_execution = task.execution;
    let id = log.id.clone();

    state
        .update_task(&task.id, |t| t.test_log_ids.push(id.clone()))
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", task.id)))?;
    state.test_logs.write().await.insert(id.clone(), log);

    debug!(task_id = %task.id, log_id = %id, "Test log attached");
    Ok(Json(TestLogReply { id }))
}

/// Record files the task published. Repeated calls add to the task's entry.
pub async fn attach_files(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    body: Body,
) -> Result<Json<MessageResponse>, ApiError> {
    let task = ctx.task()?;
    let files: Vec<ArtifactFile> = parse_capped(&state, body).await?;
    let count = files.len();

    state
        .artifacts
        .write()
        .await
        .entry(task.id.clone())
        .or_insert_with(|| ArtifactEntry {
            task_id: task.id.clone(),
            task_display_name: task.display_name.clone(),
            build_id: task.build_id.clone(),
            files: Vec::new(),
        })
        .files
        .extend(files);

    info!(task_id = %task.id, count, "Artifact files attached");
    Ok(Json(MessageResponse::new(format!(
        "Artifact files for task {} successfully attached",
        task.id
    ))))
}

async fn record_telemetry(
    state: &AppState,
    ctx: &RequestContext,
    event_type: EventType,
    payload: serde_json::Value,
) -> Result<Json<MessageResponse>, ApiError> {
    let task = ctx.task()?;
    state.events.record(Event::task(&task.id, event_type, payload)).await;
    Ok(Json(MessageResponse::new("Telemetry recorded")))
}

pub async fn system_info(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    AppJson(payload): AppJson<serde_json::Value>,
) -> Result<Json<MessageResponse>, ApiError> {
    record_telemetry(&state, &ctx, EventType::TaskSystemInfo, payload).await
}

pub async fn process_info(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    AppJson(payload): AppJson<serde_json::Value>,
) -> Result<Json<MessageResponse>, ApiError> {
    record_telemetry(&state, &ctx, EventType::TaskProcessInfo, payload).await
}
