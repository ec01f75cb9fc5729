//! Task start, end and heartbeat.

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use chrono::Utc;
use tracing::{info, warn};

use fleet_core::protocol::{EndTaskResponse, HeartbeatResponse, TaskStartRequest};
use fleet_core::{Event, HostStatus, TaskEndDetail};

use crate::http::responses::MessageResponse;
use crate::http::{ApiError, AppJson, RequestContext};
use crate::lock::LockTitle;
use crate::state::AppState;

/// Mark the task started and record the agent's pid on its host.
pub async fn start_task(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    AppJson(req): AppJson<TaskStartRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let task = ctx.task()?;
    let host = ctx.host()?;

    let _guard = state
        .locks
        .get(LockTitle::TaskActivator)
        .acquire(host.id.as_str(), state.config.lock_timeout())
        .await?;

    {
        let mut tasks = state.tasks.write().await;
        let mut hosts = state.hosts.write().await;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", task.id)))?;
        let host = hosts
            .get_mut(&host.id)
            .ok_or_else(|| ApiError::NotFound(format!("Host {} not found", host.id)))?;

        stored.start(Utc::now())?;
        host.task_pid = Some(req.pid.clone());
    }

    state
        .events
        .record(Event::host_task_pid_set(&host.id, &req.pid))
        .await;
    info!(task_id = %task.id, host_id = %host.id, pid = %req.pid, "Task started");

    Ok(Json(MessageResponse::new(format!("Task {} started", task.id))))
}

/// Finish the task and free its host.
pub async fn end_task(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    AppJson(detail): AppJson<TaskEndDetail>,
) -> Result<Json<EndTaskResponse>, ApiError> {
    let task = ctx.task()?;
    let host = ctx.host()?;
    detail.validate()?;

    let _guard = state
        .locks
        .get(LockTitle::TaskActivator)
        .acquire(host.id.as_str(), state.config.lock_timeout())
        .await?;

    let (status, host_status) = {
        let mut tasks = state.tasks.write().await;
        let mut hosts = state.hosts.write().await;
        let stored = tasks
            .get_mut(&task.id)
            .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", task.id)))?;
        let host = hosts
            .get_mut(&host.id)
            .ok_or_else(|| ApiError::NotFound(format!("Host {} not found", host.id)))?;

        stored.finish(detail, Utc::now())?;
        host.running_task = None;
        host.task_pid = None;
        (stored.status, host.status)
    };

    state
        .events
        .record(Event::host_running_task_cleared(&host.id, &task.id))
        .await;
    state
        .events
        .record(Event::host_task_finished(&host.id, &task.id, status))
        .await;
    info!(task_id = %task.id, host_id = %host.id, status = %status, "Task finished");

    let should_exit = matches!(
        host_status,
        HostStatus::Decommissioned | HostStatus::Terminated
    );
    Ok(Json(EndTaskResponse {
        should_exit,
        message: format!("Successfully finished task {}", task.id),
    }))
}

/// Record the agent's liveness and tell it whether to abort.
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let task = ctx.task()?;
    let now = Utc::now();

    let abort = match state
        .update_task(&task.id, |t| {
            t.last_heartbeat = Some(now);
            t.aborted
        })
        .await
    {
        Some(abort) => abort,
        None => {
            warn!(task_id = %task.id, "Error updating task heartbeat");
            task.aborted
        }
    };

    if abort {
        info!(task_id = %task.id, "Sending abort signal");
    }
    Ok(Json(HeartbeatResponse { abort }))
}
