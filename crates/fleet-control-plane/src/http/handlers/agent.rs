//! Task dispatch.

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use chrono::Utc;
use tracing::{debug, info, warn};

use fleet_core::protocol::NextTaskResponse;
use fleet_core::{Event, HostStatus, Task};

use crate::http::{ApiError, RequestContext};
use crate::lock::LockTitle;
use crate::state::AppState;

fn assigned(task: &Task) -> NextTaskResponse {
    NextTaskResponse {
        task_id: Some(task.id.to_string()),
        task_secret: Some(task.secret.clone()),
        should_exit: false,
    }
}

/// Hand the calling host its next task.
///
/// A host already running an unfinished task gets that task again.
/// Otherwise the host's distro queue is popped until a dispatchable task
/// turns up; tasks that can no longer be dispatched are dropped from the
/// queue on the way.
pub async fn next_task(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<NextTaskResponse>, ApiError> {
    let host = ctx.host()?;

    match host.status {
        HostStatus::Decommissioned | HostStatus::Terminated => {
            info!(host_id = %host.id, status = %host.status, "Host should exit");
            return Ok(Json(NextTaskResponse {
                should_exit: true,
                ..Default::default()
            }));
        }
        status if !status.can_accept_tasks() => {
            debug!(host_id = %host.id, status = %status, "Host cannot take tasks");
            return Ok(Json(NextTaskResponse::default()));
        }
        _ => {}
    }

    let _guard = state
        .locks
        .get(LockTitle::TaskActivator)
        .acquire(host.id.as_str(), state.config.lock_timeout())
        .await?;

    let now = Utc::now();
    let dispatched = {
        let mut tasks = state.tasks.write().await;
        let mut hosts = state.hosts.write().await;
        let host = hosts
            .get_mut(&host.id)
            .ok_or_else(|| ApiError::NotFound(format!("Host {} not found", host.id)))?;

        if let Some(running) = host.running_task.clone() {
            match tasks.get(&running) {
                Some(task) if !task.status.is_finished() => {
                    debug!(host_id = %host.id, task_id = %task.id, "Host is already running a task");
                    return Ok(Json(assigned(task)));
                }
                _ => {
                    warn!(host_id = %host.id, task_id = %running, "Clearing stale running task");
                    host.running_task = None;
                }
            }
        }

        let mut queues = state.task_queues.write().await;
        let mut dispatched = None;
        if let Some(queue) = queues.get_mut(&host.distro.id) {
            while let Some(task_id) = queue.pop_front() {
                let Some(task) = tasks.get_mut(&task_id) else {
                    warn!(task_id = %task_id, "Queued task does not exist");
                    continue;
                };
                if !task.is_dispatchable() {
                    debug!(task_id = %task_id, status = %task.status, "Skipping undispatchable task");
                    continue;
                }
                task.dispatch(host.id.clone(), now);
                host.running_task = Some(task_id);
                dispatched = Some(task.clone());
                break;
            }
        }
        dispatched
    };

    match dispatched {
        Some(task) => {
            state
                .events
                .record(Event::host_running_task_set(&host.id, &task.id))
                .await;
            info!(host_id = %host.id, task_id = %task.id, "Task dispatched");
            Ok(Json(assigned(&task)))
        }
        None => {
            debug!(host_id = %host.id, distro = %host.distro.id, "No task available");
            Ok(Json(NextTaskResponse::default()))
        }
    }
}
