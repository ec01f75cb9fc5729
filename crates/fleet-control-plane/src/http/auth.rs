//! Agent authentication gate.
//!
//! Task and host routes resolve the caller's task and host from path and
//! headers, verify their secrets, and bind the result into the request as a
//! [`RequestContext`]. On host routes that also carry a task, the host must
//! be the one running that task.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use fleet_core::protocol::{HOST_HEADER, HOST_SECRET_HEADER, TASK_SECRET_HEADER};
use fleet_core::{Host, HostId, Task, TaskId};

use crate::crypto::secrets_match;
use crate::http::ApiError;
use crate::state::AppState;

/// Task and host resolved for the current request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub task: Option<Task>,
    pub host: Option<Host>,
}

impl RequestContext {
    pub fn task(&self) -> Result<&Task, ApiError> {
        self.task
            .as_ref()
            .ok_or_else(|| ApiError::Internal("no task bound to request".to_string()))
    }

    pub fn host(&self) -> Result<&Host, ApiError> {
        self.host
            .as_ref()
            .ok_or_else(|| ApiError::Internal("no host bound to request".to_string()))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Resolve a task, optionally verifying the caller's secret.
pub async fn check_task(
    state: &AppState,
    task_id: Option<&str>,
    secret: Option<&str>,
    verify_secret: bool,
) -> Result<Task, ApiError> {
    let task_id = non_empty(task_id)
        .ok_or_else(|| ApiError::Validation("Request is missing task id".to_string()))?;

    let task = state
        .get_task(&TaskId::new(task_id))
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Task {} not found", task_id)))?;

    if verify_secret && !secrets_match(&task.secret, secret.unwrap_or_default()) {
        return Err(ApiError::Conflict(format!("Wrong secret sent for task {}", task_id)));
    }

    Ok(task)
}

/// Resolve a host, verify its secret and, when a task is already bound,
/// check that this host is the one running it.
///
/// The host's last-communication time is refreshed on success.
pub async fn check_host(
    state: &AppState,
    host_id: Option<&str>,
    secret: Option<&str>,
    task: Option<&Task>,
) -> Result<Host, ApiError> {
    let host_id = non_empty(host_id)
        .ok_or_else(|| ApiError::Validation("Request is missing host information".to_string()))?;

    let host = state
        .get_host(&HostId::new(host_id))
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Host {} not found", host_id)))?;

    if !secrets_match(&host.secret, secret.unwrap_or_default()) {
        return Err(ApiError::Conflict(format!("Invalid host secret for host {}", host_id)));
    }

    if let Some(task) = task {
        check_consistency(&host, task)?;
    }

    state.touch_host(&host.id).await;
    Ok(host)
}

/// A host may only act on the task it is running.
pub fn check_consistency(host: &Host, task: &Task) -> Result<(), ApiError> {
    if host.runs(&task.id) {
        return Ok(());
    }

    let running = host
        .running_task
        .as_ref()
        .map(|id| id.as_str())
        .unwrap_or("no task");
    warn!(host_id = %host.id, task_id = %task.id, running = %running, "Host and task disagree");
    Err(ApiError::InconsistentState(format!(
        "Host {} should be running {}, not {}",
        host.id, running, task.id
    )))
}

fn path_param<'a>(params: &'a Option<Path<HashMap<String, String>>>, key: &str) -> Option<&'a str> {
    params.as_ref().and_then(|Path(p)| p.get(key)).map(String::as_str)
}

async fn task_gate(
    state: &AppState,
    params: Option<Path<HashMap<String, String>>>,
    mut request: Request,
    next: Next,
    verify_secret: bool,
) -> Result<Response, ApiError> {
    let task = check_task(
        state,
        path_param(&params, "task_id"),
        header(request.headers(), TASK_SECRET_HEADER),
        verify_secret,
    )
    .await?;

    let mut ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();
    ctx.task = Some(task);
    request.extensions_mut().insert(ctx);

    Ok(next.run(request).await)
}

/// Bind the path's task after checking the `Task-Secret` header.
pub async fn require_task(
    State(state): State<Arc<AppState>>,
    params: Option<Path<HashMap<String, String>>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    task_gate(&state, params, request, next, true).await
}

/// Bind the path's task without checking its secret.
pub async fn require_task_no_secret(
    State(state): State<Arc<AppState>>,
    params: Option<Path<HashMap<String, String>>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    task_gate(&state, params, request, next, false).await
}

/// Bind the calling host. Must run after the task gate on task routes.
pub async fn require_host(
    State(state): State<Arc<AppState>>,
    params: Option<Path<HashMap<String, String>>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    let host_id = non_empty(path_param(&params, "host_id")).or(header(headers, HOST_HEADER));
    let mut ctx = request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();

    let host = check_host(
        &state,
        host_id,
        header(headers, HOST_SECRET_HEADER),
        ctx.task.as_ref(),
    )
    .await?;

    ctx.host = Some(host);
    request.extensions_mut().insert(ctx);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::testing::*;
    use fleet_core::HostStatus;

    #[tokio::test]
    async fn test_check_task() {
        let fx = fixture();
        let task = add_task(&fx, "t1").await;

        assert!(check_task(&fx.state, Some("t1"), Some(&task.secret), true).await.is_ok());
        assert!(check_task(&fx.state, Some("t1"), None, false).await.is_ok());
        assert!(matches!(
            check_task(&fx.state, Some("t1"), Some("wrong"), true).await,
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            check_task(&fx.state, Some("t1"), Some(""), true).await,
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            check_task(&fx.state, Some("t9"), None, false).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            check_task(&fx.state, None, None, false).await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_check_host_consistency() {
        let fx = fixture();
        let task = add_task(&fx, "t1").await;
        let owner = add_host(&fx, "h1", HostStatus::Running).await;
        let other = add_host(&fx, "h2", HostStatus::Running).await;
        fx.state
            .update_host(&owner.id, |h| h.running_task = Some(task.id.clone()))
            .await;

        let host = check_host(&fx.state, Some("h1"), Some(&owner.secret), Some(&task))
            .await
            .unwrap();
        assert_eq!(host.id, owner.id);
        assert!(fx.state.get_host(&owner.id).await.unwrap().last_communication_time.is_some());

        assert!(matches!(
            check_host(&fx.state, Some("h2"), Some(&other.secret), Some(&task)).await,
            Err(ApiError::InconsistentState(_))
        ));
        assert!(fx.state.get_host(&other.id).await.unwrap().last_communication_time.is_none());
    }

    #[tokio::test]
    async fn test_check_host_secret_and_missing_id() {
        let fx = fixture();
        add_host(&fx, "h1", HostStatus::Running).await;

        assert!(matches!(
            check_host(&fx.state, Some("h1"), None, None).await,
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            check_host(&fx.state, None, None, None).await,
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            check_host(&fx.state, Some("ghost"), None, None).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
