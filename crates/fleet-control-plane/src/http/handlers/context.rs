//! Read-only project context for running agents.

use std::sync::Arc;

use axum::{extract::State, Extension, Json};

use fleet_core::{Distro, ProjectRef, ProjectVars, Task, Version};

use crate::http::{ApiError, RequestContext};
use crate::state::AppState;

pub async fn fetch_task(Extension(ctx): Extension<RequestContext>) -> Result<Json<Task>, ApiError> {
    Ok(Json(ctx.task()?.clone()))
}

/// Project variables; a project without any gets an empty map.
pub async fn fetch_vars(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<ProjectVars>, ApiError> {
    let task = ctx.task()?;
    let vars = state
        .project_vars
        .read()
        .await
        .get(&task.project)
        .cloned()
        .unwrap_or_default();
    Ok(Json(vars))
}

pub async fn fetch_version(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Version>, ApiError> {
    let task = ctx.task()?;
    state
        .versions
        .read()
        .await
        .get(&task.version)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Version {} not found", task.version)))
}

pub async fn fetch_project_ref(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<ProjectRef>, ApiError> {
    let task = ctx.task()?;
    state
        .project_refs
        .read()
        .await
        .get(&task.project)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", task.project)))
}

pub async fn fetch_distro(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Distro>, ApiError> {
    let task = ctx.task()?;
    state
        .distros
        .read()
        .await
        .get(&task.distro_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Distro {} not found", task.distro_id)))
}
