//! HTTP server for the control plane.
//!
//! Provides endpoints for:
//! - The agent protocol (`/api/2/agent/...`, `/api/2/task/{id}/...`)
//! - The provisioning callback (`/api/2/host/{tag}/ready/{status}`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod auth;
mod error;
mod extract;
mod handlers;
pub mod responses;

pub use auth::{check_consistency, check_host, check_task, RequestContext};
pub use error::ApiError;
pub use extract::AppJson;

/// Routes authenticated by task secret, then by host.
fn task_and_host_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let with_secret = Router::new()
        .route("/task/:task_id/start", post(handlers::start_task))
        .route("/task/:task_id/end", post(handlers::end_task))
        .route("/task/:task_id/heartbeat", post(handlers::heartbeat))
        .route("/task/:task_id/log", post(handlers::append_log))
        .route("/task/:task_id/results", post(handlers::attach_results))
        .route("/task/:task_id/test_logs", post(handlers::attach_test_log))
        .route("/task/:task_id/system_info", post(handlers::system_info))
        .route("/task/:task_id/process_info", post(handlers::process_info))
        .route_layer(from_fn_with_state(state.clone(), auth::require_host))
        .route_layer(from_fn_with_state(state.clone(), auth::require_task));

    let without_secret = Router::new()
        .route("/task/:task_id/files", post(handlers::attach_files))
        .route_layer(from_fn_with_state(state.clone(), auth::require_host))
        .route_layer(from_fn_with_state(state.clone(), auth::require_task_no_secret));

    with_secret.merge(without_secret)
}

/// Read-only task context.
fn task_context_routes(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let with_secret = Router::new()
        .route("/task/:task_id", get(handlers::fetch_task))
        .route("/task/:task_id/", get(handlers::fetch_task))
        .route("/task/:task_id/fetch_vars", get(handlers::fetch_vars))
        .route_layer(from_fn_with_state(state.clone(), auth::require_task));

    let without_secret = Router::new()
        .route("/task/:task_id/version", get(handlers::fetch_version))
        .route("/task/:task_id/project_ref", get(handlers::fetch_project_ref))
        .route("/task/:task_id/distro", get(handlers::fetch_distro))
        .route_layer(from_fn_with_state(state.clone(), auth::require_task_no_secret));

    with_secret.merge(without_secret)
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS layer for devtools access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let agent = Router::new()
        .route("/agent/next_task", post(handlers::next_task))
        .route_layer(from_fn_with_state(state.clone(), auth::require_host));

    let api = Router::new()
        .merge(agent)
        .merge(task_and_host_routes(&state))
        .merge(task_context_routes(&state))
        .route("/host/:tag/ready/:status", post(handlers::host_ready));

    Router::new()
        .nest("/api/2", api)
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(from_fn(error::render_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
