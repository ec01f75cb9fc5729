//! Provisioning callback.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    Json,
};
use tracing::{error, info, warn};

use fleet_core::protocol::HOST_READY_FAILED;
use fleet_core::{Event, Host, HostId, HostStatus};

use super::artifacts::read_capped;
use crate::http::responses::MessageResponse;
use crate::http::ApiError;
use crate::notify::notify_admins;
use crate::state::AppState;

const PROVISIONING_FAILURE_SUBJECT: &str = "[PROVISIONING-FAILURE]";

async fn notify_provisioning_failure(state: &AppState, host: &Host, reason: &str) {
    let name = if host.dns_name.is_empty() {
        host.id.as_str()
    } else {
        host.dns_name.as_str()
    };
    let subject = format!("{} Fleet provisioning failure on {}", PROVISIONING_FAILURE_SUBJECT, host.distro.id);
    let body = format!(
        "Provisioning failed on {} host {}: {}\n\n{}/host/{}",
        host.distro.id, name, reason, state.config.ui_url, host.id
    );
    notify_admins(state.notifier.as_ref(), &subject, &body).await;
}

/// `POST /host/{tag}/ready/{status}`: the host's setup script reports in.
///
/// On `failed` the setup output in the body (up to `max_log_bytes`, invalid
/// UTF-8 replaced) is kept verbatim on the `HostProvisionFailed` event. Otherwise the host's DNS name is resolved
/// through its provider and the host becomes `running`.
pub async fn host_ready(
    State(state): State<Arc<AppState>>,
    Path((tag, status)): Path<(String, String)>,
    body: Body,
) -> Result<Json<MessageResponse>, ApiError> {
    let host_id = HostId::new(tag);
    let host = state
        .get_host(&host_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Host {} not found", host_id)))?;

    if status == HOST_READY_FAILED {
        let bytes = read_capped(body, state.config.max_log_bytes).await?;
        let setup_logs = String::from_utf8_lossy(&bytes).into_owned();
        return provisioning_failed(&state, host, setup_logs).await;
    }

    let cloud_host = match state.cloud.cloud_host(
        host.clone(),
        &state.config.ssh_key_path,
        state.config.provider_timeout(),
    ) {
        Ok(cloud_host) => cloud_host,
        Err(e) => {
            error!(host_id = %host.id, provider = %host.provider, error = %e, "Failed to get cloud manager");
            notify_provisioning_failure(&state, &host, &e.to_string()).await;
            return Err(ApiError::Internal(format!(
                "Failed to get cloud manager for host {}: {}",
                host.id, e
            )));
        }
    };

    let dns_name = cloud_host.get_dns_name().await.map_err(|e| {
        error!(host_id = %host.id, error = %e, "Failed to get DNS name");
        ApiError::Provider(format!("Failed to get DNS name for host {}: {}", host.id, e))
    })?;

    let previous = state
        .update_host(&host.id, |h| -> Result<HostStatus, ApiError> {
            let previous = h.set_status(HostStatus::Running)?;
            h.dns_name = dns_name.clone();
            h.provisioned = true;
            Ok(previous)
        })
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Host {} not found", host.id)))??;

    state
        .events
        .record(Event::host_dns_name_set(&host.id, &dns_name))
        .await;
    state
        .events
        .log_host_status_changed(&host.id, previous, HostStatus::Running)
        .await;
    state.events.record(Event::host_provisioned(&host.id)).await;

    if let Err(e) = cloud_host.on_up().await {
        warn!(host_id = %host.id, error = %e, "Provider on_up hook failed");
    }

    info!(host_id = %host.id, dns_name = %dns_name, "Host is ready");
    Ok(Json(MessageResponse::new(format!(
        "Successfully marked host {} as provisioned",
        host.id
    ))))
}

async fn provisioning_failed(
    state: &AppState,
    host: Host,
    setup_logs: String,
) -> Result<Json<MessageResponse>, ApiError> {
    if !host.status.can_transition_to(HostStatus::ProvisionFailed) {
        return Err(ApiError::InconsistentState(format!(
            "Host {} is {} and cannot fail provisioning",
            host.id, host.status
        )));
    }

    notify_provisioning_failure(state, &host, "setup script failed").await;

    state
        .events
        .record(Event::host_provision_failed(&host.id, &setup_logs))
        .await;

    let previous = state
        .update_host(&host.id, |h| h.set_status(HostStatus::ProvisionFailed))
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Host {} not found", host.id)))??;
    state
        .events
        .log_host_status_changed(&host.id, previous, HostStatus::ProvisionFailed)
        .await;

    warn!(host_id = %host.id, "Host provisioning failed");
    Ok(Json(MessageResponse::new(format!(
        "Initializing host {} failed",
        host.id
    ))))
}
