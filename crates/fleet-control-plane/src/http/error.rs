//! API errors and how they are rendered.

use axum::{
    extract::Request,
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

use fleet_core::CoreError;

use crate::cloud::CloudError;
use crate::http::responses::ErrorResponse;
use crate::lock::LockError;

/// Errors returned by agent-facing handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InconsistentState(String),

    #[error("{0}")]
    LockTimeout(String),

    #[error("{0}")]
    Provider(String),

    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InconsistentState(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge { .. } | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::LockTimeout(_) | Self::Provider(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidStateTransition { .. } => Self::InconsistentState(e.to_string()),
            CoreError::UnexpectedTaskStatus { .. } => Self::Conflict(e.to_string()),
            CoreError::InvalidInput(msg) => Self::Validation(msg),
        }
    }
}

impl From<CloudError> for ApiError {
    fn from(e: CloudError) -> Self {
        match e {
            CloudError::UnknownProvider(_) | CloudError::InvalidSettings { .. } => {
                Self::Internal(e.to_string())
            }
            _ => Self::Provider(e.to_string()),
        }
    }
}

impl From<LockError> for ApiError {
    fn from(e: LockError) -> Self {
        Self::LockTimeout(e.to_string())
    }
}

/// Marker attached to error responses so [`render_errors`] can find them.
#[derive(Debug, Clone)]
struct ErrorMessage(String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let mut response = (self.status_code(), message.clone()).into_response();
        response.extensions_mut().insert(ErrorMessage(message));
        response
    }
}

/// Log API errors with the request they belong to, and answer in JSON
/// when the caller asked for it.
pub async fn render_errors(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let wants_json = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    let response = next.run(request).await;

    let Some(ErrorMessage(message)) = response.extensions().get::<ErrorMessage>().cloned() else {
        return response;
    };

    let status = response.status();
    if status.is_server_error() {
        error!(method = %method, uri = %uri, status = %status, error = %message, "Request failed");
    } else {
        warn!(method = %method, uri = %uri, status = %status, error = %message, "Request rejected");
    }

    if wants_json {
        (status, Json(ErrorResponse { error: message })).into_response()
    } else {
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockTitle;
    use fleet_core::HostStatus;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::NotFound("x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::InconsistentState("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::PayloadTooLarge { limit: 1 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Provider("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_conversions() {
        let e: ApiError = CoreError::InvalidStateTransition {
            from: HostStatus::Running,
            to: HostStatus::ProvisionFailed,
        }
        .into();
        assert!(matches!(e, ApiError::InconsistentState(_)));

        let e: ApiError = LockError::Timeout {
            title: LockTitle::TaskActivator,
            timeout: Duration::from_secs(1),
        }
        .into();
        assert!(matches!(e, ApiError::LockTimeout(_)));

        let e: ApiError = CloudError::UnknownProvider("ec2".into()).into();
        assert_eq!(e.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
