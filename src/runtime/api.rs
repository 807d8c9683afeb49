//! API-facing route paths, request/response bodies and error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::core::{QrmError, ResourceStatus, ServerStatus};

/// Liveness probe.
pub const URL_GET_ROOT: &str = "/";
/// Submit a resource request.
pub const URL_POST_NEW_REQUEST: &str = "/new_request";
/// Cancel a token.
pub const URL_POST_CANCEL_TOKEN: &str = "/cancel_token";
/// Query a token's projection.
pub const URL_GET_TOKEN_STATUS: &str = "/token_status";
/// Derive a renewed token.
pub const URL_GET_NEW_TOKEN: &str = "/new_token";
/// Whether a token holds resources.
pub const URL_GET_IS_REQUEST_ACTIVE: &str = "/is_request_active";

/// Register resources.
pub const ADD_RESOURCES: &str = "/add_resources";
/// Remove resources.
pub const REMOVE_RESOURCES: &str = "/remove_resources";
/// Pool snapshot.
pub const STATUS: &str = "/status";
/// Set the broker status flag.
pub const SET_SERVER_STATUS: &str = "/set_server_status";
/// Set a resource's status.
pub const SET_RESOURCE_STATUS: &str = "/set_resource_status";
/// Attach a job to a resource.
pub const ADD_JOB_TO_RESOURCE: &str = "/add_job_to_resource";
/// Detach a job from a resource.
pub const REMOVE_JOB: &str = "/remove_job";
/// Force-release an allocated resource.
pub const FORCE_RELEASE: &str = "/force_release";

/// Confirmation text returned by `POST /cancel_token`.
pub fn canceled_token_msg(token: &str) -> String {
    format!("token {token} canceled")
}

/// Body or query carrying a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBody {
    /// Request token.
    pub token: String,
}

/// Response of `GET /is_request_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveResponse {
    /// Queried token.
    pub token: String,
    /// Whether it holds resources.
    pub active: bool,
}

/// Query of `POST /remove_resources`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveQuery {
    /// Force-release allocated targets instead of failing.
    #[serde(default)]
    pub force: bool,
}

/// Resource reference in a removal body; extra fields such as `type` are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Resource name.
    pub name: String,
}

/// Body of `POST /set_server_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatusBody {
    /// New broker status.
    pub status: ServerStatus,
}

/// Body of `POST /set_resource_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatusBody {
    /// Target resource.
    pub resource_name: String,
    /// New status.
    pub status: ResourceStatus,
    /// Force-release first if allocated.
    #[serde(default)]
    pub force: bool,
}

/// Body of `POST /add_job_to_resource`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobBody {
    /// Target resource.
    pub resource_name: String,
    /// Job identifier.
    pub job: String,
}

/// Body naming a single resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNameBody {
    /// Target resource.
    pub resource_name: String,
}

/// Count of affected resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    /// How many resources the call changed.
    pub count: usize,
}

/// Response of `POST /force_release`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResponse {
    /// Released resource.
    pub resource_name: String,
    /// Token of the request that held it, if any.
    pub holder: Option<String>,
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
}

/// Domain error carried to an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub QrmError);

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            QrmError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            QrmError::TokenNotFound(_) | QrmError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            QrmError::ResourceBusy(_) => StatusCode::CONFLICT,
            QrmError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            QrmError::ConflictDuringMatch(_) | QrmError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<QrmError> for ApiError {
    fn from(err: QrmError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "request failed");
        } else {
            tracing::debug!(status = %status, error = %self.0, "request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
