use crate::config::ValidationError as ConfigValidationError;
use crate::incident::ValidationError;
use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::{Value, json};
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors surfaced to the caller of an incident entry point
///
/// Collaborator errors carry the status and body the collaborator returned so
/// they can be relayed unchanged.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid or missing credentials")]
    Unauthorized,

    #[error("Request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("User lookup failed with status {status}")]
    UserLookupFailed { status: StatusCode, body: Value },

    /// Neither backend could be reached; the status is always 503.
    #[error("Incident service unavailable")]
    BackendUnavailable { body: Value },

    #[error("Incident service failed with status {status}")]
    BackendServerError { status: StatusCode, body: Value },

    /// Any non-creation status below 500. Never retried.
    #[error("Incident service rejected the request with status {status}")]
    BackendClientError { status: StatusCode, body: Value },

    #[error("Invalid response from incident service: {0}")]
    InvalidBackendResponse(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::UserLookupFailed { status, .. }
            | GatewayError::BackendServerError { status, .. }
            | GatewayError::BackendClientError { status, .. } => *status,
            GatewayError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::InvalidBackendResponse(_) => StatusCode::BAD_GATEWAY,
            GatewayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match self {
            GatewayError::UserLookupFailed { body, .. }
            | GatewayError::BackendUnavailable { body }
            | GatewayError::BackendServerError { body, .. }
            | GatewayError::BackendClientError { body, .. } => body,
            other => Value::String(other.to_string()),
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

/// Errors that stop the gateway from starting or serving
#[derive(Error, Debug)]
pub enum ServeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}
