//! HTTP-facing errors.
//!
//! Only failures that happen before the response body starts streaming can be
//! reported with a status code; anything later just ends the stream.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::core::relay::RelayError;
use crate::state::ConnectionLimitError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing or empty header: {0}")]
    MissingHeader(&'static str),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    ConnectionLimit(#[from] ConnectionLimitError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            AppError::Relay(RelayError::TimeoutFailure { .. }) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Relay(RelayError::MalformedControlMessage(_))
            | AppError::Relay(RelayError::ClientStreamFailure(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Relay(_) => StatusCode::BAD_GATEWAY,
            AppError::ConnectionLimit(ConnectionLimitError::GlobalLimitReached) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::ConnectionLimit(ConnectionLimitError::PerIpLimitReached) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingHeader(_) => "missing_header",
            AppError::Relay(RelayError::ProvisioningFailure(_)) => "provisioning_failure",
            AppError::Relay(RelayError::UpstreamConnectionFailure(_)) => {
                "upstream_connection_failure"
            }
            AppError::Relay(RelayError::MalformedControlMessage(_)) => "malformed_control_message",
            AppError::Relay(RelayError::ClientStreamFailure(_)) => "client_stream_failure",
            AppError::Relay(RelayError::TimeoutFailure { .. }) => "timeout",
            AppError::Relay(RelayError::InvalidTarget(_)) => "invalid_target",
            AppError::ConnectionLimit(ConnectionLimitError::GlobalLimitReached) => "at_capacity",
            AppError::ConnectionLimit(ConnectionLimitError::PerIpLimitReached) => {
                "too_many_sessions"
            }
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{}", self);
        } else {
            tracing::warn!(code = self.code(), "{}", self);
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}
