//! HTTP error mapping
//!
//! Caller-fixable errors return 4xx with a structured body; everything else
//! collapses to 500 with a correlation id and no internals leaked.

use crate::Error;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

/// Structured error body returned by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error_kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Error wrapper implementing the HTTP mapping
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            Error::Invalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Forbidden { .. } => StatusCode::FORBIDDEN,
            Error::Conflict { .. }
            | Error::StaleVersion { .. }
            | Error::IllegalTransition { .. }
            | Error::Cancelled => StatusCode::CONFLICT,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Transport { .. } => StatusCode::BAD_GATEWAY,
            Error::Config(_)
            | Error::Database(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // No internals on the wire; the correlation id links the log line
            let correlation_id = Uuid::now_v7().to_string();
            error!(correlation_id, error = %self.0, "internal error");
            ErrorBody {
                error_kind: "internal".to_string(),
                message: "internal error".to_string(),
                details: None,
                correlation_id: Some(correlation_id),
            }
        } else {
            ErrorBody {
                error_kind: self.0.error_kind().to_string(),
                message: self.0.to_string(),
                details: None,
                correlation_id: None,
            }
        };
        (status, Json(body)).into_response()
    }
}
