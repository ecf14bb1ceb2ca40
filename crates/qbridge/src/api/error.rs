//! HTTP error responses.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use qbridge_protocol::ErrorBody;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::chat::ChatError;

/// Anything a handler can fail with.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    /// The body was not the JSON the endpoint expects.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Chat(err) => match err {
                ChatError::Validation { .. } => StatusCode::BAD_REQUEST,
                ChatError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                ChatError::WorkerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                ChatError::WorkerTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
                ChatError::NoOutput => StatusCode::BAD_GATEWAY,
                ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Chat(err) => err.code(),
            Self::InvalidBody(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
        }
    }

    fn suggestions(&self) -> Vec<String> {
        let suggestions: &[&str] = match self {
            Self::Chat(err) => err.suggestions(),
            Self::InvalidBody(_) => &[
                "Send a JSON body with Content-Type: application/json",
                "Include a non-empty `message` field",
            ],
            Self::NotFound(_) => &["See GET / for the list of endpoints"],
        };
        suggestions.iter().map(|s| s.to_string()).collect()
    }

    fn details(&self) -> Option<String> {
        match self {
            Self::Chat(ChatError::Validation { field, .. }) => Some(format!("field: {field}")),
            Self::Chat(ChatError::WorkerTimeout(limit)) => {
                Some(format!("timeout: {}s", limit.as_secs()))
            }
            _ => None,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Chat(err) => err.public_message(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        match &self {
            ApiError::Chat(ChatError::Internal(msg)) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::Chat(
                err @ (ChatError::WorkerUnavailable(_)
                | ChatError::WorkerTimeout(_)
                | ChatError::NoOutput),
            ) => {
                warn!(error_code = code, message = %err, "Worker error");
            }
            other => {
                debug!(error_code = code, message = %other, "Client error");
            }
        }

        let body = ErrorBody {
            error: self.public_message(),
            code: code.to_string(),
            details: self.details(),
            suggestions: self.suggestions(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection.body_text())
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ChatError::validation("message", "empty"), StatusCode::BAD_REQUEST),
            (ChatError::SessionNotFound("x".into()), StatusCode::NOT_FOUND),
            (ChatError::WorkerUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (ChatError::WorkerTimeout(Duration::from_secs(1)), StatusCode::GATEWAY_TIMEOUT),
            (ChatError::NoOutput, StatusCode::BAD_GATEWAY),
            (ChatError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_validation_details_name_the_field() {
        let err = ApiError::from(ChatError::validation("session_id", "bad"));
        assert_eq!(err.details().as_deref(), Some("field: session_id"));
        assert!(!err.suggestions().is_empty());
    }
}
