//! Errors surfaced by the chat orchestrator.
//!
//! Every variant maps to a stable machine-readable code and a non-empty list of
//! suggestions, so both the JSON error body and the terminal `error` stream
//! event can guide the caller.

use std::time::Duration;

use qbridge_protocol::StreamEvent;
use thiserror::Error;

use crate::worker::WorkerError;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Malformed, missing or oversized input.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("session {0} not found")]
    SessionNotFound(String),

    /// The worker could not be started.
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("worker did not answer within {}s", .0.as_secs())]
    WorkerTimeout(Duration),

    #[error("worker finished without producing any output")]
    NoOutput,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ChatError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ChatError::Internal(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Validation { .. } => "VALIDATION_ERROR",
            ChatError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            ChatError::WorkerUnavailable(_) => "WORKER_UNAVAILABLE",
            ChatError::WorkerTimeout(_) => "WORKER_TIMEOUT",
            ChatError::NoOutput => "WORKER_NO_OUTPUT",
            ChatError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show a caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn suggestions(&self) -> &'static [&'static str] {
        match self {
            ChatError::Validation { .. } => &[
                "Check that the request body is valid JSON with a non-empty `message`",
                "Keep messages within the configured length limit",
                "Session ids must be UUIDs as returned by POST /api/v1/sessions",
            ],
            ChatError::SessionNotFound(_) => &[
                "Check that the session id is correct",
                "The session may have expired; create a new one",
                "Create a session with POST /api/v1/sessions or omit session_id",
            ],
            ChatError::WorkerUnavailable(_) => &[
                "Make sure the worker CLI is installed and on PATH",
                "Run the worker's --version command to verify the installation",
                "Check the worker's credentials and region configuration",
            ],
            ChatError::WorkerTimeout(_) => &[
                "Complex requests can take a while; try again",
                "Simplify the request or split it into smaller questions",
                "Raise worker.timeouts.max_wait_secs if this happens often",
            ],
            ChatError::NoOutput => &[
                "Retry the request; the worker may have restarted",
                "Check the server logs for worker stderr output",
            ],
            ChatError::Internal(_) => &[
                "Retry the request",
                "If the problem persists, check the server logs",
            ],
        }
    }

    /// Terminal event for a stream that has already started.
    pub fn to_event(&self) -> StreamEvent {
        StreamEvent::Error {
            error: self.public_message(),
            code: self.code().to_string(),
            suggestions: self.suggestions().iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl From<WorkerError> for ChatError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::Spawn { .. } => ChatError::WorkerUnavailable(err.to_string()),
            WorkerError::Timeout(limit) => ChatError::WorkerTimeout(limit),
            WorkerError::NoOutput => ChatError::NoOutput,
            WorkerError::Terminated => {
                ChatError::WorkerUnavailable("the session's worker was shut down".to_string())
            }
            WorkerError::Io(e) => ChatError::Internal(format!("worker i/o failed: {e}")),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_error_has_suggestions() {
        let errors = [
            ChatError::validation("message", "too long"),
            ChatError::SessionNotFound("abc".to_string()),
            ChatError::WorkerUnavailable("missing".to_string()),
            ChatError::WorkerTimeout(Duration::from_secs(300)),
            ChatError::NoOutput,
            ChatError::internal("boom"),
        ];
        for err in errors {
            assert!(!err.suggestions().is_empty(), "{} has no suggestions", err.code());
        }
    }

    #[test]
    fn test_worker_errors_map_to_distinct_kinds() {
        let spawn = WorkerError::Spawn {
            program: "q".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(ChatError::from(spawn).code(), "WORKER_UNAVAILABLE");
        assert_eq!(
            ChatError::from(WorkerError::Timeout(Duration::from_secs(5))).code(),
            "WORKER_TIMEOUT"
        );
        assert_eq!(ChatError::from(WorkerError::NoOutput).code(), "WORKER_NO_OUTPUT");
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = ChatError::internal("db path /secret/x unreadable");
        assert_eq!(err.public_message(), "internal server error");
        match err.to_event() {
            StreamEvent::Error { error, code, .. } => {
                assert_eq!(error, "internal server error");
                assert_eq!(code, "INTERNAL_ERROR");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
