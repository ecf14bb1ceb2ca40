//! Server-sent stream events.
//!
//! A streamed chat turn always emits exactly one `session` event first, then
//! zero or more `chunk` events, then a single terminal `done` or `error`.

use serde::{Deserialize, Serialize};

/// One event of `POST /api/v1/chat/stream`, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Announces the session the turn runs in (new sessions get their id here).
    Session { session_id: String },

    /// A piece of cleaned assistant output.
    Chunk { content: String },

    /// The turn completed successfully.
    Done,

    /// The turn failed; no further events follow.
    Error {
        error: String,
        code: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        suggestions: Vec<String>,
    },
}

impl StreamEvent {
    pub fn chunk(content: impl Into<String>) -> Self {
        StreamEvent::Chunk {
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_tags() {
        let json = serde_json::to_string(&StreamEvent::Session {
            session_id: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"session","session_id":"abc"}"#);

        let json = serde_json::to_string(&StreamEvent::chunk("hello")).unwrap();
        assert_eq!(json, r#"{"type":"chunk","content":"hello"}"#);

        let json = serde_json::to_string(&StreamEvent::Done).unwrap();
        assert_eq!(json, r#"{"type":"done"}"#);
    }

    #[test]
    fn test_error_event_parses() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"error","error":"worker timed out","code":"WORKER_TIMEOUT"}"#,
        )
        .unwrap();
        match event {
            StreamEvent::Error {
                code, suggestions, ..
            } => {
                assert_eq!(code, "WORKER_TIMEOUT");
                assert!(suggestions.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
