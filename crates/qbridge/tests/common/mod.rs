//! Test utilities and common setup.
//!
//! Workers are small `sh` scripts that mimic the chat CLI: they echo each
//! input line behind the prompt marker and answer on the following lines.
#![allow(dead_code)]

use axum::Router;
use qbridge::api;
use qbridge::chat::{ChatConfig, ChatMode, ChatService};
use qbridge::dedup::DuplicateRemover;
use qbridge::sanitize::OutputSanitizer;
use qbridge::session::{SessionConfig, SessionStore};
use qbridge::worker::{IdleTimeouts, WorkerConfig};
use tempfile::TempDir;

/// Long-lived worker: answers every line and reports its pid.
pub const ECHO_WORKER: &str = r#"
while IFS= read -r line; do
  if [ "$line" = "/quit" ]; then exit 0; fi
  echo "> $line"
  echo "You said: $line"
  echo "pid $$"
done
"#;

/// Per-turn worker: answers the first line and exits.
pub const ONESHOT_WORKER: &str = r#"
IFS= read -r line
echo "> $line"
echo "Answer: $line"
"#;

/// Worker that reads its input and exits without saying anything.
pub const SILENT_WORKER: &str = "cat >/dev/null";

/// Worker settings for a shell script, with short idle thresholds.
pub fn worker_config(script: &str) -> WorkerConfig {
    let args = vec!["-c".to_string(), script.to_string()];
    WorkerConfig {
        program: "sh".to_string(),
        args: args.clone(),
        oneshot_args: args,
        shutdown_grace_secs: 1,
        kill_grace_secs: 1,
        timeouts: IdleTimeouts {
            chunk_idle_ms: vec![100],
            response_idle_ms: vec![400],
            max_wait_secs: 10,
        },
        ..WorkerConfig::default()
    }
}

pub fn session_config(tmp: &TempDir) -> SessionConfig {
    SessionConfig {
        sessions_dir: tmp.path().to_path_buf(),
        ..SessionConfig::default()
    }
}

pub fn chat_service(tmp: &TempDir, mode: ChatMode, worker: WorkerConfig) -> ChatService {
    ChatService::new(
        ChatConfig {
            mode,
            ..ChatConfig::default()
        },
        SessionStore::new(session_config(tmp)),
        worker,
        OutputSanitizer::default(),
        DuplicateRemover::default(),
    )
}

/// Router backed by a worker script.
pub fn test_app(tmp: &TempDir, mode: ChatMode, script: &str) -> (Router, ChatService) {
    let service = chat_service(tmp, mode, worker_config(script));
    let app = api::create_router(api::AppState::new(service.clone()));
    (app, service)
}
