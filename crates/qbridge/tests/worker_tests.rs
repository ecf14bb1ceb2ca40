//! Worker process and chat service tests against shell-script workers.
#![cfg(unix)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use qbridge::chat::ChatMode;
use qbridge::sanitize::OutputSanitizer;
use qbridge::worker::{IdleTimeouts, SessionProcess, SessionRegistry, WorkerConfig, WorkerState};
use qbridge_protocol::{ChatRequest, StreamEvent};
use tempfile::TempDir;

mod common;
use common::{ECHO_WORKER, SILENT_WORKER, chat_service, worker_config};

fn request(session_id: Option<&str>, message: &str) -> ChatRequest {
    ChatRequest {
        session_id: session_id.map(str::to_string),
        message: message.to_string(),
    }
}

fn pid_line(answer: &str) -> &str {
    answer
        .lines()
        .find(|line| line.starts_with("pid "))
        .unwrap_or_else(|| panic!("no pid line in {answer:?}"))
}

fn registry(config: WorkerConfig) -> SessionRegistry {
    SessionRegistry::new(Arc::new(config), Arc::new(OutputSanitizer::default()))
}

fn process(name: &str, config: WorkerConfig) -> Arc<SessionProcess> {
    Arc::new(SessionProcess::new(
        name,
        None,
        Arc::new(config),
        Arc::new(OutputSanitizer::default()),
    ))
}

/// Run one turn and keep the chunks that arrived.
async fn answer_chunks(process: &Arc<SessionProcess>, text: &str) -> Vec<String> {
    let stream = process.turn(text).await.unwrap();
    let items: Vec<_> = stream.collect().await;
    items.into_iter().filter_map(Result::ok).collect()
}

/// A looping worker whose answer to every line is produced by `body`.
fn answering_worker(body: &str) -> String {
    format!(
        r#"
while IFS= read -r line; do
  if [ "$line" = "/quit" ]; then exit 0; fi
  echo "> $line"
{body}
done
"#
    )
}

fn with_timeouts(script: &str, chunk_idle_ms: Vec<u64>, response_idle_ms: Vec<u64>) -> WorkerConfig {
    WorkerConfig {
        timeouts: IdleTimeouts {
            chunk_idle_ms,
            response_idle_ms,
            max_wait_secs: 10,
        },
        ..worker_config(script)
    }
}

#[tokio::test]
async fn test_persistent_turns_reuse_one_process() {
    let tmp = TempDir::new().unwrap();
    let service = chat_service(&tmp, ChatMode::Persistent, worker_config(ECHO_WORKER));

    let first = service.chat(request(None, "my name is Ada")).await.unwrap();
    assert!(first.message.contains("You said: my name is Ada"), "{}", first.message);
    assert!(!first.message.contains("> my name is Ada"));

    let second = service
        .chat(request(Some(&first.session_id), "what is my name?"))
        .await
        .unwrap();
    assert!(
        second.message.starts_with("You said: what is my name?"),
        "transcript was sent: {}",
        second.message
    );
    assert_eq!(pid_line(&first.message), pid_line(&second.message));
    assert_eq!(service.active_processes().await, 1);

    let info = service.get_session(&first.session_id).unwrap();
    assert_eq!(info.message_count, 4);

    service.delete_session(&first.session_id).await.unwrap();
    assert_eq!(service.active_processes().await, 0);
}

#[tokio::test]
async fn test_sessions_get_separate_processes() {
    let tmp = TempDir::new().unwrap();
    let service = chat_service(&tmp, ChatMode::Persistent, worker_config(ECHO_WORKER));

    let (a, b) = tokio::join!(
        service.chat(request(None, "first session")),
        service.chat(request(None, "second session")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.session_id, b.session_id);
    assert_ne!(pid_line(&a.message), pid_line(&b.message));
    assert!(b.message.contains("You said: second session"));
    assert_eq!(service.active_processes().await, 2);

    service.shutdown().await;
    assert_eq!(service.active_processes().await, 0);
}

#[tokio::test]
async fn test_streamed_persistent_turn() {
    let tmp = TempDir::new().unwrap();
    let service = chat_service(&tmp, ChatMode::Persistent, worker_config(ECHO_WORKER));

    let (id, stream) = service.stream_chat(request(None, "stream me")).await.unwrap();
    let events: Vec<StreamEvent> = stream.collect().await;

    assert_eq!(events.first(), Some(&StreamEvent::Session { session_id: id.clone() }));
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    let text: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Chunk { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert!(text.join("\n").contains("You said: stream me"));
    assert_eq!(service.get_session(&id).unwrap().message_count, 2);
}

#[tokio::test]
async fn test_missing_worker_is_unavailable() {
    let tmp = TempDir::new().unwrap();
    let service = chat_service(
        &tmp,
        ChatMode::Persistent,
        WorkerConfig {
            program: "/nonexistent/qbridge-test-worker".to_string(),
            ..worker_config(ECHO_WORKER)
        },
    );

    let err = service.chat(request(None, "hello")).await.unwrap_err();
    assert_eq!(err.code(), "WORKER_UNAVAILABLE");
    assert_eq!(service.active_processes().await, 0);
}

#[tokio::test]
async fn test_silent_worker_reports_no_output() {
    let tmp = TempDir::new().unwrap();
    let service = chat_service(&tmp, ChatMode::Oneshot, worker_config(SILENT_WORKER));

    let err = service.chat(request(None, "hello")).await.unwrap_err();
    assert_eq!(err.code(), "WORKER_NO_OUTPUT");
}

#[tokio::test]
async fn test_concurrent_get_or_create_shares_process() {
    let registry = registry(worker_config(ECHO_WORKER));

    let (a, b) = tokio::join!(
        registry.get_or_create("s1", None),
        registry.get_or_create("s1", None),
    );
    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len().await, 1);
    assert_eq!(a.state().await, WorkerState::Running);

    assert!(registry.remove("s1").await);
    assert!(!registry.remove("s1").await);
    assert_eq!(a.state().await, WorkerState::Terminated);
    assert!(!a.is_alive().await);
}

#[tokio::test]
async fn test_sweep_expired_removes_idle_processes() {
    let registry = registry(worker_config(ECHO_WORKER));
    registry.get_or_create("idle", None).await.unwrap();

    assert_eq!(registry.sweep_expired(Duration::from_secs(60)).await, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.sweep_expired(Duration::from_millis(10)).await, 1);
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_turn_after_terminate_fails() {
    let process = Arc::new(SessionProcess::new(
        "gone",
        None,
        Arc::new(worker_config(ECHO_WORKER)),
        Arc::new(OutputSanitizer::default()),
    ));
    process.start().await.unwrap();
    assert!(process.pid().is_some());

    process.terminate().await;
    assert!(process.turn("hello").await.is_err());
}

#[tokio::test]
async fn test_answer_is_not_cut_while_worker_keeps_writing() {
    // One pause, then steady output with gaps shorter than the chunk
    // threshold, running well past the response threshold.
    let script = answering_worker(
        r#"  echo "intro"
  sleep 0.35
  i=1
  while [ $i -le 15 ]; do echo "body $i"; sleep 0.05; i=$((i+1)); done
  echo "END""#,
    );
    let process = process("long", with_timeouts(&script, vec![200], vec![500]));

    let chunks = answer_chunks(&process, "hi").await;
    assert_eq!(chunks.first().map(String::as_str), Some("intro"));
    let text = chunks.join("\n");
    assert!(text.contains("body 1\n"), "{text}");
    assert!(text.contains("body 15"), "{text}");
    assert!(text.ends_with("END"), "{text}");
    process.terminate().await;
}

#[tokio::test]
async fn test_chunk_thresholds_escalate() {
    let script = answering_worker(
        r#"  echo "a"
  sleep 0.3
  echo "b"
  sleep 0.3
  echo "c""#,
    );

    let flat = process("flat", with_timeouts(&script, vec![100], vec![1_000]));
    assert_eq!(answer_chunks(&flat, "go").await, vec!["a", "b", "c"]);
    flat.terminate().await;

    // After the first chunk the flush threshold grows past the gaps.
    let escalating = process("escalating", with_timeouts(&script, vec![100, 600], vec![1_000]));
    assert_eq!(answer_chunks(&escalating, "go").await, vec!["a", "b\nc"]);
    escalating.terminate().await;
}

#[tokio::test]
async fn test_dead_worker_restarts_on_next_turn() {
    let script = answering_worker(
        r#"  if [ "$line" = "exit" ]; then exit 3; fi
  echo "You said: $line"
  echo "pid $$""#,
    );
    let process = process("mortal", worker_config(&script));

    let first = answer_chunks(&process, "hello").await.join("\n");
    let first_pid = process.pid().unwrap();
    assert!(first.contains("You said: hello"), "{first}");

    let _ = process.turn("exit").await.unwrap().collect::<Vec<_>>().await;
    let deadline = Instant::now() + Duration::from_secs(5);
    while process.is_alive().await {
        assert!(Instant::now() < deadline, "worker did not exit");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(process.state().await, WorkerState::Dead);

    let second = answer_chunks(&process, "again").await.join("\n");
    assert!(second.contains("You said: again"), "{second}");
    assert_ne!(process.pid().unwrap(), first_pid);
    assert_ne!(pid_line(&first), pid_line(&second));
    assert_eq!(process.state().await, WorkerState::Running);
    process.terminate().await;
}

#[tokio::test]
async fn test_terminate_escalates_to_sigterm() {
    // Ignores the quit command and keeps running once stdin closes.
    let script = r#"
while IFS= read -r line; do echo "> $line"; done
while :; do sleep 0.1; done
"#;
    let process = process("deaf", worker_config(script));
    process.start().await.unwrap();

    let started = Instant::now();
    process.terminate().await;
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");
    assert!(!process.is_alive().await);
}

#[tokio::test]
async fn test_terminate_escalates_to_kill() {
    let script = r#"
trap '' TERM
while IFS= read -r line; do echo "> $line"; done
while :; do sleep 0.1; done
"#;
    let process = process("stubborn", worker_config(script));
    process.start().await.unwrap();
    let pid = process.pid().unwrap();

    let started = Instant::now();
    process.terminate().await;
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(process.state().await, WorkerState::Terminated);
    // SAFETY: signal 0 only checks whether the pid still exists.
    let exists = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
    assert!(!exists, "worker {pid} survived terminate");
}

#[tokio::test]
async fn test_quick_exit_on_quit_command() {
    let process = process("polite", worker_config(ECHO_WORKER));
    process.start().await.unwrap();

    let started = Instant::now();
    process.terminate().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(process.state().await, WorkerState::Terminated);
}

#[tokio::test]
async fn test_persistent_turn_times_out_without_output() {
    let tmp = TempDir::new().unwrap();
    let mut config = worker_config("while IFS= read -r line; do :; done");
    config.timeouts.max_wait_secs = 1;
    let service = chat_service(&tmp, ChatMode::Persistent, config);

    let started = Instant::now();
    let err = service.chat(request(None, "hello")).await.unwrap_err();
    assert_eq!(err.code(), "WORKER_TIMEOUT");
    assert!(started.elapsed() >= Duration::from_secs(1));
    service.shutdown().await;
}
