//! How a turn reaches the worker.
//!
//! Two strategies sit behind [`ChatTransport`]:
//!
//! - [`OneShotTransport`] spawns a fresh worker per turn and replays the recent
//!   transcript in front of the new message.
//! - [`PersistentTransport`] keeps one worker per session alive through the
//!   [`SessionRegistry`]; the worker remembers the conversation itself, so only
//!   the new message is sent.

use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

use super::error::{ChatError, ChatResult};
use crate::dedup::DuplicateRemover;
use crate::sanitize::{LineClass, Outbound, OutputSanitizer};
use crate::worker::process::drain_stderr;
use crate::worker::{SessionRegistry, WorkerConfig, WorkerError};

/// Cleaned answer text, chunk by chunk.
pub type TextStream = BoxStream<'static, ChatResult<String>>;

/// Which transport serves chat turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// One long-lived worker per session.
    #[default]
    Persistent,
    /// A fresh worker per turn with the transcript replayed.
    Oneshot,
}

impl std::fmt::Display for ChatMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatMode::Persistent => write!(f, "persistent"),
            ChatMode::Oneshot => write!(f, "oneshot"),
        }
    }
}

/// One user message on its way to a worker.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub session_id: &'a str,
    pub message: &'a str,
    /// Rendered transcript of earlier turns, for transports that replay it.
    pub context: Option<&'a str>,
    pub work_dir: Option<&'a Path>,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn mode(&self) -> ChatMode;

    /// Whether [`TurnRequest::context`] should be filled in.
    fn uses_transcript(&self) -> bool;

    /// Run a turn and return the whole cleaned answer.
    async fn send_and_collect(&self, request: TurnRequest<'_>) -> ChatResult<String>;

    /// Run a turn and stream the cleaned answer as it is produced.
    async fn send_and_stream(&self, request: TurnRequest<'_>) -> ChatResult<TextStream>;

    /// Drop any per-session resources.
    async fn release(&self, _session_id: &str) {}

    /// Reclaim resources idle for longer than `max_idle`; returns how many.
    async fn sweep_idle(&self, _max_idle: Duration) -> usize {
        0
    }

    /// Worker processes currently alive.
    async fn active_processes(&self) -> usize {
        0
    }

    async fn shutdown(&self) {}
}

/// Dedup each chunk and drop chunks already delivered in this turn.
fn dedup_chunks(stream: TextStream, remover: Arc<DuplicateRemover>) -> TextStream {
    let mut seen: HashSet<String> = HashSet::new();
    stream
        .try_filter_map(move |chunk| {
            let cleaned = remover.remove(&chunk);
            let keep = !cleaned.trim().is_empty() && seen.insert(cleaned.clone());
            futures::future::ready(Ok(keep.then_some(cleaned)))
        })
        .boxed()
}

/// Drain a stream into one deduplicated text.
async fn collect_text(mut stream: TextStream, remover: &DuplicateRemover) -> ChatResult<String> {
    let mut pieces = Vec::new();
    while let Some(piece) = stream.next().await {
        pieces.push(piece?);
    }
    let text = remover.remove(&pieces.join("\n"));
    if text.trim().is_empty() {
        return Err(ChatError::NoOutput);
    }
    Ok(text)
}

/// Ask the worker binary for its version; true if it answers successfully.
pub async fn probe_worker(config: &WorkerConfig) -> bool {
    let mut cmd = Command::new(&config.program);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    let Ok(mut child) = cmd.spawn() else {
        return false;
    };
    matches!(
        timeout(Duration::from_secs(5), child.wait()).await,
        Ok(Ok(status)) if status.success()
    )
}

// ============================================================================
// Persistent transport
// ============================================================================

pub struct PersistentTransport {
    registry: Arc<SessionRegistry>,
    remover: Arc<DuplicateRemover>,
}

impl PersistentTransport {
    pub fn new(registry: Arc<SessionRegistry>, remover: Arc<DuplicateRemover>) -> Self {
        Self { registry, remover }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

#[async_trait]
impl ChatTransport for PersistentTransport {
    fn mode(&self) -> ChatMode {
        ChatMode::Persistent
    }

    fn uses_transcript(&self) -> bool {
        false
    }

    async fn send_and_collect(&self, request: TurnRequest<'_>) -> ChatResult<String> {
        let stream = self.send_and_stream(request).await?;
        collect_text(stream, &self.remover).await
    }

    async fn send_and_stream(&self, request: TurnRequest<'_>) -> ChatResult<TextStream> {
        let process = self
            .registry
            .get_or_create(request.session_id, request.work_dir)
            .await?;
        let chunks = process.turn(request.message).await?;
        Ok(dedup_chunks(
            chunks.map_err(ChatError::from).boxed(),
            Arc::clone(&self.remover),
        ))
    }

    async fn release(&self, session_id: &str) {
        self.registry.remove(session_id).await;
    }

    async fn sweep_idle(&self, max_idle: Duration) -> usize {
        self.registry.sweep_expired(max_idle).await
    }

    async fn active_processes(&self) -> usize {
        self.registry.len().await
    }

    async fn shutdown(&self) {
        self.registry.shutdown_all().await;
    }
}

// ============================================================================
// One-shot transport
// ============================================================================

pub struct OneShotTransport {
    config: Arc<WorkerConfig>,
    sanitizer: Arc<OutputSanitizer>,
    remover: Arc<DuplicateRemover>,
}

impl OneShotTransport {
    pub fn new(
        config: Arc<WorkerConfig>,
        sanitizer: Arc<OutputSanitizer>,
        remover: Arc<DuplicateRemover>,
    ) -> Self {
        Self {
            config,
            sanitizer,
            remover,
        }
    }

    /// The single line sent to the worker: transcript, then the new message.
    ///
    /// The worker treats every line as a separate prompt, so the transcript is
    /// flattened onto one line.
    pub fn build_prompt(&self, request: &TurnRequest<'_>) -> String {
        let message = self.config.format_message(request.message);
        match request.context.map(str::trim).filter(|c| !c.is_empty()) {
            Some(context) => {
                let flat = context.split_whitespace().collect::<Vec<_>>().join(" ");
                format!(
                    "Previous conversation history: {flat} Now, please answer my question: {message}"
                )
            }
            None => message,
        }
    }

    /// Spawn a worker, hand it the prompt and the quit command, close stdin.
    async fn launch(&self, prompt: &str, work_dir: Option<&Path>) -> ChatResult<Child> {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.oneshot_args);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.config.env {
            if std::env::var_os(key).is_none() {
                cmd.env(key, value);
            }
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| WorkerError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;
        debug!("Spawned one-shot worker (pid {:?})", child.id());

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ChatError::internal("one-shot worker has no stdin"))?;
        let input = format!("{prompt}\n{}\n", self.config.quit_command);
        let written = match stdin.write_all(input.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => {}
            // The worker may exit without reading; its output and status decide.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("One-shot worker closed stdin early");
            }
            Err(e) => return Err(WorkerError::Io(e).into()),
        }
        drop(stdin);
        Ok(child)
    }

    fn outbound(&self, prompt: &str, request: &TurnRequest<'_>) -> Outbound {
        let mut outbound = Outbound::new(prompt);
        outbound.extend(request.message);
        outbound
    }
}

#[async_trait]
impl ChatTransport for OneShotTransport {
    fn mode(&self) -> ChatMode {
        ChatMode::Oneshot
    }

    fn uses_transcript(&self) -> bool {
        true
    }

    async fn send_and_collect(&self, request: TurnRequest<'_>) -> ChatResult<String> {
        let prompt = self.build_prompt(&request);
        let child = self.launch(&prompt, request.work_dir).await?;
        let limit = self.config.timeouts.max_wait();

        let output = match timeout(limit, child.wait_with_output()).await {
            Ok(output) => output.map_err(WorkerError::Io)?,
            Err(_) => {
                warn!("One-shot worker for session {} timed out", request.session_id);
                return Err(ChatError::WorkerTimeout(limit));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outbound = self.outbound(&prompt, &request);
        let cleaned = self.sanitizer.clean_output(&stdout, &outbound);
        let text = self.remover.remove(&cleaned);
        if !text.trim().is_empty() {
            return Ok(text);
        }

        if output.status.success() {
            Err(ChatError::NoOutput)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or_default().trim().to_string();
            info!(
                "One-shot worker for session {} failed ({}): {}",
                request.session_id, output.status, detail
            );
            Err(ChatError::WorkerUnavailable(format!(
                "worker {}{}",
                output.status,
                if detail.is_empty() {
                    String::new()
                } else {
                    format!(": {detail}")
                }
            )))
        }
    }

    async fn send_and_stream(&self, request: TurnRequest<'_>) -> ChatResult<TextStream> {
        let prompt = self.build_prompt(&request);
        let mut child = self.launch(&prompt, request.work_dir).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ChatError::internal("one-shot worker has no stdout"))?;
        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(request.session_id.to_string(), stderr)));

        let state = OneShotReader {
            child,
            stderr,
            lines: BufReader::new(stdout).lines(),
            outbound: self.outbound(&prompt, &request),
            sanitizer: Arc::clone(&self.sanitizer),
            batch: self.config.oneshot_lines_per_chunk.max(1),
            deadline: Instant::now() + self.config.timeouts.max_wait(),
            limit: self.config.timeouts.max_wait(),
            emitted: 0,
            done: false,
        };
        let chunks = stream::unfold(state, |mut state| async move {
            let item = state.next_chunk().await?;
            Some((item, state))
        })
        .boxed();
        Ok(dedup_chunks(chunks, Arc::clone(&self.remover)))
    }
}

/// Reads a one-shot worker's stdout in fixed-size line batches.
struct OneShotReader {
    child: Child,
    stderr: Option<JoinHandle<()>>,
    lines: Lines<BufReader<ChildStdout>>,
    outbound: Outbound,
    sanitizer: Arc<OutputSanitizer>,
    batch: usize,
    deadline: Instant,
    limit: Duration,
    emitted: usize,
    done: bool,
}

impl OneShotReader {
    async fn next_chunk(&mut self) -> Option<ChatResult<String>> {
        if self.done {
            return None;
        }
        let mut buffer: Vec<String> = Vec::with_capacity(self.batch);
        loop {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.lines.next_line()).await {
                Ok(Ok(Some(line))) => {
                    if let LineClass::Content(text) = self.sanitizer.classify(&line, &self.outbound)
                    {
                        buffer.push(text);
                        if buffer.len() >= self.batch {
                            self.emitted += 1;
                            return Some(Ok(buffer.join("\n")));
                        }
                    }
                }
                Ok(Ok(None)) | Ok(Err(_)) => {
                    self.done = true;
                    if !buffer.is_empty() {
                        self.emitted += 1;
                        return Some(Ok(buffer.join("\n")));
                    }
                    if self.emitted > 0 {
                        return None;
                    }
                    return Some(Err(self.exit_error().await));
                }
                Err(_) => {
                    self.done = true;
                    if !buffer.is_empty() {
                        self.emitted += 1;
                        return Some(Ok(buffer.join("\n")));
                    }
                    if self.emitted > 0 {
                        return None;
                    }
                    return Some(Err(ChatError::WorkerTimeout(self.limit)));
                }
            }
        }
    }

    /// Explain an empty answer from the worker's exit status.
    async fn exit_error(&mut self) -> ChatError {
        match timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                ChatError::WorkerUnavailable(format!("worker {status}"))
            }
            _ => ChatError::NoOutput,
        }
    }
}

impl Drop for OneShotReader {
    fn drop(&mut self) {
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
    }
}
