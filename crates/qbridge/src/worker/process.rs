//! One long-lived worker process per session.
//!
//! A [`SessionProcess`] owns the child, a background task reading its stdout,
//! and the receiving half of a bounded chunk channel. The reader groups
//! sanitized output lines into chunks, flushing when output goes quiet or when
//! the worker echoes a new request at its prompt. Every chunk is tagged with the
//! turn that was current when its lines arrived, so leftovers from an earlier
//! turn are never delivered as part of the next answer.
//!
//! ## Sections
//!
//! - State and handles
//! - Lifecycle (start, liveness, terminate)
//! - Turns (send, read)
//! - Background reader

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::config::{IdleTimeouts, WorkerConfig};
use super::error::{WorkerError, WorkerResult};
use crate::sanitize::{LineClass, Outbound, OutputSanitizer};

/// Incrementally produced answer text for one turn.
pub type ChunkStream = BoxStream<'static, WorkerResult<String>>;

// ============================================================================
// State and handles
// ============================================================================

/// Lifecycle of a session's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    NotStarted,
    Starting,
    Running,
    Dead,
    Restarting,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::NotStarted => "not_started",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Dead => "dead",
            WorkerState::Restarting => "restarting",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Output lines flushed together, tagged with the turn they belong to.
#[derive(Debug)]
struct Chunk {
    turn: u64,
    text: String,
}

/// The request currently being answered.
#[derive(Debug, Clone, Default)]
struct TurnInfo {
    id: u64,
    outbound: Arc<Outbound>,
}

/// Handles used while a turn is in flight. Guarded by the turn lock.
#[derive(Default)]
struct ProcessIo {
    stdin: Option<ChildStdin>,
    chunks: Option<mpsc::Receiver<Chunk>>,
}

/// Child process and background tasks.
struct ProcessControl {
    state: WorkerState,
    child: Option<Child>,
    reader: Option<JoinHandle<()>>,
    stderr: Option<JoinHandle<()>>,
}

impl ProcessControl {
    /// Poll the child; a child that has exited moves the state to `Dead`.
    fn is_alive(&mut self, session_id: &str) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                info!(
                    "Worker for session {} {}",
                    session_id,
                    format_exit_status(status.code(), exit_signal(&status))
                );
                self.mark_dead();
                false
            }
            Err(e) => {
                warn!("Failed to poll worker for session {}: {:?}", session_id, e);
                self.mark_dead();
                false
            }
        }
    }

    fn mark_dead(&mut self) {
        self.child = None;
        self.abort_tasks();
        if self.state != WorkerState::Terminated {
            self.state = WorkerState::Dead;
        }
    }

    fn abort_tasks(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
    }
}

/// A session's worker process.
pub struct SessionProcess {
    session_id: String,
    work_dir: Option<PathBuf>,
    config: Arc<WorkerConfig>,
    sanitizer: Arc<OutputSanitizer>,
    created_at: DateTime<Utc>,
    last_activity_ms: AtomicI64,
    /// When the reader last saw any output line, in Unix ms.
    last_output_ms: Arc<AtomicI64>,
    pid: AtomicU32,
    terminated: AtomicBool,
    turn_tx: watch::Sender<TurnInfo>,
    io: Arc<Mutex<ProcessIo>>,
    control: Mutex<ProcessControl>,
}

impl fmt::Debug for SessionProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionProcess")
            .field("session_id", &self.session_id)
            .field("pid", &self.pid())
            .field("work_dir", &self.work_dir)
            .finish()
    }
}

impl SessionProcess {
    /// Create a handle in the `NotStarted` state.
    pub fn new(
        session_id: impl Into<String>,
        work_dir: Option<PathBuf>,
        config: Arc<WorkerConfig>,
        sanitizer: Arc<OutputSanitizer>,
    ) -> Self {
        let now = Utc::now();
        let (turn_tx, _) = watch::channel(TurnInfo::default());
        Self {
            session_id: session_id.into(),
            work_dir,
            config,
            sanitizer,
            created_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            last_output_ms: Arc::new(AtomicI64::new(0)),
            pid: AtomicU32::new(0),
            terminated: AtomicBool::new(false),
            turn_tx,
            io: Arc::new(Mutex::new(ProcessIo::default())),
            control: Mutex::new(ProcessControl {
                state: WorkerState::NotStarted,
                child: None,
                reader: None,
                stderr: None,
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    /// PID of the most recently started child.
    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity_ms.load(Ordering::Acquire))
            .unwrap_or(self.created_at)
    }

    pub fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_activity())
            .to_std()
            .unwrap_or_default()
    }

    /// True while a turn holds the process.
    pub fn is_busy(&self) -> bool {
        self.io.try_lock().is_err()
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Release);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub async fn state(&self) -> WorkerState {
        let mut control = self.control.lock().await;
        control.is_alive(&self.session_id);
        control.state
    }

    pub async fn is_alive(&self) -> bool {
        self.control.lock().await.is_alive(&self.session_id)
    }

    /// Spawn the worker unless it is already running.
    pub async fn start(&self) -> WorkerResult<()> {
        let mut io = self.io.lock().await;
        self.ensure_running(&mut io).await
    }

    /// Make sure a live child exists, spawning at most once.
    async fn ensure_running(&self, io: &mut ProcessIo) -> WorkerResult<()> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(WorkerError::Terminated);
        }

        let mut control = self.control.lock().await;
        if control.is_alive(&self.session_id) {
            return Ok(());
        }

        let restarting = control.state != WorkerState::NotStarted;
        if restarting {
            warn!(
                "Worker for session {} is not running, restarting",
                self.session_id
            );
            control.state = WorkerState::Restarting;
        } else {
            control.state = WorkerState::Starting;
        }

        match self.spawn(&mut control, io) {
            Ok(pid) => {
                control.state = WorkerState::Running;
                info!("Started worker for session {} (pid {})", self.session_id, pid);
                Ok(())
            }
            Err(e) => {
                control.state = if restarting {
                    WorkerState::Dead
                } else {
                    WorkerState::NotStarted
                };
                error!("Failed to start worker for session {}: {}", self.session_id, e);
                Err(e)
            }
        }
    }

    fn spawn(&self, control: &mut ProcessControl, io: &mut ProcessIo) -> WorkerResult<u32> {
        let config = &self.config;
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args);
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &config.env {
            if std::env::var_os(key).is_none() {
                cmd.env(key, value);
            }
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| WorkerError::Spawn {
            program: config.program.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or_default();

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                return Err(WorkerError::Io(std::io::Error::other(
                    "worker stdio pipes unavailable",
                )));
            }
        };

        let (chunk_tx, chunk_rx) = mpsc::channel(config.chunk_buffer.max(1));
        let reader = tokio::spawn(stdout_reader_task(
            self.session_id.clone(),
            stdout,
            chunk_tx,
            self.turn_tx.subscribe(),
            Arc::clone(&self.sanitizer),
            config.timeouts.clone(),
            Arc::clone(&self.last_output_ms),
        ));
        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(self.session_id.clone(), stderr)));

        control.abort_tasks();
        control.child = Some(child);
        control.reader = Some(reader);
        control.stderr = stderr;
        io.stdin = Some(stdin);
        io.chunks = Some(chunk_rx);

        self.pid.store(pid, Ordering::Release);
        self.touch();
        Ok(pid)
    }

    /// Stop the worker: quit command, then SIGTERM, then SIGKILL.
    ///
    /// Safe to call repeatedly and on a process that already exited. A turn in
    /// flight ends once the reader is stopped.
    pub async fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }

        let child = {
            let mut control = self.control.lock().await;
            control.abort_tasks();
            control.state = WorkerState::Terminated;
            control.child.take()
        };

        let Some(mut child) = child else {
            debug!("Worker for session {} was not running", self.session_id);
            self.release_io().await;
            return;
        };

        let running = matches!(child.try_wait(), Ok(None));
        if running {
            if let Ok(mut io) = self.io.try_lock() {
                if let Some(stdin) = io.stdin.as_mut() {
                    let quit = format!("{}\n", self.config.quit_command);
                    if stdin.write_all(quit.as_bytes()).await.is_ok() {
                        let _ = stdin.flush().await;
                    }
                }
                io.stdin = None;
                io.chunks = None;
            }

            if timeout(self.config.shutdown_grace(), child.wait())
                .await
                .is_err()
            {
                warn!(
                    "Worker for session {} ignored quit, sending SIGTERM",
                    self.session_id
                );
                send_sigterm(&mut child);
                if timeout(self.config.kill_grace(), child.wait()).await.is_err() {
                    warn!("Worker for session {} ignored SIGTERM, killing", self.session_id);
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill worker for session {}: {:?}", self.session_id, e);
                    }
                }
            }
        }

        self.release_io().await;
        info!("Terminated worker for session {}", self.session_id);
    }

    /// Drop stdin and the chunk receiver once the turn in flight (if any) has
    /// observed the stopped reader.
    async fn release_io(&self) {
        match timeout(self.config.kill_grace(), self.io.lock()).await {
            Ok(mut io) => {
                io.stdin = None;
                io.chunks = None;
            }
            Err(_) => debug!(
                "Turn still open while terminating session {}",
                self.session_id
            ),
        }
    }

    // ========================================================================
    // Turns
    // ========================================================================

    /// Wait for exclusive use of the worker. Released when the returned turn
    /// (or the response stream it becomes) is dropped.
    pub async fn lock_turn(self: &Arc<Self>) -> ProcessTurn {
        let io = Arc::clone(&self.io).lock_owned().await;
        ProcessTurn {
            process: Arc::clone(self),
            io,
        }
    }

    /// Send `text` and stream the answer.
    pub async fn turn(self: &Arc<Self>, text: &str) -> WorkerResult<ChunkStream> {
        let mut turn = self.lock_turn().await;
        turn.send_message(text).await?;
        Ok(turn.read_response())
    }

    fn closed_error(&self) -> WorkerError {
        if self.terminated.load(Ordering::Acquire) {
            WorkerError::Terminated
        } else {
            WorkerError::NoOutput
        }
    }
}

impl Drop for SessionProcess {
    fn drop(&mut self) {
        if let Ok(mut control) = self.control.try_lock() {
            control.abort_tasks();
        }
    }
}

/// Exclusive access to a worker for one request/response exchange.
pub struct ProcessTurn {
    process: Arc<SessionProcess>,
    io: OwnedMutexGuard<ProcessIo>,
}

impl ProcessTurn {
    pub fn process(&self) -> &Arc<SessionProcess> {
        &self.process
    }

    /// Write one message to the worker, restarting it once if it died.
    pub async fn send_message(&mut self, text: &str) -> WorkerResult<()> {
        let process = Arc::clone(&self.process);
        process.ensure_running(&mut self.io).await?;

        if let Some(chunks) = self.io.chunks.as_mut() {
            let mut stale = 0usize;
            while chunks.try_recv().is_ok() {
                stale += 1;
            }
            if stale > 0 {
                debug!(
                    "Discarded {} stale chunks for session {}",
                    stale, process.session_id
                );
            }
        }

        let payload = process.config.format_message(text);
        let mut outbound = Outbound::new(&payload);
        outbound.extend(text);
        let turn_id = process.turn_tx.borrow().id + 1;
        process.turn_tx.send_replace(TurnInfo {
            id: turn_id,
            outbound: Arc::new(outbound),
        });

        let Some(stdin) = self.io.stdin.as_mut() else {
            return Err(process.closed_error());
        };
        let line = format!("{payload}\n");
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!(
                "Failed to write to worker for session {}: {:?}",
                process.session_id, e
            );
            self.io.stdin = None;
            process.control.lock().await.mark_dead();
            return Err(WorkerError::Io(e));
        }

        let preview: String = text.chars().take(50).collect();
        debug!("Sent turn {} to session {}: {}", turn_id, process.session_id, preview);
        process.touch();
        Ok(())
    }

    /// Stream the answer to the message just sent.
    ///
    /// Ends once the worker has printed nothing and no chunk has arrived for
    /// the escalating response idle threshold, or at the turn's hard ceiling.
    /// Yields a single error when nothing at all was produced.
    pub fn read_response(self) -> ChunkStream {
        let turn_id = self.process.turn_tx.borrow().id;
        let timeouts = self.process.config.timeouts.clone();
        let reader = ResponseReader {
            turn: self,
            turn_id,
            timeouts,
            started: Instant::now(),
            delivered: 0,
            last_delivery_ms: 0,
            done: false,
        };
        stream::unfold(reader, |mut reader| async move {
            let item = reader.next_chunk().await?;
            Some((item, reader))
        })
        .boxed()
    }
}

struct ResponseReader {
    turn: ProcessTurn,
    turn_id: u64,
    timeouts: IdleTimeouts,
    started: Instant,
    delivered: usize,
    last_delivery_ms: i64,
    done: bool,
}

impl ResponseReader {
    async fn next_chunk(&mut self) -> Option<WorkerResult<String>> {
        if self.done {
            return None;
        }
        let max_wait = self.timeouts.max_wait();
        loop {
            let remaining = max_wait.saturating_sub(self.started.elapsed());
            if remaining.is_zero() {
                return self.finish(WorkerError::Timeout(max_wait));
            }
            let wait = if self.delivered == 0 {
                remaining
            } else {
                let idle = self.timeouts.response_idle(self.delivered);
                let left = idle.saturating_sub(self.quiet_for());
                if left.is_zero() {
                    return self.settle();
                }
                remaining.min(left)
            };

            let Some(chunks) = self.turn.io.chunks.as_mut() else {
                let err = self.turn.process.closed_error();
                return self.finish(err);
            };

            match timeout(wait, chunks.recv()).await {
                Ok(Some(chunk)) => {
                    if let Some(text) = self.accept(chunk) {
                        return Some(Ok(text));
                    }
                }
                Ok(None) => {
                    let err = self.turn.process.closed_error();
                    return self.finish(err);
                }
                // Re-check: the worker may still be printing a chunk.
                Err(_) => {}
            }
        }
    }

    /// Time since the worker last printed anything or a chunk was delivered.
    fn quiet_for(&self) -> Duration {
        let last = self
            .turn
            .process
            .last_output_ms
            .load(Ordering::Acquire)
            .max(self.last_delivery_ms);
        let quiet = Utc::now().timestamp_millis().saturating_sub(last);
        Duration::from_millis(u64::try_from(quiet).unwrap_or_default())
    }

    /// Deliver a chunk of the current turn; chunks of earlier turns are dropped.
    fn accept(&mut self, chunk: Chunk) -> Option<String> {
        if chunk.turn != self.turn_id {
            debug!(
                "Dropping chunk from turn {} while reading turn {}",
                chunk.turn, self.turn_id
            );
            return None;
        }
        self.delivered += 1;
        self.last_delivery_ms = Utc::now().timestamp_millis();
        self.turn.process.touch();
        Some(chunk.text)
    }

    /// The response went quiet; take a chunk flushed at the same moment, if
    /// any, otherwise end the stream.
    fn settle(&mut self) -> Option<WorkerResult<String>> {
        loop {
            let next = match self.turn.io.chunks.as_mut() {
                Some(chunks) => chunks.try_recv().ok(),
                None => None,
            };
            let Some(chunk) = next else {
                break;
            };
            if let Some(text) = self.accept(chunk) {
                return Some(Ok(text));
            }
        }
        self.done = true;
        None
    }

    /// End the stream, surfacing `err` only when nothing was delivered.
    fn finish(&mut self, err: WorkerError) -> Option<WorkerResult<String>> {
        self.done = true;
        if self.delivered == 0 {
            warn!(
                "Turn {} for session {} failed: {}",
                self.turn_id, self.turn.process.session_id, err
            );
            Some(Err(err))
        } else {
            None
        }
    }
}

// ============================================================================
// Background reader
// ============================================================================

/// Lines accumulated since the last flush.
struct Segment {
    turn: u64,
    flushed: usize,
    lines: Vec<String>,
}

impl Segment {
    fn new(turn: u64) -> Self {
        Self {
            turn,
            flushed: 0,
            lines: Vec::new(),
        }
    }

    fn start_turn(&mut self, turn: u64) {
        self.turn = turn;
        self.flushed = 0;
    }

    /// Send buffered lines as one chunk. False once the receiver is gone.
    async fn flush(&mut self, tx: &mpsc::Sender<Chunk>) -> bool {
        if self.lines.is_empty() {
            return true;
        }
        let chunk = Chunk {
            turn: self.turn,
            text: self.lines.join("\n"),
        };
        self.lines.clear();
        self.flushed += 1;
        tx.send(chunk).await.is_ok()
    }
}

async fn stdout_reader_task(
    session_id: String,
    stdout: ChildStdout,
    chunk_tx: mpsc::Sender<Chunk>,
    turn_rx: watch::Receiver<TurnInfo>,
    sanitizer: Arc<OutputSanitizer>,
    timeouts: IdleTimeouts,
    last_output_ms: Arc<AtomicI64>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut segment = Segment::new(turn_rx.borrow().id);

    info!("Worker stdout reader for session {} started", session_id);

    loop {
        let next = if segment.lines.is_empty() {
            Ok(lines.next_line().await)
        } else {
            timeout(timeouts.chunk_idle(segment.flushed), lines.next_line()).await
        };

        let line = match next {
            Err(_) => {
                if !segment.flush(&chunk_tx).await {
                    break;
                }
                continue;
            }
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                warn!("Failed to read worker output for session {}: {:?}", session_id, e);
                break;
            }
        };
        last_output_ms.store(Utc::now().timestamp_millis(), Ordering::Release);

        let current = turn_rx.borrow().clone();
        if current.id != segment.turn {
            if !segment.flush(&chunk_tx).await {
                break;
            }
            segment.start_turn(current.id);
        }

        match sanitizer.classify(&line, &current.outbound) {
            LineClass::Content(text) => segment.lines.push(text),
            LineClass::Echo => {
                if !segment.flush(&chunk_tx).await {
                    break;
                }
            }
            LineClass::Skip => {}
        }
    }

    let _ = segment.flush(&chunk_tx).await;
    info!("Worker stdout reader for session {} ended", session_id);
}

/// Log a worker's stderr until it closes, so the pipe never fills up.
pub(crate) async fn drain_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            warn!("Worker stderr ({}): {}", label, line);
        }
    }
}

// ============================================================================
// Process helpers
// ============================================================================

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: pid belongs to a child we have not reaped yet.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

pub(crate) fn format_exit_status(exit_code: Option<i32>, signal: Option<i32>) -> String {
    match (exit_code, signal) {
        (Some(code), _) => format!("exited with code {}", code),
        (None, Some(sig)) => {
            let name = match sig {
                9 => "SIGKILL",
                15 => "SIGTERM",
                11 => "SIGSEGV",
                6 => "SIGABRT",
                _ => return format!("killed by signal {}", sig),
            };
            format!("killed by {} (signal {})", name, sig)
        }
        (None, None) => "exited (unknown status)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_exit_status() {
        assert_eq!(format_exit_status(Some(0), None), "exited with code 0");
        assert_eq!(
            format_exit_status(None, Some(15)),
            "killed by SIGTERM (signal 15)"
        );
        assert_eq!(format_exit_status(None, Some(64)), "killed by signal 64");
    }

    #[test]
    fn test_worker_state_display() {
        assert_eq!(WorkerState::NotStarted.to_string(), "not_started");
        assert_eq!(
            serde_json::to_string(&WorkerState::Restarting).unwrap(),
            "\"restarting\""
        );
    }

    #[tokio::test]
    async fn test_spawn_failure_stays_not_started() {
        let config = WorkerConfig {
            program: "/nonexistent/qbridge-worker".to_string(),
            ..WorkerConfig::default()
        };
        let process = SessionProcess::new(
            "s1",
            None,
            Arc::new(config),
            Arc::new(OutputSanitizer::default()),
        );
        let err = process.start().await.unwrap_err();
        assert!(matches!(err, WorkerError::Spawn { .. }));
        assert_eq!(process.state().await, WorkerState::NotStarted);
        assert!(!process.is_alive().await);
        assert!(process.pid().is_none());
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent_on_unstarted_process() {
        let process = SessionProcess::new(
            "s2",
            None,
            Arc::new(WorkerConfig::default()),
            Arc::new(OutputSanitizer::default()),
        );
        process.terminate().await;
        process.terminate().await;
        assert_eq!(process.state().await, WorkerState::Terminated);
        assert!(matches!(
            process.start().await,
            Err(WorkerError::Terminated)
        ));
    }
}
