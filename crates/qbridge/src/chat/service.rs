//! Chat orchestration: sessions, transcripts and the worker transport.
//!
//! ## Sections
//!
//! - Configuration
//! - Service construction
//! - Session operations
//! - Chat turns (collected and streamed)
//! - Maintenance (reaper, health, shutdown)

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use log::{debug, info, warn};
use qbridge_protocol::{
    ChatReply, ChatRequest, CreateSessionReply, DeleteSessionReply, FileListing, HealthReply,
    SessionInfo, StreamEvent,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use super::error::{ChatError, ChatResult};
use super::transport::{
    ChatMode, ChatTransport, OneShotTransport, PersistentTransport, TurnRequest, probe_worker,
};
use crate::conversation::{Role, Turn};
use crate::dedup::DuplicateRemover;
use crate::sanitize::OutputSanitizer;
use crate::session::{SessionStore, list_files};
use crate::validate::{DEFAULT_MAX_MESSAGE_CHARS, validate_message, validate_session_id};
use crate::worker::{SessionRegistry, WorkerConfig};

/// Events of one streamed turn.
pub type EventStream = BoxStream<'static, StreamEvent>;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChatConfig {
    pub mode: ChatMode,
    /// Longest accepted message, in characters.
    pub max_message_chars: usize,
    /// Capacity of the per-request event channel for streamed turns.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            mode: ChatMode::default(),
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            event_buffer: 32,
        }
    }
}

// ============================================================================
// Service construction
// ============================================================================

/// Front door for every chat and session operation.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ChatService {
    sessions: Arc<SessionStore>,
    transport: Arc<dyn ChatTransport>,
    remover: Arc<DuplicateRemover>,
    worker: Arc<WorkerConfig>,
    config: ChatConfig,
}

impl ChatService {
    /// Build the service with the transport selected by `config.mode`.
    pub fn new(
        config: ChatConfig,
        sessions: SessionStore,
        worker: WorkerConfig,
        sanitizer: OutputSanitizer,
        remover: DuplicateRemover,
    ) -> Self {
        let worker = Arc::new(worker);
        let sanitizer = Arc::new(sanitizer);
        let remover = Arc::new(remover);

        let transport: Arc<dyn ChatTransport> = match config.mode {
            ChatMode::Persistent => {
                let registry = Arc::new(SessionRegistry::new(
                    Arc::clone(&worker),
                    Arc::clone(&sanitizer),
                ));
                Arc::new(PersistentTransport::new(registry, Arc::clone(&remover)))
            }
            ChatMode::Oneshot => Arc::new(OneShotTransport::new(
                Arc::clone(&worker),
                sanitizer,
                Arc::clone(&remover),
            )),
        };
        info!("Chat service running in {} mode", config.mode);

        Self::with_transport(config, Arc::new(sessions), worker, transport, remover)
    }

    /// Build the service around an existing transport.
    pub fn with_transport(
        config: ChatConfig,
        sessions: Arc<SessionStore>,
        worker: Arc<WorkerConfig>,
        transport: Arc<dyn ChatTransport>,
        remover: Arc<DuplicateRemover>,
    ) -> Self {
        Self {
            sessions,
            transport,
            remover,
            worker,
            config,
        }
    }

    pub fn mode(&self) -> ChatMode {
        self.transport.mode()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    // ========================================================================
    // Session operations
    // ========================================================================

    pub async fn create_session(&self) -> ChatResult<CreateSessionReply> {
        let info = self
            .sessions
            .create()
            .await
            .map_err(|e| ChatError::internal(format!("failed to create session: {e}")))?;
        Ok(CreateSessionReply {
            session_id: info.session_id,
            created_at: info.created_at,
        })
    }

    pub fn get_session(&self, session_id: &str) -> ChatResult<SessionInfo> {
        let id = validate_session_id(session_id)?;
        self.sessions
            .get(&id)
            .ok_or(ChatError::SessionNotFound(id))
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.list()
    }

    /// Forget the session, delete its working directory and stop its worker.
    ///
    /// Waits for a turn in flight, so its worker is released after the turn
    /// rather than started again behind the release.
    pub async fn delete_session(&self, session_id: &str) -> ChatResult<DeleteSessionReply> {
        let id = validate_session_id(session_id)?;
        if !self.retire(&id).await {
            return Err(ChatError::SessionNotFound(id));
        }
        Ok(DeleteSessionReply {
            message: format!("Session {id} deleted"),
        })
    }

    /// Remove a session and release its worker under the session's turn lock.
    async fn retire(&self, session_id: &str) -> bool {
        let Some(_turn) = self.sessions.lock_turns(session_id).await else {
            return false;
        };
        if self.sessions.remove(session_id).await.is_none() {
            return false;
        }
        self.transport.release(session_id).await;
        true
    }

    /// Take the session's turn lock. Fails if the session was deleted while
    /// waiting for it.
    async fn acquire_turn(&self, session_id: &str) -> ChatResult<OwnedMutexGuard<()>> {
        let turn = self.sessions.lock_turns(session_id).await;
        match turn {
            Some(turn) if self.sessions.contains(session_id) => Ok(turn),
            _ => Err(ChatError::SessionNotFound(session_id.to_string())),
        }
    }

    /// Files in the session's working directory.
    pub async fn list_session_files(&self, session_id: &str) -> ChatResult<FileListing> {
        let id = validate_session_id(session_id)?;
        if !self.sessions.contains(&id) {
            return Err(ChatError::SessionNotFound(id));
        }
        let files = match self.sessions.work_dir(&id) {
            Some(dir) => tokio::task::spawn_blocking(move || list_files(&dir))
                .await
                .map_err(|e| ChatError::internal(format!("file listing task failed: {e}")))?
                .map_err(|e| ChatError::internal(format!("failed to list files: {e}")))?,
            None => Vec::new(),
        };
        Ok(FileListing {
            session_id: id,
            file_count: files.len(),
            files,
        })
    }

    /// Resolve the session a turn runs in; a missing id creates a new session.
    async fn resolve_session(&self, session_id: Option<&str>) -> ChatResult<String> {
        match session_id {
            Some(raw) => {
                let id = validate_session_id(raw)?;
                if self.sessions.contains(&id) {
                    Ok(id)
                } else {
                    Err(ChatError::SessionNotFound(id))
                }
            }
            None => Ok(self.create_session().await?.session_id),
        }
    }

    // ========================================================================
    // Chat turns
    // ========================================================================

    /// Run one turn and return the whole answer.
    pub async fn chat(&self, request: ChatRequest) -> ChatResult<ChatReply> {
        let message = validate_message(&request.message, self.config.max_message_chars)?;
        let session_id = self.resolve_session(request.session_id.as_deref()).await?;

        let _turn = self.acquire_turn(&session_id).await?;
        let context = self.begin_turn(&session_id, &message);
        let work_dir = self.sessions.work_dir(&session_id);

        let answer = self
            .transport
            .send_and_collect(TurnRequest {
                session_id: &session_id,
                message: &message,
                context: context.as_deref(),
                work_dir: work_dir.as_deref(),
            })
            .await
            .inspect_err(|e| warn!("Turn on session {} failed: {}", session_id, e))?;

        self.sessions
            .append(&session_id, Turn::new(Role::Assistant, answer.clone()));
        Ok(ChatReply {
            session_id,
            message: answer,
            timestamp: Utc::now(),
        })
    }

    /// Run one turn and stream its events.
    ///
    /// Request errors (validation, unknown session) are returned directly.
    /// Once the stream exists it always starts with a `session` event and ends
    /// with exactly one `done` or `error` event. Dropping the stream abandons
    /// the turn without touching the worker.
    pub async fn stream_chat(&self, request: ChatRequest) -> ChatResult<(String, EventStream)> {
        let message = validate_message(&request.message, self.config.max_message_chars)?;
        let session_id = self.resolve_session(request.session_id.as_deref()).await?;

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let service = self.clone();
        let id = session_id.clone();
        tokio::spawn(async move {
            service.run_streamed_turn(id, message, tx).await;
        });

        Ok((session_id, ReceiverStream::new(rx).boxed()))
    }

    async fn run_streamed_turn(
        &self,
        session_id: String,
        message: String,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        if tx
            .send(StreamEvent::Session {
                session_id: session_id.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        let _turn = match self.acquire_turn(&session_id).await {
            Ok(turn) => turn,
            Err(e) => {
                let _ = tx.send(e.to_event()).await;
                return;
            }
        };
        let context = self.begin_turn(&session_id, &message);
        let work_dir = self.sessions.work_dir(&session_id);

        let started = self
            .transport
            .send_and_stream(TurnRequest {
                session_id: &session_id,
                message: &message,
                context: context.as_deref(),
                work_dir: work_dir.as_deref(),
            })
            .await;
        let mut chunks = match started {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Streamed turn on session {} failed: {}", session_id, e);
                let _ = tx.send(e.to_event()).await;
                return;
            }
        };

        let mut delivered: Vec<String> = Vec::new();
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => {
                    if tx.send(StreamEvent::chunk(chunk.clone())).await.is_err() {
                        debug!("Client left streamed turn on session {}", session_id);
                        return;
                    }
                    delivered.push(chunk);
                }
                Err(e) => {
                    warn!("Streamed turn on session {} failed: {}", session_id, e);
                    self.record_answer(&session_id, &delivered);
                    let _ = tx.send(e.to_event()).await;
                    return;
                }
            }
        }

        if delivered.is_empty() {
            let _ = tx.send(ChatError::NoOutput.to_event()).await;
            return;
        }
        self.record_answer(&session_id, &delivered);
        let _ = tx.send(StreamEvent::Done).await;
    }

    /// Render the transcript for the transport, then record the user turn.
    fn begin_turn(&self, session_id: &str, message: &str) -> Option<String> {
        let context = if self.transport.uses_transcript() {
            self.sessions.render_context(session_id)
        } else {
            None
        };
        self.sessions
            .append(session_id, Turn::new(Role::User, message));
        context
    }

    fn record_answer(&self, session_id: &str, chunks: &[String]) {
        if chunks.is_empty() {
            return;
        }
        let answer = self.remover.remove(&chunks.join("\n"));
        self.sessions
            .append(session_id, Turn::new(Role::Assistant, answer));
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete sessions idle past the expiry, then reclaim orphaned workers.
    /// Returns the number of sessions deleted.
    pub async fn sweep_expired(&self) -> usize {
        let expiry = self.sessions.config().expiry();
        let expired = self.sessions.expired(expiry);
        let mut removed = 0;
        for id in expired {
            if self.retire(&id).await {
                removed += 1;
            }
        }
        let reclaimed = self.transport.sweep_idle(expiry).await;
        if removed > 0 || reclaimed > 0 {
            info!(
                "Reaper removed {} expired sessions and {} idle workers",
                removed, reclaimed
            );
        }
        removed
    }

    pub async fn active_processes(&self) -> usize {
        self.transport.active_processes().await
    }

    pub async fn worker_available(&self) -> bool {
        probe_worker(&self.worker).await
    }

    pub async fn health(&self) -> HealthReply {
        let worker_available = self.worker_available().await;
        HealthReply {
            status: if worker_available { "healthy" } else { "degraded" }.to_string(),
            worker_available,
            active_sessions: self.sessions.len(),
            active_processes: self.active_processes().await,
            mode: self.mode().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Stop every worker. Sessions stay in memory until the process exits.
    pub async fn shutdown(&self) {
        self.transport.shutdown().await;
    }

    /// Idle time after which the reaper deletes sessions.
    pub fn session_expiry(&self) -> Duration {
        self.sessions.config().expiry()
    }
}
