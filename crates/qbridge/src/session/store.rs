use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{info, warn};
use qbridge_protocol::SessionInfo;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::SessionConfig;
use crate::conversation::{ConversationRecord, Turn};

/// One conversation.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub record: ConversationRecord,
    pub work_dir: Option<PathBuf>,
    /// Serializes turns on this session.
    turn_lock: Arc<Mutex<()>>,
}

impl Session {
    fn new(id: String, max_history: usize, work_dir: Option<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity: now,
            record: ConversationRecord::new(max_history),
            work_dir,
            turn_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            message_count: self.record.len(),
            work_directory: self
                .work_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }
    }

    fn idle_for(&self) -> Duration {
        (Utc::now() - self.last_activity)
            .to_std()
            .unwrap_or_default()
    }
}

/// In-memory session table.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    config: SessionConfig,
}

impl SessionStore {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session with a fresh UUID and, when enabled, its working directory.
    pub async fn create(&self) -> std::io::Result<SessionInfo> {
        let id = Uuid::new_v4().to_string();
        let work_dir = if self.config.create_work_dirs {
            let dir = self.config.sessions_dir.join(&id);
            tokio::fs::create_dir_all(&dir).await?;
            Some(std::path::absolute(&dir).unwrap_or(dir))
        } else {
            None
        };

        let session = Session::new(id.clone(), self.config.max_history, work_dir);
        let info = session.info();
        self.sessions.insert(id.clone(), session);
        info!("Created session {}", id);
        Ok(info)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.get(id).map(|s| s.info())
    }

    /// All sessions, most recently active first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.iter().map(|s| s.info()).collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn work_dir(&self, id: &str) -> Option<PathBuf> {
        self.sessions.get(id).and_then(|s| s.work_dir.clone())
    }

    /// Take the session's turn lock; `None` if the session does not exist.
    pub async fn lock_turns(&self, id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = self.sessions.get(id).map(|s| Arc::clone(&s.turn_lock))?;
        Some(lock.lock_owned().await)
    }

    /// Append a turn and bump activity. False if the session is gone.
    pub fn append(&self, id: &str, turn: Turn) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.record.push(turn);
                session.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Transcript of the most recent turns, `None` if the session is gone.
    pub fn render_context(&self, id: &str) -> Option<String> {
        self.sessions
            .get(id)
            .map(|s| s.record.render_context(self.config.max_history))
    }

    /// Forget a session and delete its working directory.
    pub async fn remove(&self, id: &str) -> Option<Session> {
        let (_, session) = self.sessions.remove(id)?;
        if let Some(dir) = &session.work_dir {
            remove_work_dir(dir).await;
        }
        info!("Removed session {}", id);
        Some(session)
    }

    /// Ids of sessions idle for longer than `max_idle`.
    pub fn expired(&self, max_idle: Duration) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|s| s.idle_for() > max_idle)
            .map(|s| s.id.clone())
            .collect()
    }
}

async fn remove_work_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove session directory {:?}: {}", dir, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> SessionStore {
        SessionStore::new(SessionConfig {
            max_history: 3,
            sessions_dir: tmp.path().to_path_buf(),
            ..SessionConfig::default()
        })
    }

    #[tokio::test]
    async fn test_create_and_remove_session() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let info = store.create().await.unwrap();
        assert!(Uuid::parse_str(&info.session_id).is_ok());
        let dir = PathBuf::from(info.work_directory.clone().unwrap());
        assert!(dir.is_dir());
        assert_eq!(store.get(&info.session_id), Some(info.clone()));

        assert!(store.remove(&info.session_id).await.is_some());
        assert!(store.get(&info.session_id).is_none());
        assert!(!dir.exists());
        assert!(store.remove(&info.session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_append_respects_history_bound() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let id = store.create().await.unwrap().session_id;

        for i in 0..5 {
            assert!(store.append(&id, Turn::new(Role::User, format!("q{i}"))));
        }
        assert_eq!(store.get(&id).unwrap().message_count, 3);
        assert_eq!(
            store.render_context(&id).unwrap(),
            "User: q2\nUser: q3\nUser: q4"
        );
        assert!(!store.append("missing", Turn::new(Role::User, "x")));
    }

    #[tokio::test]
    async fn test_expired_sessions() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let id = store.create().await.unwrap().session_id;

        assert!(store.expired(Duration::from_secs(60)).is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.expired(Duration::from_millis(5)), vec![id]);
    }

    #[tokio::test]
    async fn test_lock_turns_for_missing_session() {
        let tmp = TempDir::new().unwrap();
        assert!(store(&tmp).lock_turns("missing").await.is_none());
    }
}
