//! Map of live session processes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::sync::Mutex;

use super::config::WorkerConfig;
use super::error::WorkerResult;
use super::process::SessionProcess;
use crate::sanitize::OutputSanitizer;

/// At most one [`SessionProcess`] per session id.
///
/// Creation happens under the map lock, so concurrent callers for the same id
/// always receive the same instance. Termination happens outside it.
#[derive(Debug)]
pub struct SessionRegistry {
    processes: Mutex<HashMap<String, Arc<SessionProcess>>>,
    config: Arc<WorkerConfig>,
    sanitizer: Arc<OutputSanitizer>,
}

impl SessionRegistry {
    pub fn new(config: Arc<WorkerConfig>, sanitizer: Arc<OutputSanitizer>) -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            config,
            sanitizer,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Return the session's process, creating and starting it if absent.
    ///
    /// A start failure is returned and nothing is registered.
    pub async fn get_or_create(
        &self,
        session_id: &str,
        work_dir: Option<&Path>,
    ) -> WorkerResult<Arc<SessionProcess>> {
        let mut processes = self.processes.lock().await;
        if let Some(process) = processes.get(session_id) {
            return Ok(Arc::clone(process));
        }

        let process = Arc::new(SessionProcess::new(
            session_id,
            work_dir.map(Path::to_path_buf),
            Arc::clone(&self.config),
            Arc::clone(&self.sanitizer),
        ));
        process.start().await?;
        processes.insert(session_id.to_string(), Arc::clone(&process));
        debug!("Registered worker for session {}", session_id);
        Ok(process)
    }

    /// Terminate and forget the session's process. Returns whether one existed.
    pub async fn remove(&self, session_id: &str) -> bool {
        let removed = self.processes.lock().await.remove(session_id);
        match removed {
            Some(process) => {
                process.terminate().await;
                true
            }
            None => false,
        }
    }

    /// Terminate processes idle for longer than `max_idle`. Busy processes are
    /// left alone.
    pub async fn sweep_expired(&self, max_idle: Duration) -> usize {
        let expired: Vec<Arc<SessionProcess>> = {
            let mut processes = self.processes.lock().await;
            let ids: Vec<String> = processes
                .iter()
                .filter(|(_, p)| !p.is_busy() && p.idle_for() > max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| processes.remove(id)).collect()
        };

        for process in &expired {
            info!(
                "Reaping idle worker for session {} (idle {:?})",
                process.session_id(),
                process.idle_for()
            );
            process.terminate().await;
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.processes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.processes.lock().await.is_empty()
    }

    /// Terminate every process, e.g. on server shutdown.
    pub async fn shutdown_all(&self) {
        let all: Vec<Arc<SessionProcess>> = {
            let mut processes = self.processes.lock().await;
            processes.drain().map(|(_, p)| p).collect()
        };
        if !all.is_empty() {
            info!("Terminating {} worker processes", all.len());
        }
        futures::future::join_all(all.iter().map(|p| p.terminate())).await;
    }
}
