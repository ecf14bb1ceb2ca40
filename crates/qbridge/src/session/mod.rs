//! Sessions: identity, conversation record and working directory.

mod files;
mod store;

pub use files::list_files;
pub use store::{Session, SessionStore};

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Session lifetime and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Turns kept per conversation record.
    pub max_history: usize,
    /// Idle time after which the reaper deletes a session.
    pub expiry_secs: u64,
    /// How often the reaper runs.
    pub reaper_interval_secs: u64,
    /// Parent of the per-session working directories.
    pub sessions_dir: PathBuf,
    /// Give each session its own working directory.
    pub create_work_dirs: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history: 10,
            expiry_secs: 3600,
            reaper_interval_secs: 300,
            sessions_dir: PathBuf::from("sessions"),
            create_work_dirs: true,
        }
    }
}

impl SessionConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_history == 0 {
            bail!("sessions.max_history must be at least 1");
        }
        if self.expiry_secs < 60 {
            bail!("sessions.expiry_secs must be at least 60");
        }
        Ok(())
    }
}
