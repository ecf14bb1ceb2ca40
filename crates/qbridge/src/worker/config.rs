//! Worker launch settings and end-of-turn timing.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Idle thresholds used to infer that the worker has finished answering.
///
/// The worker has no end-of-response marker, so a turn is considered complete
/// once output stops for long enough. Each list escalates: entry `n` applies
/// once `n` chunks have been produced, and the last entry repeats.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IdleTimeouts {
    /// Quiet period (ms) after which buffered lines are flushed as a chunk.
    pub chunk_idle_ms: Vec<u64>,
    /// Quiet period (ms) without output or a new chunk after which a response
    /// ends. Never shorter than the matching chunk step.
    pub response_idle_ms: Vec<u64>,
    /// Hard ceiling for one turn.
    pub max_wait_secs: u64,
}

impl Default for IdleTimeouts {
    fn default() -> Self {
        Self {
            chunk_idle_ms: vec![1_500, 3_000, 5_000],
            response_idle_ms: vec![4_000, 8_000, 15_000],
            max_wait_secs: 300,
        }
    }
}

fn step(steps: &[u64], index: usize) -> Duration {
    let ms = steps
        .get(index)
        .or_else(|| steps.last())
        .copied()
        .unwrap_or(1_000);
    Duration::from_millis(ms)
}

impl IdleTimeouts {
    /// Flush threshold given the chunks already flushed this turn.
    pub fn chunk_idle(&self, flushed: usize) -> Duration {
        step(&self.chunk_idle_ms, flushed)
    }

    /// End-of-response threshold given the chunks already delivered (at least one).
    pub fn response_idle(&self, delivered: usize) -> Duration {
        step(&self.response_idle_ms, delivered.saturating_sub(1))
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_idle_ms.is_empty() || self.response_idle_ms.is_empty() {
            bail!("worker.timeouts idle step lists must not be empty");
        }
        if self.chunk_idle_ms.contains(&0) || self.response_idle_ms.contains(&0) {
            bail!("worker.timeouts idle steps must be greater than zero");
        }
        // Lines still buffered must flush before the response counts as over.
        let steps = self.chunk_idle_ms.len().max(self.response_idle_ms.len());
        for n in 0..steps {
            let flush = step(&self.chunk_idle_ms, n).max(step(&self.chunk_idle_ms, n + 1));
            if step(&self.response_idle_ms, n) < flush {
                bail!(
                    "worker.timeouts.response_idle_ms[{n}] must not be shorter than \
                     chunk_idle_ms[{n}] or chunk_idle_ms[{}]",
                    n + 1
                );
            }
        }
        if self.max_wait_secs < 5 {
            bail!("worker.timeouts.max_wait_secs must be at least 5");
        }
        Ok(())
    }
}

/// How to launch and talk to the worker CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker executable.
    pub program: String,
    /// Arguments for a long-lived interactive worker.
    pub args: Vec<String>,
    /// Arguments for a per-turn worker.
    pub oneshot_args: Vec<String>,
    /// Environment defaults, applied only when the server's own environment
    /// does not already define the variable.
    pub env: HashMap<String, String>,
    /// Text prepended to every message, e.g. to pin the answer language.
    pub language_directive: Option<String>,
    /// Command that asks the worker to exit.
    pub quit_command: String,
    /// Capacity of the per-process chunk channel.
    pub chunk_buffer: usize,
    /// Wait after the quit command before sending SIGTERM.
    pub shutdown_grace_secs: u64,
    /// Wait after SIGTERM before killing.
    pub kill_grace_secs: u64,
    /// Lines per streamed chunk for per-turn workers.
    pub oneshot_lines_per_chunk: usize,
    pub timeouts: IdleTimeouts,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "q".to_string(),
            args: vec!["chat".to_string(), "--trust-all-tools".to_string()],
            oneshot_args: vec!["chat".to_string()],
            env: HashMap::from([("AWS_DEFAULT_REGION".to_string(), "us-east-1".to_string())]),
            language_directive: None,
            quit_command: "/quit".to_string(),
            chunk_buffer: 64,
            shutdown_grace_secs: 5,
            kill_grace_secs: 2,
            oneshot_lines_per_chunk: 3,
            timeouts: IdleTimeouts::default(),
        }
    }
}

impl WorkerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    /// The line actually written to the worker for `text`.
    pub fn format_message(&self, text: &str) -> String {
        match self.language_directive.as_deref() {
            Some(directive) if !directive.is_empty() => format!("{directive}{text}"),
            _ => text.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            bail!("worker.program must not be empty");
        }
        if self.chunk_buffer == 0 {
            bail!("worker.chunk_buffer must be at least 1");
        }
        if self.oneshot_lines_per_chunk == 0 {
            bail!("worker.oneshot_lines_per_chunk must be at least 1");
        }
        self.timeouts.validate()
    }
}
