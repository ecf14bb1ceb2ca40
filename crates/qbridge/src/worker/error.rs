//! Errors raised while driving a worker process.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    /// The executable could not be launched at all.
    #[error("failed to spawn worker `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Nothing arrived before the turn's hard ceiling.
    #[error("worker produced no output within {0:?}")]
    Timeout(Duration),

    /// The worker exited before producing any output for the turn.
    #[error("worker exited without producing output")]
    NoOutput,

    #[error("worker has been terminated")]
    Terminated,
}

pub type WorkerResult<T> = Result<T, WorkerError>;
