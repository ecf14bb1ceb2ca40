//! Worker processes: launch settings, per-session processes and their registry.

pub mod config;
pub mod error;
pub mod process;
pub mod registry;

pub use config::{IdleTimeouts, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use process::{ChunkStream, ProcessTurn, SessionProcess, WorkerState};
pub use registry::SessionRegistry;
