//! Chat turns from request to cleaned answer.

mod error;
mod service;
mod transport;

pub use error::{ChatError, ChatResult};
pub use service::{ChatConfig, ChatService, EventStream};
pub use transport::{
    ChatMode, ChatTransport, OneShotTransport, PersistentTransport, TextStream, TurnRequest,
    probe_worker,
};
