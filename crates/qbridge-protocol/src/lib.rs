//! Wire types for the qbridge chat API.
//!
//! ```text
//! Client <--[JSON / SSE]--> qbridge <--[stdin/stdout]--> worker CLI (`q chat`)
//! ```
//!
//! Everything a client sends or receives is defined here so the server and any
//! Rust client agree on field names without sharing the server crate.
//!
//! ## Conventions
//!
//! 1. **Timestamps are RFC 3339 UTC.** `chrono::DateTime<Utc>` serializes that way.
//! 2. **Session ids are UUID strings.** They are opaque to clients.
//! 3. **Stream events are tagged by `type`.** One JSON object per SSE `data:` line.

pub mod api;
pub mod events;

pub use api::{
    ChatReply, ChatRequest, CreateSessionReply, DeleteSessionReply, ErrorBody, FileEntry,
    FileListing, HealthReply, SessionInfo,
};
pub use events::StreamEvent;
