//! qbridge library
//!
//! Serves a terminal AI chat CLI over HTTP: one worker process (or one
//! per-turn subprocess) per conversation, with the worker's terminal output
//! cleaned into plain answer text.

pub mod api;
pub mod chat;
pub mod conversation;
pub mod dedup;
pub mod sanitize;
pub mod session;
pub mod validate;
pub mod worker;
