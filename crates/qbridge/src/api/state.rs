//! Shared handler state.

use std::sync::Arc;

use crate::chat::ChatService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    /// Origins allowed by CORS; empty allows any origin.
    pub allowed_origins: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(chat: ChatService) -> Self {
        Self {
            chat,
            allowed_origins: Arc::new(Vec::new()),
        }
    }

    pub fn with_origins(chat: ChatService, allowed_origins: Vec<String>) -> Self {
        Self {
            chat,
            allowed_origins: Arc::new(allowed_origins),
        }
    }
}
