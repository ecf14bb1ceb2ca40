//! HTTP API module.
//!
//! JSON endpoints for sessions and chat turns, plus a server-sent event stream
//! for incremental answers.

mod error;
pub mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
