//! Request handlers.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, Uri},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::StreamExt;
use qbridge_protocol::{
    ChatReply, ChatRequest, CreateSessionReply, DeleteSessionReply, FileListing, HealthReply,
    SessionInfo,
};
use serde::Serialize;
use tracing::{info, instrument};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Service index.
#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub mode: String,
    pub endpoints: Vec<&'static str>,
}

pub async fn index(State(state): State<AppState>) -> Json<IndexResponse> {
    Json(IndexResponse {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mode: state.chat.mode().to_string(),
        endpoints: vec![
            "GET /health",
            "POST /api/v1/sessions",
            "GET /api/v1/sessions",
            "GET /api/v1/sessions/{session_id}",
            "DELETE /api/v1/sessions/{session_id}",
            "GET /api/v1/sessions/{session_id}/files",
            "POST /api/v1/chat",
            "POST /api/v1/chat/stream",
        ],
    })
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthReply> {
    Json(state.chat.health().await)
}

pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(uri.path().to_string())
}

// ============================================================================
// Sessions
// ============================================================================

#[instrument(skip(state))]
pub async fn create_session(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<CreateSessionReply>)> {
    let reply = state.chat.create_session().await?;
    info!(session_id = %reply.session_id, "Session created");
    Ok((StatusCode::CREATED, Json(reply)))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.chat.list_sessions())
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionInfo>> {
    Ok(Json(state.chat.get_session(&session_id)?))
}

#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<DeleteSessionReply>> {
    let reply = state.chat.delete_session(&session_id).await?;
    info!(session_id = %session_id, "Session deleted");
    Ok(Json(reply))
}

#[instrument(skip(state))]
pub async fn list_session_files(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<FileListing>> {
    Ok(Json(state.chat.list_session_files(&session_id).await?))
}

// ============================================================================
// Chat
// ============================================================================

#[instrument(skip(state, payload))]
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatReply>> {
    let Json(request) = payload?;
    let reply = state.chat.chat(request).await?;
    info!(
        session_id = %reply.session_id,
        reply_chars = reply.message.chars().count(),
        "Chat turn completed"
    );
    Ok(Json(reply))
}

/// Stream a turn as server-sent events.
///
/// Each event's data is one JSON `StreamEvent`. Request errors are answered
/// with a regular JSON error before the stream starts.
#[instrument(skip(state, payload))]
pub async fn chat_stream(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    let (session_id, events) = state.chat.stream_chat(request).await?;
    info!(session_id = %session_id, "Streaming chat turn");

    let stream = events.map(|event| Event::default().json_data(event));
    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}
