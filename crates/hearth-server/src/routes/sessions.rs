//! Session store endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use hearth_core::proto::{HistoryFile, Message, Session};

use crate::error::AppError;
use crate::types::CreateSessionRequest;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route("/{sid}", get(get_session))
        .route("/{sid}/messages", get(session_messages))
        .route("/{sid}/history", get(session_history))
}

/// Most recently updated first
async fn list_sessions(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Session>>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.sessions.list().await?))
}

async fn create_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Session>), AppError> {
    let instance = state.registry.require(&id)?;
    let session = instance
        .sessions
        .create(req.title.as_deref().unwrap_or_default())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<Session>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.sessions.get(&sid).await?))
}

async fn session_messages(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<Vec<Message>>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.sessions.messages(&sid).await?))
}

async fn session_history(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<Vec<HistoryFile>>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.sessions.history(&sid).await?))
}
