//! Agent endpoints: prompts, cancellation, queue and summaries

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use hearth_core::proto::{AgentInfo, AgentMessage, AgentSession};

use crate::error::AppError;
use crate::types::{CancelResponse, QueuedPrompts, SummaryResponse};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(agent_info).post(send_prompt))
        .route("/sessions/{sid}", get(agent_session))
        .route("/sessions/{sid}/cancel", post(cancel_session))
        .route("/sessions/{sid}/summarize", post(summarize_session))
        .route("/sessions/{sid}/prompts/queued", get(queued_prompts))
        .route("/sessions/{sid}/prompts/clear", post(clear_prompts))
}

async fn agent_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AgentInfo>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.agent.info()))
}

/// Accepts the prompt; the turn (or its place in the queue) runs in the
/// background and reports through the event stream.
async fn send_prompt(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(message): Json<AgentMessage>,
) -> Result<StatusCode, AppError> {
    let instance = state.registry.require(&id)?;
    instance.agent.send(message).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn agent_session(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<AgentSession>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.agent.session(&sid).await?))
}

async fn cancel_session(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<CancelResponse>, AppError> {
    let instance = state.registry.require(&id)?;
    let cancelled = instance.agent.cancel(&sid);
    Ok(Json(CancelResponse {
        session_id: sid,
        cancelled,
    }))
}

async fn summarize_session(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<SummaryResponse>, AppError> {
    let instance = state.registry.require(&id)?;
    let summary = instance.agent.summarize(&sid).await?;
    Ok(Json(SummaryResponse {
        session_id: sid,
        summary,
    }))
}

async fn queued_prompts(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<Json<QueuedPrompts>, AppError> {
    let instance = state.registry.require(&id)?;
    let prompts = instance.agent.queued_prompts(&sid);
    Ok(Json(QueuedPrompts {
        session_id: sid,
        prompts,
    }))
}

async fn clear_prompts(
    State(state): State<AppState>,
    Path((id, sid)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let instance = state.registry.require(&id)?;
    instance.agent.clear_queue(&sid);
    Ok(StatusCode::NO_CONTENT)
}
