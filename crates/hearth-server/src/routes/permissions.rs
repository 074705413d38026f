//! Permission endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use hearth_core::proto::{PermissionGrant, PermissionRequest, PermissionSkip};

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(pending_requests))
        .route("/grant", post(grant))
        .route("/skip", get(get_skip).post(set_skip))
}

/// Requests still waiting for an answer, for clients that attach late
async fn pending_requests(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PermissionRequest>>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.permissions.pending()))
}

async fn grant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(grant): Json<PermissionGrant>,
) -> Result<StatusCode, AppError> {
    let instance = state.registry.require(&id)?;
    instance.permissions.grant(grant)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_skip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PermissionSkip>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(PermissionSkip {
        skip: instance.permissions.skip(),
    }))
}

async fn set_skip(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PermissionSkip>,
) -> Result<Json<PermissionSkip>, AppError> {
    let instance = state.registry.require(&id)?;
    instance.permissions.set_skip(req.skip);
    tracing::info!(instance = %id, skip = req.skip, "Permission skip updated");
    Ok(Json(req))
}
