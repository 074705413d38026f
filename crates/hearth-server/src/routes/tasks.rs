//! Background task endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use hearth_core::error::HearthError;
use hearth_core::proto::TaskInfo;

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/{tid}", get(get_task).delete(kill_task))
}

async fn list_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TaskInfo>>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.background.list_info()))
}

async fn get_task(
    State(state): State<AppState>,
    Path((id, tid)): Path<(String, String)>,
) -> Result<Json<TaskInfo>, AppError> {
    let instance = state.registry.require(&id)?;
    let task = instance
        .background
        .get(&tid)
        .ok_or(HearthError::TaskNotFound(tid))?;
    Ok(Json(task.info()))
}

/// Blocks until the task has recorded its final output
async fn kill_task(
    State(state): State<AppState>,
    Path((id, tid)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let instance = state.registry.require(&id)?;
    instance.background.kill(&tid).await?;
    Ok(StatusCode::NO_CONTENT)
}
