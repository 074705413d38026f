//! Instance registry endpoints

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};

use hearth_core::config::Config;
use hearth_core::proto::InstanceDescriptor;

use super::{agent, events, lsps, mcp, permissions, sessions, tasks};
use crate::error::AppError;
use crate::types::{DeleteInstancesQuery, DeletedInstances};
use crate::AppState;

/// Build the instances router; every per-instance surface hangs off `/{id}`
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(list_instances)
                .post(create_instance)
                .delete(delete_instances),
        )
        .route("/{id}", delete(delete_instance))
        .route("/{id}/config", get(instance_config))
        .route("/{id}/events", get(events::stream))
        .nest("/{id}/agent", agent::router())
        .nest("/{id}/sessions", sessions::router())
        .nest("/{id}/permissions", permissions::router())
        .nest("/{id}/mcp", mcp::router())
        .nest("/{id}/lsps", lsps::router())
        .nest("/{id}/tasks", tasks::router())
}

async fn list_instances(State(state): State<AppState>) -> Json<Vec<InstanceDescriptor>> {
    Json(
        state
            .registry
            .list()
            .iter()
            .map(|i| i.descriptor())
            .collect(),
    )
}

/// Create or attach. Idempotent per canonical path: the first descriptor wins.
async fn create_instance(
    State(state): State<AppState>,
    Json(desc): Json<InstanceDescriptor>,
) -> Result<Json<InstanceDescriptor>, AppError> {
    let instance = state.registry.create(desc).await?;
    Ok(Json(instance.descriptor()))
}

/// `?id=` must exist; ids listed in the body are deleted best-effort.
async fn delete_instances(
    State(state): State<AppState>,
    Query(query): Query<DeleteInstancesQuery>,
    body: Bytes,
) -> Result<Json<DeletedInstances>, AppError> {
    let listed: Vec<String> = if body.iter().all(u8::is_ascii_whitespace) {
        Vec::new()
    } else {
        serde_json::from_slice(&body)?
    };
    if query.id.is_none() && listed.is_empty() {
        return Err(AppError::BadRequest("no instance ids given".to_string()));
    }

    let mut deleted = Vec::new();
    if let Some(id) = query.id {
        state.registry.delete(&id)?;
        deleted.push(id);
    }
    deleted.extend(state.registry.delete_many(&listed));
    Ok(Json(DeletedInstances { deleted }))
}

async fn delete_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.registry.delete(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn instance_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Config>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.config.clone()))
}
