//! Tool provider status

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use hearth_core::proto::McpProviderInfo;

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_providers))
}

async fn list_providers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<McpProviderInfo>>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.mcp.list()))
}
