//! Language server state and diagnostics

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use hearth_core::proto::{Diagnostics, LspInfo};

use crate::error::AppError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_lsps))
        .route("/{name}/diagnostics", get(diagnostics))
}

async fn list_lsps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LspInfo>>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.lsp.states()))
}

async fn diagnostics(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<Diagnostics>, AppError> {
    let instance = state.registry.require(&id)?;
    Ok(Json(instance.lsp.diagnostics(&name)?))
}
