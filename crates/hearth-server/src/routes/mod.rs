//! API routes

use axum::{routing::get, Json, Router};

use hearth_core::config::Config;

use crate::error::AppError;
use crate::AppState;

mod agent;
mod events;
mod instances;
mod lsps;
mod mcp;
mod permissions;
mod sessions;
mod tasks;

/// Build the API router with all endpoints
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/config", get(global_config))
        .nest("/instances", instances::router())
}

/// Global configuration, re-read on every call
async fn global_config() -> Result<Json<Config>, AppError> {
    Ok(Json(Config::load_global()?))
}
