//! Hearth Server
//!
//! Control plane shared by every `hearth` client process: one long-lived
//! instance registry behind a small HTTP/1 API on a local socket, plus an
//! SSE event stream per instance. The typed [`Client`] speaks the same API.
//! This is a library crate; the server is started via `start_server()`.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use hearth_core::instance::InstanceRegistry;
use hearth_core::paths;

pub mod client;
pub mod error;
pub mod routes;
pub mod socket;
pub mod types;

pub use client::{Client, ClientError, EventStream};

/// How long open connections get to finish after a shutdown request
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for starting the server.
pub struct ServerConfig {
    /// Socket path (POSIX) or pipe name (Windows).
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: paths::default_socket_address(),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InstanceRegistry>,
}

impl AppState {
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self { registry }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let v1 = routes::api_router().route("/health", get(health));

    Router::new()
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server with a fresh registry and block until `shutdown` fires.
pub async fn start_server(
    config: ServerConfig,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let state = AppState::new(Arc::new(InstanceRegistry::new()));
    serve(config, state, shutdown).await
}

/// Serve `state` on `config.address` until `shutdown` fires.
///
/// On shutdown every instance is stopped first, which ends the open event
/// streams; remaining requests then get [`SHUTDOWN_GRACE`] to finish.
pub async fn serve(
    config: ServerConfig,
    state: AppState,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    let listener = socket::bind(&config.address)?;
    let app = build_router(state.clone());

    tracing::info!("Hearth server listening on {}", config.address);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    let result = tokio::select! {
        result = &mut server => result,
        _ = shutdown => {
            tracing::info!(
                instances = state.registry.len(),
                "Shutdown requested, stopping instances"
            );
            state.registry.shutdown_all().await;
            let _ = stop_tx.send(());
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        "Connections still open after {}s, closing",
                        SHUTDOWN_GRACE.as_secs()
                    );
                    Ok(())
                }
            }
        }
    };

    socket::cleanup(&config.address);
    result?;
    tracing::info!("Hearth server stopped");
    Ok(())
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> Json<types::Health> {
    Json(types::Health {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instances: state.registry.len(),
    })
}
