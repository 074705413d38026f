//! Transports for tool providers
//!
//! Every transport moves whole JSON-RPC messages: `send` writes one,
//! `receive` yields the next one the provider produced.

mod http;
mod stdio;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

pub use http::{HttpTransport, SseTransport};
pub use stdio::StdioTransport;

use crate::config::{McpProviderConfig, McpTransportType};

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;

    /// Next inbound message. An error means the connection is gone.
    async fn receive(&self) -> Result<String>;

    async fn is_alive(&self) -> bool;

    async fn close(&self);
}

/// Open the transport described by a (resolved) provider config
pub async fn open(config: &McpProviderConfig, working_dir: &Path) -> Result<Arc<dyn Transport>> {
    let transport: Arc<dyn Transport> = match config.transport_type() {
        McpTransportType::Stdio => Arc::new(
            StdioTransport::spawn(&config.command, &config.args, &config.env, working_dir).await?,
        ),
        McpTransportType::Http => Arc::new(HttpTransport::new(&config.url, &config.headers)?),
        McpTransportType::Sse => {
            Arc::new(SseTransport::connect(&config.url, &config.headers, config.timeout()).await?)
        }
    };
    Ok(transport)
}
