//! JSON-RPC client for one tool provider
//!
//! A background receive loop routes responses to waiting requests by id,
//! answers provider pings, and reports notifications to a callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, McpError, McpMessage, McpNotification,
    McpReply, McpRequest, McpToolDef, McpToolResult, ToolCallParams, ToolCallResult,
    ToolsListResult, PROTOCOL_VERSION,
};
use super::transport::Transport;

/// Tool calls may run much longer than the handshake
pub const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Invoked with the method name of every provider notification
pub type NotificationHandler = Arc<dyn Fn(&str) + Send + Sync>;

type Pending = Arc<Mutex<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

/// What the orchestrator needs from a connected provider
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolDef>>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult>;
    /// Health probe
    async fn ping(&self) -> Result<()>;
    async fn close(&self);
}

pub struct McpClient {
    name: String,
    transport: Arc<dyn Transport>,
    next_id: AtomicI64,
    pending: Pending,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl McpClient {
    /// Start the receive loop over an open transport
    pub fn start(
        name: &str,
        transport: Arc<dyn Transport>,
        timeout: Duration,
        on_notification: Option<NotificationHandler>,
    ) -> Self {
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();

        let recv_transport = Arc::clone(&transport);
        let recv_pending = Arc::clone(&pending);
        let recv_name = name.to_string();
        let recv_shutdown = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = recv_shutdown.cancelled() => {
                        debug!("Provider {} receive loop shutting down", recv_name);
                        break;
                    }
                    result = recv_transport.receive() => {
                        match result {
                            Ok(message) => {
                                if let Err(e) = handle_message(
                                    &message,
                                    &recv_pending,
                                    recv_transport.as_ref(),
                                    on_notification.as_ref(),
                                ).await {
                                    error!("Provider {} message error: {}", recv_name, e);
                                }
                            }
                            Err(e) => {
                                error!("Provider {} receive error: {}", recv_name, e);
                                break;
                            }
                        }
                    }
                }
            }
            // Fail whatever is still waiting
            for (_, tx) in recv_pending.lock().drain() {
                let _ = tx.send(Err(anyhow!("connection lost")));
            }
        });

        Self {
            name: name.to_string(),
            transport,
            next_id: AtomicI64::new(1),
            pending,
            timeout,
            shutdown,
        }
    }

    /// `initialize` request followed by the `initialized` notification
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "hearth".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?), self.timeout)
            .await?;

        info!(
            "Provider {} initialized (protocol: {}, server: {})",
            self.name,
            result.protocol_version,
            result
                .server_info
                .as_ref()
                .map(|s| s.name.as_str())
                .unwrap_or("unknown")
        );

        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&McpRequest::new(id, method, params))?;

        debug!("Provider {} request [{}]: {}", self.name, id, method);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.transport.send(&json).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(serde_json::from_value(value)?),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(anyhow!("request cancelled")),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(anyhow!(
                    "{} request timed out after {}s",
                    method,
                    timeout.as_secs()
                ))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let json = serde_json::to_string(&McpNotification::new(method, params))?;
        debug!("Provider {} notify: {}", self.name, method);
        self.transport.send(&json).await
    }
}

#[async_trait]
impl ToolClient for McpClient {
    async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        let result: ToolsListResult = self.request("tools/list", None, self.timeout).await?;
        info!("Provider {} has {} tools", self.name, result.tools.len());
        Ok(result.tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: (!arguments.is_null()).then_some(arguments),
        };
        let result: ToolCallResult = self
            .request(
                "tools/call",
                Some(serde_json::to_value(params)?),
                TOOL_CALL_TIMEOUT,
            )
            .await?;
        Ok(result.into())
    }

    async fn ping(&self) -> Result<()> {
        if !self.transport.is_alive().await {
            return Err(anyhow!("provider {} connection is closed", self.name));
        }
        let _: Value = self.request("ping", None, self.timeout).await?;
        Ok(())
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.transport.close().await;
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_message(
    message: &str,
    pending: &Pending,
    transport: &dyn Transport,
    on_notification: Option<&NotificationHandler>,
) -> Result<()> {
    let msg: McpMessage = serde_json::from_str(message)?;

    match (msg.id, msg.method) {
        // Request from the provider
        (Some(id), Some(method)) => {
            let reply = if method == "ping" {
                McpReply {
                    jsonrpc: "2.0",
                    id,
                    result: Some(serde_json::json!({})),
                    error: None,
                }
            } else {
                McpReply {
                    jsonrpc: "2.0",
                    id,
                    result: None,
                    error: Some(McpError {
                        code: -32601,
                        message: format!("method not supported: {}", method),
                        data: None,
                    }),
                }
            };
            transport.send(&serde_json::to_string(&reply)?).await?;
        }
        // Response to one of ours
        (Some(id), None) => {
            let Some(id) = id.as_i64() else {
                return Err(anyhow!("unexpected response id: {}", id));
            };
            let waiter = pending.lock().remove(&id);
            if let Some(tx) = waiter {
                let _ = tx.send(match msg.error {
                    Some(err) => Err(anyhow!("provider error {}: {}", err.code, err.message)),
                    None => Ok(msg.result.unwrap_or(Value::Null)),
                });
            }
        }
        (None, Some(method)) => {
            debug!("Provider notification: {}", method);
            if let Some(handler) = on_notification {
                handler(method.as_str());
            }
        }
        (None, None) => return Err(anyhow!("message has neither id nor method")),
    }

    Ok(())
}
