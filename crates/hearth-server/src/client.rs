//! Typed client for the control-plane API
//!
//! Every call opens a short HTTP/1 connection over the local socket. The
//! event stream keeps its connection for as long as the [`EventStream`] is
//! alive; a dropped connection simply ends the stream, there is no
//! reconnect here.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{ACCEPT, CONTENT_TYPE, HOST};
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hearth_core::config::Config;
use hearth_core::proto::{
    AgentInfo, AgentMessage, AgentSession, Diagnostics, Envelope, ErrorBody, EventPayload,
    HistoryFile, InstanceDescriptor, LspInfo, McpProviderInfo, Message, PermissionGrant,
    PermissionRequest, PermissionSkip, RawEnvelope, Session, TaskInfo,
};
use hearth_core::sse::SseDecoder;

use crate::socket;
use crate::types::{
    CancelResponse, CreateSessionRequest, DeletedInstances, Health, QueuedPrompts,
    SummaryResponse,
};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot reach hearth server at {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The server answered with an error envelope
    #[error("{message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Http(#[from] hyper::Error),

    #[error("invalid request: {0}")]
    Request(#[from] hyper::http::Error),

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_permission_denied(&self) -> bool {
        self.status() == Some(403)
    }

    /// No server is listening on the address
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ClientError::Connect { .. })
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone)]
pub struct Client {
    address: String,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(hearth_core::paths::default_socket_address())
    }
}

impl Client {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<Response<Incoming>> {
        let stream = socket::connect(&self.address)
            .await
            .map_err(|source| ClientError::Connect {
                address: self.address.clone(),
                source,
            })?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!("Connection closed: {}", e);
            }
        });

        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, "hearth")
            .header(ACCEPT, "application/json");
        let body = match body {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Full::new(Bytes::from(bytes))
            }
            None => Full::new(Bytes::new()),
        };
        let response = sender.send_request(builder.body(body)?).await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        read_json(self.send(Method::GET, path, None).await?).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let body = serde_json::to_vec(body)?;
        read_json(self.send(Method::POST, path, Some(body)).await?).await
    }

    /// POST whose response body is not needed
    async fn post_unit<B: Serialize>(&self, path: &str, body: Option<&B>) -> Result<()> {
        let body = body.map(serde_json::to_vec).transpose()?;
        self.send(Method::POST, path, body).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }

    // -- Global -------------------------------------------------------------

    pub async fn health(&self) -> Result<Health> {
        self.get("/v1/health").await
    }

    pub async fn config(&self) -> Result<Config> {
        self.get("/v1/config").await
    }

    // -- Instances ----------------------------------------------------------

    pub async fn list_instances(&self) -> Result<Vec<InstanceDescriptor>> {
        self.get("/v1/instances").await
    }

    /// Create or attach to the instance for `desc.path`
    pub async fn create_instance(&self, desc: &InstanceDescriptor) -> Result<InstanceDescriptor> {
        self.post("/v1/instances", desc).await
    }

    pub async fn delete_instance(&self, id: &str) -> Result<()> {
        self.delete(&format!("/v1/instances/{}", id)).await
    }

    /// Best-effort delete; returns the ids that existed
    pub async fn delete_instances(&self, ids: &[String]) -> Result<Vec<String>> {
        let body = serde_json::to_vec(ids)?;
        let response = self
            .send(Method::DELETE, "/v1/instances", Some(body))
            .await?;
        let deleted: DeletedInstances = read_json(response).await?;
        Ok(deleted.deleted)
    }

    pub async fn instance_config(&self, id: &str) -> Result<Config> {
        self.get(&format!("/v1/instances/{}/config", id)).await
    }

    // -- Agent --------------------------------------------------------------

    pub async fn agent_info(&self, id: &str) -> Result<AgentInfo> {
        self.get(&format!("/v1/instances/{}/agent", id)).await
    }

    /// Queue a prompt; progress arrives on the event stream
    pub async fn send_prompt(&self, id: &str, message: &AgentMessage) -> Result<()> {
        self.post_unit(&format!("/v1/instances/{}/agent", id), Some(message))
            .await
    }

    pub async fn agent_session(&self, id: &str, session_id: &str) -> Result<AgentSession> {
        self.get(&format!("/v1/instances/{}/agent/sessions/{}", id, session_id))
            .await
    }

    /// Returns whether a turn was running
    pub async fn cancel(&self, id: &str, session_id: &str) -> Result<bool> {
        let path = format!("/v1/instances/{}/agent/sessions/{}/cancel", id, session_id);
        let response: CancelResponse = read_json(self.send(Method::POST, &path, None).await?).await?;
        Ok(response.cancelled)
    }

    pub async fn summarize(&self, id: &str, session_id: &str) -> Result<String> {
        let path = format!(
            "/v1/instances/{}/agent/sessions/{}/summarize",
            id, session_id
        );
        let response: SummaryResponse =
            read_json(self.send(Method::POST, &path, None).await?).await?;
        Ok(response.summary)
    }

    pub async fn queued_prompts(&self, id: &str, session_id: &str) -> Result<Vec<String>> {
        let queued: QueuedPrompts = self
            .get(&format!(
                "/v1/instances/{}/agent/sessions/{}/prompts/queued",
                id, session_id
            ))
            .await?;
        Ok(queued.prompts)
    }

    pub async fn clear_queue(&self, id: &str, session_id: &str) -> Result<()> {
        self.post_unit::<()>(
            &format!(
                "/v1/instances/{}/agent/sessions/{}/prompts/clear",
                id, session_id
            ),
            None,
        )
        .await
    }

    // -- Sessions -----------------------------------------------------------

    pub async fn list_sessions(&self, id: &str) -> Result<Vec<Session>> {
        self.get(&format!("/v1/instances/{}/sessions", id)).await
    }

    pub async fn create_session(&self, id: &str, title: Option<&str>) -> Result<Session> {
        self.post(
            &format!("/v1/instances/{}/sessions", id),
            &CreateSessionRequest {
                title: title.map(str::to_string),
            },
        )
        .await
    }

    pub async fn session(&self, id: &str, session_id: &str) -> Result<Session> {
        self.get(&format!("/v1/instances/{}/sessions/{}", id, session_id))
            .await
    }

    pub async fn messages(&self, id: &str, session_id: &str) -> Result<Vec<Message>> {
        self.get(&format!(
            "/v1/instances/{}/sessions/{}/messages",
            id, session_id
        ))
        .await
    }

    pub async fn history(&self, id: &str, session_id: &str) -> Result<Vec<HistoryFile>> {
        self.get(&format!(
            "/v1/instances/{}/sessions/{}/history",
            id, session_id
        ))
        .await
    }

    // -- Permissions --------------------------------------------------------

    pub async fn pending_permissions(&self, id: &str) -> Result<Vec<PermissionRequest>> {
        self.get(&format!("/v1/instances/{}/permissions", id)).await
    }

    pub async fn grant_permission(&self, id: &str, grant: &PermissionGrant) -> Result<()> {
        self.post_unit(&format!("/v1/instances/{}/permissions/grant", id), Some(grant))
            .await
    }

    pub async fn skip_permissions(&self, id: &str) -> Result<bool> {
        let skip: PermissionSkip = self
            .get(&format!("/v1/instances/{}/permissions/skip", id))
            .await?;
        Ok(skip.skip)
    }

    pub async fn set_skip_permissions(&self, id: &str, skip: bool) -> Result<bool> {
        let skip: PermissionSkip = self
            .post(
                &format!("/v1/instances/{}/permissions/skip", id),
                &PermissionSkip { skip },
            )
            .await?;
        Ok(skip.skip)
    }

    // -- Providers, language servers, tasks ---------------------------------

    pub async fn mcp_providers(&self, id: &str) -> Result<Vec<McpProviderInfo>> {
        self.get(&format!("/v1/instances/{}/mcp", id)).await
    }

    pub async fn lsps(&self, id: &str) -> Result<Vec<LspInfo>> {
        self.get(&format!("/v1/instances/{}/lsps", id)).await
    }

    pub async fn diagnostics(&self, id: &str, name: &str) -> Result<Diagnostics> {
        self.get(&format!("/v1/instances/{}/lsps/{}/diagnostics", id, name))
            .await
    }

    pub async fn tasks(&self, id: &str) -> Result<Vec<TaskInfo>> {
        self.get(&format!("/v1/instances/{}/tasks", id)).await
    }

    pub async fn task(&self, id: &str, task_id: &str) -> Result<TaskInfo> {
        self.get(&format!("/v1/instances/{}/tasks/{}", id, task_id))
            .await
    }

    pub async fn kill_task(&self, id: &str, task_id: &str) -> Result<()> {
        self.delete(&format!("/v1/instances/{}/tasks/{}", id, task_id))
            .await
    }

    // -- Events -------------------------------------------------------------

    /// Open the instance event stream
    pub async fn subscribe_events(&self, id: &str) -> Result<EventStream> {
        let response = self
            .send(Method::GET, &format!("/v1/instances/{}/events", id), None)
            .await?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_events(response.into_body(), tx));
        Ok(EventStream { rx, reader })
    }
}

/// Decoded envelopes from one event stream connection
pub struct EventStream {
    rx: mpsc::Receiver<Envelope>,
    reader: JoinHandle<()>,
}

impl EventStream {
    /// Next envelope, or `None` once the connection is gone
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_json<T: DeserializeOwned>(response: Response<Incoming>) -> Result<T> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

async fn api_error(response: Response<Incoming>) -> ClientError {
    let status = response.status();
    let bytes = match response.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return e.into(),
    };
    match serde_json::from_slice::<ErrorBody>(&bytes) {
        Ok(body) => ClientError::Api {
            status: status.as_u16(),
            code: body.code,
            message: body.message,
        },
        // Rejections raised by extractors come back as plain text
        Err(_) => {
            let text = String::from_utf8_lossy(&bytes).trim().to_string();
            ClientError::Api {
                status: status.as_u16(),
                code: String::new(),
                message: if text.is_empty() {
                    status.to_string()
                } else {
                    text
                },
            }
        }
    }
}

/// Read SSE frames off the body and forward decoded envelopes. Unknown or
/// malformed envelopes are logged and skipped.
async fn read_events(mut body: Incoming, tx: mpsc::Sender<Envelope>) {
    let mut decoder = SseDecoder::new();
    let mut pending: Vec<u8> = Vec::new();

    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("Event stream ended: {}", e);
                break;
            }
        };
        let Ok(chunk) = frame.into_data() else {
            continue;
        };

        // Hold back a UTF-8 sequence split across chunks
        pending.extend_from_slice(&chunk);
        let valid = match std::str::from_utf8(&pending) {
            Ok(_) => pending.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => pending.len(),
        };
        let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
        pending.drain(..valid);

        for sse in decoder.push(&text) {
            let Some(envelope) = decode_envelope(&sse.data) else {
                continue;
            };
            if tx.send(envelope).await.is_err() {
                return;
            }
        }
    }
}

/// Discriminator first, payload second
fn decode_envelope(data: &str) -> Option<Envelope> {
    let raw: RawEnvelope = match serde_json::from_str(data) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Dropping malformed event frame: {}", e);
            return None;
        }
    };
    let event_type = raw.event_type;
    match EventPayload::decode(&event_type, raw.payload) {
        Ok(Some(payload)) => Some(Envelope::new(raw.action, payload)),
        Ok(None) => {
            tracing::warn!(event_type = %event_type, "Dropping event of unknown type");
            None
        }
        Err(e) => {
            tracing::warn!(event_type = %event_type, "Dropping undecodable event: {}", e);
            None
        }
    }
}
