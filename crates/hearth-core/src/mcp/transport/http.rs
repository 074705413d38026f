//! HTTP-based transports
//!
//! - [`HttpTransport`]: streamable HTTP. Each message is a POST; the reply
//!   is either a JSON body or a short event stream.
//! - [`SseTransport`]: a long-lived GET event stream that first announces an
//!   `endpoint`, which then receives every outgoing message by POST.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use tokio::sync::{mpsc, oneshot, Mutex};

use super::Transport;
use crate::sse::SseDecoder;

const SESSION_HEADER: &str = "mcp-session-id";

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("Invalid header name: {}", k))?;
        let value =
            HeaderValue::from_str(v).with_context(|| format!("Invalid value for header {}", k))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Forward every SSE data frame of `response` into `inbox`
fn spawn_event_reader(
    response: reqwest::Response,
    inbox: mpsc::UnboundedSender<String>,
    mut endpoint_tx: Option<oneshot::Sender<String>>,
    alive: Option<Arc<AtomicBool>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!("Provider event stream error: {}", e);
                    break;
                }
            };
            for frame in decoder.push(&String::from_utf8_lossy(&chunk)) {
                match frame.event.as_deref() {
                    Some("endpoint") => {
                        if let Some(tx) = endpoint_tx.take() {
                            let _ = tx.send(frame.data);
                        }
                    }
                    None | Some("message") => {
                        if inbox.send(frame.data).is_err() {
                            return;
                        }
                    }
                    Some(other) => tracing::debug!("Ignoring provider event: {}", other),
                }
            }
        }

        if let Some(alive) = alive {
            alive.store(false, Ordering::SeqCst);
        }
    })
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    session_id: parking_lot::Mutex<Option<String>>,
    inbox_tx: mpsc::UnboundedSender<String>,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(url: &str, headers: &HashMap<String, String>) -> Result<Self> {
        if url.is_empty() {
            return Err(anyhow!("http provider has no url"));
        }
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Ok(Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            headers: header_map(headers)?,
            session_id: parking_lot::Mutex::new(None),
            inbox_tx,
            inbox_rx: Mutex::new(inbox_rx),
            closed: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("transport closed"));
        }

        let mut request = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string());
        if let Some(session) = self.session_id.lock().clone() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("provider returned {}: {}", status, body));
        }

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(session.to_string());
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_stream {
            // Reader ends with the response stream
            drop(spawn_event_reader(response, self.inbox_tx.clone(), None, None));
        } else {
            let body = response.text().await?;
            let body = body.trim();
            if !body.is_empty() {
                self.inbox_tx
                    .send(body.to_string())
                    .map_err(|_| anyhow!("transport closed"))?;
            }
        }
        Ok(())
    }

    async fn receive(&self) -> Result<String> {
        self.inbox_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| anyhow!("transport closed"))
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let session = self.session_id.lock().take();
        if let Some(session) = session {
            let _ = self
                .client
                .delete(&self.url)
                .headers(self.headers.clone())
                .header(SESSION_HEADER, session)
                .send()
                .await;
        }
    }
}

pub struct SseTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: HeaderMap,
    inbox_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    alive: Arc<AtomicBool>,
    reader: tokio::task::JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait (up to `timeout`) for the endpoint
    pub async fn connect(
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        if url.is_empty() {
            return Err(anyhow!("sse provider has no url"));
        }
        let base = url::Url::parse(url).with_context(|| format!("Invalid provider url {}", url))?;
        let headers = header_map(headers)?;
        let client = reqwest::Client::new();

        let response = tokio::time::timeout(
            timeout,
            client
                .get(url)
                .headers(headers.clone())
                .header(ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| anyhow!("timed out connecting to {}", url))??;

        if !response.status().is_success() {
            return Err(anyhow!("provider returned {}", response.status()));
        }

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let reader =
            spawn_event_reader(response, inbox_tx, Some(endpoint_tx), Some(alive.clone()));

        let endpoint = tokio::time::timeout(timeout, endpoint_rx)
            .await
            .map_err(|_| {
                reader.abort();
                anyhow!("provider did not announce an endpoint")
            })?
            .map_err(|_| anyhow!("event stream closed before endpoint"))?;
        let endpoint = base
            .join(&endpoint)
            .with_context(|| format!("Invalid endpoint {}", endpoint))?;

        tracing::debug!("SSE provider endpoint: {}", endpoint);

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            headers,
            inbox_rx: Mutex::new(inbox_rx),
            alive,
            reader,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("provider returned {}", response.status()));
        }
        Ok(())
    }

    async fn receive(&self) -> Result<String> {
        self.inbox_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| anyhow!("event stream closed"))
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader.abort();
    }
}
