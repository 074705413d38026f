//! Tool-provider lifecycle
//!
//! One record per configured provider, all behind a single lock:
//!
//! ```text
//! disabled -> starting -> connected
//!                 \           |  (probe fails)
//!                  '-> error <'
//!                      error -> connected   (reconnect on next use)
//! ```
//!
//! Entering `error` drops the connection handle and the published tools in
//! the same write, so the agent never sees tools backed by a dead provider.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, warn};

use super::client::{McpClient, NotificationHandler, ToolClient};
use super::protocol::{McpToolDef, McpToolResult, TOOLS_LIST_CHANGED};
use super::transport;
use crate::config::McpProviderConfig;
use crate::error::{HearthError, Result};
use crate::events::EventQueue;
use crate::proto::{EventKind, EventPayload, McpEvent, McpEventType, McpProviderInfo, McpState};

/// Opens a provider and completes its handshake
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: &McpProviderConfig,
        on_notification: NotificationHandler,
    ) -> anyhow::Result<Arc<dyn ToolClient>>;
}

/// Connects over the transport named in the provider config
pub struct McpConnector {
    working_dir: PathBuf,
}

impl McpConnector {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl Connector for McpConnector {
    async fn connect(
        &self,
        name: &str,
        config: &McpProviderConfig,
        on_notification: NotificationHandler,
    ) -> anyhow::Result<Arc<dyn ToolClient>> {
        let resolved = config.resolved();
        let transport = transport::open(&resolved, &self.working_dir).await?;
        let client = McpClient::start(name, transport, config.timeout(), Some(on_notification));
        if let Err(e) = client.initialize().await {
            client.close().await;
            return Err(e);
        }
        Ok(Arc::new(client))
    }
}

struct ProviderRecord {
    config: McpProviderConfig,
    state: McpState,
    error: Option<String>,
    client: Option<Arc<dyn ToolClient>>,
    tools: Vec<McpToolDef>,
    tools_stale: bool,
    connected_at: Option<DateTime<Utc>>,
}

enum Transition {
    Starting,
    Connected {
        client: Arc<dyn ToolClient>,
        tools: Vec<McpToolDef>,
    },
    Failed(String),
    Disabled,
}

pub struct McpManager {
    providers: RwLock<BTreeMap<String, ProviderRecord>>,
    connector: Arc<dyn Connector>,
    events: EventQueue,
    /// Set by `close_all`; afterwards only `Disabled` transitions apply
    closed: AtomicBool,
}

impl McpManager {
    pub fn new(
        configs: BTreeMap<String, McpProviderConfig>,
        connector: Arc<dyn Connector>,
        events: EventQueue,
    ) -> Arc<Self> {
        let providers = configs
            .into_iter()
            .map(|(name, config)| {
                (
                    name,
                    ProviderRecord {
                        config,
                        state: McpState::Disabled,
                        error: None,
                        client: None,
                        tools: Vec::new(),
                        tools_stale: false,
                        connected_at: None,
                    },
                )
            })
            .collect();
        Arc::new(Self {
            providers: RwLock::new(providers),
            connector,
            events,
            closed: AtomicBool::new(false),
        })
    }

    /// Start every enabled provider concurrently and wait for all of them.
    ///
    /// A panic inside one provider's startup becomes that provider's
    /// `error` state; the others are unaffected.
    pub async fn initialize_all(self: &Arc<Self>) {
        let names: Vec<String> = self
            .providers
            .read()
            .iter()
            .filter(|(_, r)| !r.config.disabled)
            .map(|(n, _)| n.clone())
            .collect();

        if names.is_empty() {
            return;
        }
        info!("Starting {} tool providers in parallel", names.len());

        let handles: Vec<_> = names
            .into_iter()
            .map(|name| {
                let this = Arc::clone(self);
                let task_name = name.clone();
                let handle = tokio::spawn(async move { this.connect(&task_name, true).await });
                (name, handle)
            })
            .collect();

        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(server = %name, "Tool provider failed to start: {}", e),
                Err(join_err) => {
                    let reason = if join_err.is_panic() {
                        format!("panic during startup: {}", panic_message(join_err.into_panic()))
                    } else {
                        "startup task cancelled".to_string()
                    };
                    warn!(server = %name, "{}", reason);
                    self.transition(&name, Transition::Failed(reason));
                }
            }
        }
    }

    /// Connect, handshake and enumerate tools, in that order.
    async fn connect(self: &Arc<Self>, name: &str, announce_start: bool) -> Result<()> {
        let config = self
            .providers
            .read()
            .get(name)
            .map(|r| r.config.clone())
            .ok_or_else(|| HearthError::ProviderNotFound(name.to_string()))?;

        if announce_start {
            self.transition(name, Transition::Starting);
        }

        let timeout = config.timeout();
        let handler = self.notification_handler(name);

        let attempt = async {
            let client = tokio::time::timeout(
                timeout,
                self.connector.connect(name, &config, handler),
            )
            .await
            .map_err(|_| anyhow!("connect timed out after {}s", timeout.as_secs()))??;

            match tokio::time::timeout(timeout, client.list_tools()).await {
                Ok(Ok(tools)) => Ok::<_, anyhow::Error>((client, tools)),
                Ok(Err(e)) => {
                    client.close().await;
                    Err(e)
                }
                Err(_) => {
                    client.close().await;
                    Err(anyhow!("tools/list timed out after {}s", timeout.as_secs()))
                }
            }
        };

        match attempt.await {
            Ok((client, tools)) => {
                if let Some(rejected) = self.transition(name, Transition::Connected { client, tools })
                {
                    rejected.close().await;
                    return Err(HearthError::Other(anyhow!(
                        "tool provider {} was shut down while connecting",
                        name
                    )));
                }
                Ok(())
            }
            Err(e) => {
                self.transition(name, Transition::Failed(e.to_string()));
                Err(HearthError::Other(e))
            }
        }
    }

    fn notification_handler(self: &Arc<Self>, name: &str) -> NotificationHandler {
        let weak: Weak<Self> = Arc::downgrade(self);
        let name = name.to_string();
        Arc::new(move |method: &str| {
            if method == TOOLS_LIST_CHANGED {
                if let Some(manager) = weak.upgrade() {
                    manager.mark_tools_stale(&name);
                }
            }
        })
    }

    /// The single place provider state changes.
    ///
    /// After `close_all` every transition except `Disabled` is refused; a
    /// refused connection is handed back so the caller can close it.
    fn transition(&self, name: &str, transition: Transition) -> Option<Arc<dyn ToolClient>> {
        let event = {
            let mut providers = self.providers.write();
            let refused =
                self.closed.load(Ordering::SeqCst) && !matches!(transition, Transition::Disabled);
            let record = match providers.get_mut(name) {
                Some(record) if !refused => record,
                _ => {
                    return match transition {
                        Transition::Connected { client, .. } => Some(client),
                        _ => None,
                    }
                }
            };
            match transition {
                Transition::Starting => {
                    record.state = McpState::Starting;
                    record.error = None;
                }
                Transition::Connected { client, tools } => {
                    record.state = McpState::Connected;
                    record.error = None;
                    record.client = Some(client);
                    record.tools = tools;
                    record.tools_stale = false;
                    record.connected_at = Some(Utc::now());
                }
                Transition::Failed(error) => {
                    record.state = McpState::Error;
                    record.error = Some(error);
                    record.client = None;
                    record.tools.clear();
                    record.tools_stale = false;
                    record.connected_at = None;
                }
                Transition::Disabled => {
                    record.state = McpState::Disabled;
                    record.error = None;
                    record.client = None;
                    record.tools.clear();
                    record.connected_at = None;
                }
            }
            McpEvent {
                event_type: McpEventType::StateChanged,
                name: name.to_string(),
                state: record.state,
                error: record.error.clone(),
                tool_count: record.tools.len(),
            }
        };

        info!(server = %name, state = %event.state, tools = event.tool_count, "Tool provider state changed");
        self.events
            .publish(EventKind::Updated, EventPayload::Mcp(event));
        None
    }

    fn mark_tools_stale(&self, name: &str) {
        let event = {
            let mut providers = self.providers.write();
            let Some(record) = providers.get_mut(name) else {
                return;
            };
            record.tools_stale = true;
            McpEvent {
                event_type: McpEventType::ToolsListChanged,
                name: name.to_string(),
                state: record.state,
                error: record.error.clone(),
                tool_count: record.tools.len(),
            }
        };
        info!(server = %name, "Tool provider reported a tool list change");
        self.events
            .publish(EventKind::Updated, EventPayload::Mcp(event));
    }

    /// Published tools of every connected provider. Providers that
    /// announced a change since the last listing are re-enumerated first.
    pub async fn tools(&self) -> Vec<(String, McpToolDef)> {
        let stale: Vec<(String, Arc<dyn ToolClient>, std::time::Duration)> = self
            .providers
            .read()
            .iter()
            .filter(|(_, r)| r.state == McpState::Connected && r.tools_stale)
            .filter_map(|(n, r)| {
                r.client
                    .clone()
                    .map(|c| (n.clone(), c, r.config.timeout()))
            })
            .collect();

        for (name, client, timeout) in stale {
            match tokio::time::timeout(timeout, client.list_tools()).await {
                Ok(Ok(tools)) => {
                    let mut providers = self.providers.write();
                    if let Some(record) = providers.get_mut(&name) {
                        let same_client = record
                            .client
                            .as_ref()
                            .is_some_and(|c| Arc::ptr_eq(c, &client));
                        if same_client {
                            record.tools = tools;
                            record.tools_stale = false;
                        }
                    }
                }
                Ok(Err(e)) => warn!(server = %name, "Failed to refresh tools: {}", e),
                Err(_) => warn!(server = %name, "Refreshing tools timed out"),
            }
        }

        self.providers
            .read()
            .iter()
            .filter(|(_, r)| r.state == McpState::Connected)
            .flat_map(|(n, r)| r.tools.iter().map(move |t| (n.clone(), t.clone())))
            .collect()
    }

    /// Tools currently published by one provider
    pub fn provider_tools(&self, name: &str) -> Vec<McpToolDef> {
        self.providers
            .read()
            .get(name)
            .filter(|r| r.state == McpState::Connected)
            .map(|r| r.tools.clone())
            .unwrap_or_default()
    }

    pub fn state(&self, name: &str) -> Option<McpState> {
        self.providers.read().get(name).map(|r| r.state)
    }

    pub fn has_connection(&self, name: &str) -> bool {
        self.providers
            .read()
            .get(name)
            .is_some_and(|r| r.client.is_some())
    }

    pub fn list(&self) -> Vec<McpProviderInfo> {
        self.providers
            .read()
            .iter()
            .map(|(name, r)| McpProviderInfo {
                name: name.clone(),
                transport: r.config.transport_type().to_string(),
                state: r.state,
                error: r.error.clone(),
                tool_count: r.tools.len(),
                connected_at: r.connected_at,
            })
            .collect()
    }

    /// Healthy client for `name`, reconnecting once if the probe fails.
    async fn client_for_call(self: &Arc<Self>, name: &str) -> Result<Arc<dyn ToolClient>> {
        let (client, state, last_error, timeout) = {
            let providers = self.providers.read();
            let record = providers
                .get(name)
                .ok_or_else(|| HearthError::ProviderNotFound(name.to_string()))?;
            (
                record.client.clone(),
                record.state,
                record.error.clone(),
                record.config.timeout(),
            )
        };

        if state == McpState::Disabled {
            return Err(HearthError::Other(anyhow!("tool provider {} is disabled", name)));
        }

        let probe_error = match client {
            Some(client) => match tokio::time::timeout(timeout, client.ping()).await {
                Ok(Ok(())) => return Ok(client),
                Ok(Err(e)) => e,
                Err(_) => anyhow!("ping timed out after {}s", timeout.as_secs()),
            },
            None => anyhow!(
                "tool provider {} is not connected: {}",
                name,
                last_error.unwrap_or_else(|| state.to_string())
            ),
        };

        warn!(server = %name, "Health probe failed, reconnecting: {}", probe_error);
        if state == McpState::Connected {
            self.transition(name, Transition::Failed(probe_error.to_string()));
        }

        match self.connect(name, false).await {
            Ok(()) => self
                .providers
                .read()
                .get(name)
                .and_then(|r| r.client.clone())
                .ok_or_else(|| HearthError::Other(probe_error)),
            Err(e) => {
                warn!(server = %name, "Reconnect failed: {}", e);
                Err(HearthError::Other(probe_error))
            }
        }
    }

    pub async fn call_tool(
        self: &Arc<Self>,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<McpToolResult> {
        let client = self.client_for_call(provider).await?;
        Ok(client.call_tool(tool, arguments).await?)
    }

    /// Disable every provider and disconnect the connected ones (instance
    /// shutdown). Providers still starting are closed when they finish.
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let records: Vec<(String, Option<Arc<dyn ToolClient>>)> = self
            .providers
            .read()
            .iter()
            .filter(|(_, r)| r.state != McpState::Disabled)
            .map(|(n, r)| (n.clone(), r.client.clone()))
            .collect();

        for (name, client) in records {
            self.transition(&name, Transition::Disabled);
            if let Some(client) = client {
                client.close().await;
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::Envelope;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeClient {
        tools: RwLock<Vec<McpToolDef>>,
        healthy: AtomicBool,
        closed: AtomicBool,
    }

    impl FakeClient {
        fn new(tools: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                tools: RwLock::new(tools.iter().map(|n| tool(n)).collect()),
                healthy: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            })
        }
    }

    fn tool(name: &str) -> McpToolDef {
        McpToolDef {
            name: name.to_string(),
            description: None,
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[async_trait]
    impl ToolClient for FakeClient {
        async fn list_tools(&self) -> anyhow::Result<Vec<McpToolDef>> {
            Ok(self.tools.read().clone())
        }
        async fn call_tool(&self, name: &str, _arguments: Value) -> anyhow::Result<McpToolResult> {
            Ok(McpToolResult {
                content: vec![super::super::protocol::McpContent::Text {
                    text: format!("called {}", name),
                }],
                is_error: false,
            })
        }
        async fn ping(&self) -> anyhow::Result<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(anyhow!("connection reset"))
            }
        }
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Clone)]
    enum Behavior {
        Ok(Arc<FakeClient>),
        Fail(&'static str),
        Panic,
        Hang,
        /// Succeed once the gate is opened
        Gated(Arc<tokio::sync::Notify>, Arc<FakeClient>),
    }

    #[derive(Default)]
    struct FakeConnector {
        behaviors: RwLock<BTreeMap<String, Vec<Behavior>>>,
        handlers: RwLock<BTreeMap<String, NotificationHandler>>,
        attempts: AtomicUsize,
    }

    impl FakeConnector {
        /// Behaviors are consumed in order; the last one repeats
        fn script(&self, name: &str, behaviors: Vec<Behavior>) {
            self.behaviors.write().insert(name.to_string(), behaviors);
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(
            &self,
            name: &str,
            _config: &McpProviderConfig,
            on_notification: NotificationHandler,
        ) -> anyhow::Result<Arc<dyn ToolClient>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.handlers
                .write()
                .insert(name.to_string(), on_notification);
            let behavior = {
                let mut all = self.behaviors.write();
                let list = all.get_mut(name).expect("scripted provider");
                if list.len() > 1 {
                    list.remove(0)
                } else {
                    list[0].clone()
                }
            };
            match behavior {
                Behavior::Ok(client) => Ok(client),
                Behavior::Fail(msg) => Err(anyhow!(msg)),
                Behavior::Panic => panic!("provider exploded"),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(anyhow!("unreachable"))
                }
                Behavior::Gated(gate, client) => {
                    gate.notified().await;
                    Ok(client)
                }
            }
        }
    }

    fn provider(timeout: Option<u64>) -> McpProviderConfig {
        McpProviderConfig {
            command: "fake".into(),
            timeout,
            ..Default::default()
        }
    }

    fn manager(
        names: &[&str],
        connector: Arc<FakeConnector>,
    ) -> (Arc<McpManager>, EventQueue) {
        let events = EventQueue::new();
        let configs = names
            .iter()
            .map(|n| (n.to_string(), provider(Some(1))))
            .collect();
        (McpManager::new(configs, connector, events.clone()), events)
    }

    #[tokio::test]
    async fn starts_providers_and_publishes_tools() {
        let connector = Arc::new(FakeConnector::default());
        connector.script("files", vec![Behavior::Ok(FakeClient::new(&["read", "write"]))]);
        let (mgr, _events) = manager(&["files"], connector);

        assert_eq!(mgr.state("files"), Some(McpState::Disabled));
        mgr.initialize_all().await;

        assert_eq!(mgr.state("files"), Some(McpState::Connected));
        let tools = mgr.tools().await;
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().all(|(p, _)| p == "files"));
    }

    #[tokio::test]
    async fn panicking_provider_does_not_affect_others() {
        let connector = Arc::new(FakeConnector::default());
        connector.script("a", vec![Behavior::Panic]);
        connector.script("b", vec![Behavior::Ok(FakeClient::new(&["search"]))]);
        let (mgr, _events) = manager(&["a", "b"], connector);

        mgr.initialize_all().await;

        assert_eq!(mgr.state("a"), Some(McpState::Error));
        let info = mgr.list();
        let a = info.iter().find(|i| i.name == "a").unwrap();
        assert!(a.error.as_deref().unwrap().contains("provider exploded"));

        assert_eq!(mgr.state("b"), Some(McpState::Connected));
        assert_eq!(mgr.provider_tools("b").len(), 1);
    }

    #[tokio::test]
    async fn handshake_failure_and_timeout_become_error_state() {
        let connector = Arc::new(FakeConnector::default());
        connector.script("bad", vec![Behavior::Fail("handshake refused")]);
        connector.script("slow", vec![Behavior::Hang]);
        let (mgr, _events) = manager(&["bad", "slow"], connector);

        let begin = std::time::Instant::now();
        mgr.initialize_all().await;
        assert!(begin.elapsed() < Duration::from_secs(5));

        for name in ["bad", "slow"] {
            assert_eq!(mgr.state(name), Some(McpState::Error));
            assert!(!mgr.has_connection(name));
            assert!(mgr.provider_tools(name).is_empty());
        }
    }

    #[tokio::test]
    async fn disabled_providers_are_not_started() {
        let connector = Arc::new(FakeConnector::default());
        let events = EventQueue::new();
        let mut configs = BTreeMap::new();
        configs.insert(
            "off".to_string(),
            McpProviderConfig {
                disabled: true,
                ..provider(None)
            },
        );
        let mgr = McpManager::new(configs, connector.clone(), events);
        mgr.initialize_all().await;
        assert_eq!(mgr.state("off"), Some(McpState::Disabled));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
        assert!(mgr.call_tool("off", "x", Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn failed_probe_clears_tools_when_reconnect_fails() {
        let first = FakeClient::new(&["read"]);
        let connector = Arc::new(FakeConnector::default());
        connector.script(
            "files",
            vec![Behavior::Ok(first.clone()), Behavior::Fail("still down")],
        );
        let (mgr, _events) = manager(&["files"], connector);
        mgr.initialize_all().await;
        assert_eq!(mgr.provider_tools("files").len(), 1);

        first.healthy.store(false, Ordering::SeqCst);
        let err = mgr
            .call_tool("files", "read", Value::Null)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("connection reset"));

        assert_eq!(mgr.state("files"), Some(McpState::Error));
        assert!(mgr.provider_tools("files").is_empty());
        assert!(mgr.tools().await.is_empty());
        assert!(!mgr.has_connection("files"));
        let info = mgr.list();
        assert!(info[0].error.as_deref().unwrap().contains("still down"));
    }

    #[tokio::test]
    async fn failed_probe_reconnects_inline() {
        let first = FakeClient::new(&["read"]);
        let second = FakeClient::new(&["read", "grep"]);
        let connector = Arc::new(FakeConnector::default());
        connector.script(
            "files",
            vec![Behavior::Ok(first.clone()), Behavior::Ok(second.clone())],
        );
        let (mgr, _events) = manager(&["files"], connector.clone());
        mgr.initialize_all().await;

        first.healthy.store(false, Ordering::SeqCst);
        let result = mgr.call_tool("files", "grep", Value::Null).await.unwrap();
        assert!(!result.is_error);
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(mgr.state("files"), Some(McpState::Connected));
        assert_eq!(mgr.provider_tools("files").len(), 2);
    }

    #[tokio::test]
    async fn error_state_recovers_on_next_use() {
        let connector = Arc::new(FakeConnector::default());
        connector.script(
            "files",
            vec![
                Behavior::Fail("not yet"),
                Behavior::Ok(FakeClient::new(&["read"])),
            ],
        );
        let (mgr, _events) = manager(&["files"], connector);
        mgr.initialize_all().await;
        assert_eq!(mgr.state("files"), Some(McpState::Error));

        mgr.call_tool("files", "read", Value::Null).await.unwrap();
        assert_eq!(mgr.state("files"), Some(McpState::Connected));
    }

    #[tokio::test]
    async fn tool_list_change_is_fetched_lazily() {
        let client = FakeClient::new(&["read"]);
        let connector = Arc::new(FakeConnector::default());
        connector.script("files", vec![Behavior::Ok(client.clone())]);
        let (mgr, events) = manager(&["files"], connector.clone());
        mgr.initialize_all().await;
        let mut rx = events.subscribe();

        client.tools.write().push(tool("grep"));
        let handler = connector.handlers.read().get("files").cloned().unwrap();
        handler(TOOLS_LIST_CHANGED);

        // Published set is unchanged until the next listing
        assert_eq!(mgr.provider_tools("files").len(), 1);
        let Envelope { payload, .. } = rx.recv().await.unwrap();
        match payload {
            EventPayload::Mcp(e) => assert_eq!(e.event_type, McpEventType::ToolsListChanged),
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(mgr.tools().await.len(), 2);
        assert_eq!(mgr.provider_tools("files").len(), 2);
    }

    #[tokio::test]
    async fn state_changes_are_published() {
        let connector = Arc::new(FakeConnector::default());
        connector.script("files", vec![Behavior::Ok(FakeClient::new(&[]))]);
        let (mgr, events) = manager(&["files"], connector);
        let mut rx = events.subscribe();
        mgr.initialize_all().await;

        let mut states = Vec::new();
        for _ in 0..2 {
            if let EventPayload::Mcp(e) = rx.recv().await.unwrap().payload {
                states.push(e.state);
            }
        }
        assert_eq!(states, vec![McpState::Starting, McpState::Connected]);
    }

    #[tokio::test]
    async fn close_all_disconnects() {
        let client = FakeClient::new(&["read"]);
        let connector = Arc::new(FakeConnector::default());
        connector.script("files", vec![Behavior::Ok(client.clone())]);
        let (mgr, _events) = manager(&["files"], connector);
        mgr.initialize_all().await;

        mgr.close_all().await;
        assert!(client.closed.load(Ordering::SeqCst));
        assert!(!mgr.has_connection("files"));
        assert!(mgr.tools().await.is_empty());
    }

    #[tokio::test]
    async fn provider_finishing_after_close_all_stays_disabled() {
        let gate = Arc::new(tokio::sync::Notify::new());
        let client = FakeClient::new(&["read"]);
        let connector = Arc::new(FakeConnector::default());
        connector.script("files", vec![Behavior::Gated(gate.clone(), client.clone())]);
        let (mgr, _events) = manager(&["files"], connector);

        let init = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.initialize_all().await })
        };
        while mgr.state("files") != Some(McpState::Starting) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        mgr.close_all().await;
        assert_eq!(mgr.state("files"), Some(McpState::Disabled));
        gate.notify_one();
        init.await.unwrap();

        assert_eq!(mgr.state("files"), Some(McpState::Disabled));
        assert!(!mgr.has_connection("files"));
        assert!(client.closed.load(Ordering::SeqCst));
        assert!(mgr.tools().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let (mgr, _events) = manager(&[], Arc::new(FakeConnector::default()));
        let err = mgr.call_tool("nope", "x", Value::Null).await.err().unwrap();
        assert!(err.is_not_found());
    }
}
