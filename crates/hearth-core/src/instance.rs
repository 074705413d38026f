//! Workspace instances
//!
//! One [`Instance`] per canonical working directory. The id is the SHA-256
//! of the canonical path, so attaching to the same directory twice returns
//! the existing instance instead of building a second one.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::agent::{Agent, AgentServices, TurnRunner, UnconfiguredRunner};
use crate::config::Config;
use crate::error::{HearthError, Result};
use crate::events::EventQueue;
use crate::hooks::HookExecutor;
use crate::lsp::{LspService, NoLsp};
use crate::mcp::{Connector, McpConnector, McpManager};
use crate::paths;
use crate::permission::PermissionService;
use crate::process::BackgroundManager;
use crate::proto::{InstanceDescriptor, InstanceState};
use crate::session::{MemorySessionStore, SessionStore};
use crate::tools::ToolRegistry;

/// Stable id for a workspace path
pub fn instance_id(path: &Path) -> String {
    let canonical = paths::canonical_workspace_path(path);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Create the data directory with a `.gitignore` that ignores everything
fn prepare_data_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(gitignore, "*\n")?;
    }
    Ok(())
}

pub struct Instance {
    pub id: String,
    pub path: PathBuf,
    pub data_dir: PathBuf,
    pub debug: bool,
    pub yolo: bool,
    pub config: Config,
    pub events: EventQueue,
    pub background: BackgroundManager,
    pub mcp: Arc<McpManager>,
    pub permissions: Arc<PermissionService>,
    pub sessions: Arc<dyn SessionStore>,
    pub lsp: Arc<dyn LspService>,
    pub agent: Arc<Agent>,
    state: RwLock<InstanceState>,
}

impl Instance {
    pub fn state(&self) -> InstanceState {
        *self.state.read()
    }

    pub fn descriptor(&self) -> InstanceDescriptor {
        InstanceDescriptor {
            id: self.id.clone(),
            path: self.path.clone(),
            data_dir: Some(self.data_dir.clone()),
            debug: self.debug,
            yolo: self.yolo,
            state: Some(self.state()),
        }
    }

    /// Launch the tool providers and mark the instance started
    fn start(self: &Arc<Self>) {
        let mcp = Arc::clone(&self.mcp);
        tokio::spawn(async move { mcp.initialize_all().await });
        *self.state.write() = InstanceState::Started;
        info!(id = %self.id, path = %self.path.display(), "Instance started");
    }

    /// Stop everything the instance owns
    pub async fn shutdown(&self) {
        *self.state.write() = InstanceState::Stopped;
        self.agent.cancel_all();
        self.background.kill_all().await;
        self.mcp.close_all().await;
        info!(id = %self.id, "Instance shut down");
    }
}

type ConnectorFactory = Arc<dyn Fn(&Path) -> Arc<dyn Connector> + Send + Sync>;

pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, Arc<Instance>>>,
    connector: ConnectorFactory,
    runner: Arc<dyn TurnRunner>,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            connector: Arc::new(|path: &Path| -> Arc<dyn Connector> {
                Arc::new(McpConnector::new(path))
            }),
            runner: Arc::new(UnconfiguredRunner),
        }
    }

    /// Use a different provider connector for new instances
    pub fn with_connector(
        mut self,
        factory: impl Fn(&Path) -> Arc<dyn Connector> + Send + Sync + 'static,
    ) -> Self {
        self.connector = Arc::new(factory);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn TurnRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Return the instance for `desc.path`, creating it on first use.
    pub async fn create(&self, desc: InstanceDescriptor) -> Result<Arc<Instance>> {
        if desc.path.as_os_str().is_empty() {
            return Err(HearthError::InvalidRequest("path is required".into()));
        }
        let path = paths::canonical_workspace_path(&desc.path);
        if !path.is_dir() {
            return Err(HearthError::InvalidRequest(format!(
                "not a directory: {}",
                path.display()
            )));
        }
        let id = instance_id(&path);

        if let Some(existing) = self.get(&id) {
            return Ok(existing);
        }

        let instance = Arc::new(self.build(id.clone(), path, &desc).await?);

        let (instance, inserted) = match self.instances.write().entry(id) {
            Entry::Occupied(e) => (Arc::clone(e.get()), false),
            Entry::Vacant(v) => {
                v.insert(Arc::clone(&instance));
                (instance, true)
            }
        };

        if inserted {
            instance.start();
        }
        Ok(instance)
    }

    async fn build(&self, id: String, path: PathBuf, desc: &InstanceDescriptor) -> Result<Instance> {
        let config = Config::load(&path)?;
        let data_dir = config.data_dir(&path, desc.data_dir.as_deref());
        prepare_data_dir(&data_dir)?;

        let debug = desc.debug || config.options.debug;
        let events = EventQueue::new();
        let background = BackgroundManager::with_retention(config.background_retention());
        let mcp = McpManager::new(
            config.mcp.clone(),
            (self.connector)(&path),
            events.clone(),
        );
        let permissions = Arc::new(PermissionService::new(
            events.clone(),
            config.permissions.allowed_tools.clone(),
            desc.yolo || config.permissions.skip_requests,
        ));
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(events.clone()));
        let hooks = HookExecutor::new(config.hooks.clone(), &path);

        let agent = Agent::new(
            &path,
            AgentServices {
                sessions: Arc::clone(&sessions),
                tools: Arc::new(ToolRegistry::with_builtin_tools().await),
                mcp: Arc::clone(&mcp),
                permissions: Arc::clone(&permissions),
                background: background.clone(),
                hooks,
                events: events.clone(),
                runner: Arc::clone(&self.runner),
            },
        );

        info!(id = %id, path = %path.display(), data_dir = %data_dir.display(), "Instance created");

        Ok(Instance {
            id,
            path,
            data_dir,
            debug,
            yolo: desc.yolo,
            config,
            events,
            background,
            mcp,
            permissions,
            sessions,
            lsp: Arc::new(NoLsp),
            agent,
            state: RwLock::new(InstanceState::Created),
        })
    }

    pub fn get(&self, id: &str) -> Option<Arc<Instance>> {
        self.instances.read().get(id).cloned()
    }

    pub fn require(&self, id: &str) -> Result<Arc<Instance>> {
        self.get(id)
            .ok_or_else(|| HearthError::InstanceNotFound(id.to_string()))
    }

    /// Instances sorted by path
    pub fn list(&self) -> Vec<Arc<Instance>> {
        let mut all: Vec<Arc<Instance>> = self.instances.read().values().cloned().collect();
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.read().is_empty()
    }

    /// Unregister an instance and shut it down in the background
    pub fn delete(&self, id: &str) -> Result<()> {
        let instance = self
            .instances
            .write()
            .remove(id)
            .ok_or_else(|| HearthError::InstanceNotFound(id.to_string()))?;

        *instance.state.write() = InstanceState::Stopped;
        tokio::spawn(async move { instance.shutdown().await });
        info!(id = %id, "Instance deleted");
        Ok(())
    }

    /// Delete each id; unknown ids are skipped. Returns the deleted ids.
    pub fn delete_many(&self, ids: &[String]) -> Vec<String> {
        ids.iter()
            .filter(|id| match self.delete(id) {
                Ok(()) => true,
                Err(e) => {
                    warn!(id = %id, "Skipping delete: {}", e);
                    false
                }
            })
            .cloned()
            .collect()
    }

    /// Remove and shut down every instance, waiting for each
    pub async fn shutdown_all(&self) {
        let all: Vec<Arc<Instance>> = self.instances.write().drain().map(|(_, i)| i).collect();
        futures::future::join_all(all.iter().map(|i| i.shutdown())).await;
    }
}
