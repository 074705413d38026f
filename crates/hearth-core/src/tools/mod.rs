//! Agent-facing tools
//!
//! Built-in tools (background shells) and tool-provider tools share the
//! [`Tool`] trait and live in one [`ToolRegistry`].

mod bash;

pub use bash::{default_block_funcs, BashKillTool, BashOutputTool, BashTool};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::permission::PermissionService;
use crate::process::BackgroundManager;

/// Default tool execution timeout (2 minutes)
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            output: msg.to_string(),
            is_error: true,
        }
    }

    pub fn invalid_parameters(msg: impl std::fmt::Display) -> Self {
        Self::error(format!("Invalid parameters: {}", msg))
    }
}

/// Parse tool parameters, returning a ToolResult error on failure
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ToolResult> {
    serde_json::from_value(params).map_err(ToolResult::invalid_parameters)
}

/// Name, description and input schema as advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Context for tool execution
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub session_id: String,
    pub tool_call_id: String,
    pub background: BackgroundManager,
    pub permissions: Option<Arc<PermissionService>>,
    pub cancel: CancellationToken,
    /// Optional per-call timeout override
    pub timeout: Option<Duration>,
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>, background: BackgroundManager) -> Self {
        Self {
            working_dir: working_dir.into(),
            session_id: String::new(),
            tool_call_id: String::new(),
            background,
            permissions: None,
            cancel: CancellationToken::new(),
            timeout: None,
        }
    }

    pub fn with_call(mut self, session_id: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self.tool_call_id = tool_call_id.into();
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<PermissionService>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve a path relative to working directory (absolute paths pass through)
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let p = PathBuf::from(path);
        if p.is_absolute() {
            p
        } else {
            self.working_dir.join(p)
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult;
}

pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    default_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Registry holding the background shell tools
    pub async fn with_builtin_tools() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(BashTool::default())).await;
        registry.register(Arc::new(BashOutputTool)).await;
        registry.register(Arc::new(BashKillTool)).await;
        registry
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.write().await.insert(name, tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Swap every tool named with `prefix` for `replacements` under one
    /// write lock, so readers see either the old set or the new one
    pub async fn replace_prefixed(&self, prefix: &str, replacements: Vec<Arc<dyn Tool>>) {
        let mut tools = self.tools.write().await;
        let before = tools.len();
        tools.retain(|name, _| !name.starts_with(prefix));
        let removed = before - tools.len();
        let added = replacements.len();
        for tool in replacements {
            tools.insert(tool.name().to_string(), tool);
        }
        tracing::debug!(prefix, removed, added, "Replaced prefixed tools");
    }

    /// Definitions sorted by name
    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .await
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name under the context's timeout (or the default)
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(name).await else {
            return ToolResult::error(format!("Unknown tool: {}", name));
        };

        let timeout = ctx.timeout.unwrap_or(self.default_timeout);
        let start = std::time::Instant::now();
        let result = tokio::select! {
            res = tokio::time::timeout(timeout, tool.execute(params, ctx)) => match res {
                Ok(result) => result,
                Err(_) => ToolResult::error(format!(
                    "Tool '{}' timed out after {}s",
                    name,
                    timeout.as_secs()
                )),
            },
            _ = ctx.cancel.cancelled() => ToolResult::error("Tool execution cancelled"),
        };

        tracing::debug!(
            tool = %name,
            duration_ms = start.elapsed().as_millis() as u64,
            is_error = result.is_error,
            "Tool executed"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ToolResult::success("done")
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(std::env::temp_dir(), BackgroundManager::new())
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", json!({}), &ctx()).await;
        assert!(result.is_error);
        assert!(result.output.contains("Unknown tool"));
    }

    #[tokio::test]
    async fn execution_honors_timeout() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool)).await;
        let mut ctx = ctx();
        ctx.timeout = Some(Duration::from_millis(50));
        let result = registry.execute("slow", json!({}), &ctx).await;
        assert!(result.is_error);
        assert!(result.output.contains("timed out"));
    }

    #[tokio::test]
    async fn execution_stops_on_cancel() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool)).await;
        let ctx = ctx();
        ctx.cancel.cancel();
        let result = registry.execute("slow", json!({}), &ctx).await;
        assert!(result.is_error);
        assert!(result.output.contains("cancelled"));
    }

    struct NamedTool(String);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            &self.0
        }
        fn description(&self) -> &str {
            "named"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> ToolResult {
            ToolResult::success(self.0.clone())
        }
    }

    fn named(names: &[&str]) -> Vec<Arc<dyn Tool>> {
        names
            .iter()
            .map(|n| Arc::new(NamedTool(n.to_string())) as Arc<dyn Tool>)
            .collect()
    }

    #[tokio::test]
    async fn replace_prefixed_leaves_other_tools_alone() {
        let registry = ToolRegistry::with_builtin_tools().await;
        registry.register(Arc::new(SlowTool)).await;
        registry.replace_prefixed("bash", named(&["bash_new"])).await;
        let names: Vec<String> = registry.definitions().await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["bash_new".to_string(), "slow".to_string()]);
    }

    #[tokio::test]
    async fn readers_never_see_a_half_replaced_set() {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .replace_prefixed("mcp_", named(&["mcp_a_x", "mcp_a_y"]))
            .await;

        let writer = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..200 {
                    registry
                        .replace_prefixed("mcp_", named(&["mcp_a_x", "mcp_a_y"]))
                        .await;
                    tokio::task::yield_now().await;
                }
            })
        };
        for _ in 0..200 {
            assert_eq!(registry.definitions().await.len(), 2);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}
