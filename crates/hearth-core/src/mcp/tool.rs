//! Provider tools as agent tools

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::manager::McpManager;
use super::protocol::{format_mcp_result, McpToolDef};
use crate::error::HearthError;
use crate::permission::NewPermissionRequest;
use crate::tools::{Tool, ToolContext, ToolRegistry, ToolResult};

/// Prefix of every provider tool name
pub const MCP_TOOL_PREFIX: &str = "mcp_";

pub struct McpTool {
    provider: String,
    tool_name: String,
    full_name: String,
    definition: McpToolDef,
    manager: Arc<McpManager>,
}

impl McpTool {
    pub fn new(provider: String, definition: McpToolDef, manager: Arc<McpManager>) -> Self {
        let tool_name = definition.name.clone();
        let full_name = format!("{}{}_{}", MCP_TOOL_PREFIX, provider, tool_name);
        Self {
            provider,
            tool_name,
            full_name,
            definition,
            manager,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        self.definition
            .description
            .as_deref()
            .unwrap_or("Tool provided by an external provider")
    }

    fn parameters_schema(&self) -> Value {
        self.definition.input_schema.clone()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        if let Some(permissions) = &ctx.permissions {
            let request = NewPermissionRequest {
                session_id: ctx.session_id.clone(),
                tool_call_id: ctx.tool_call_id.clone(),
                tool_name: self.full_name.clone(),
                action: "execute".to_string(),
                description: format!(
                    "Call {} from tool provider {}",
                    self.tool_name, self.provider
                ),
                params: params.clone(),
                path: ctx.working_dir.clone(),
            };
            if let Err(e) = permissions.request(request).await {
                return ToolResult::error(e);
            }
        }

        match self
            .manager
            .call_tool(&self.provider, &self.tool_name, params)
            .await
        {
            Ok(result) => ToolResult {
                output: format_mcp_result(&result),
                is_error: result.is_error,
            },
            Err(e @ HearthError::PermissionDenied) => ToolResult::error(e),
            Err(e) => ToolResult::error(format!("Tool provider error: {}", e)),
        }
    }
}

/// Replace the provider tools in `registry` with the currently published set
pub async fn sync_tools(registry: &ToolRegistry, manager: &Arc<McpManager>) -> usize {
    let tools: Vec<Arc<dyn Tool>> = manager
        .tools()
        .await
        .into_iter()
        .map(|(provider, definition)| {
            Arc::new(McpTool::new(provider, definition, Arc::clone(manager))) as Arc<dyn Tool>
        })
        .collect();
    let count = tools.len();
    registry.replace_prefixed(MCP_TOOL_PREFIX, tools).await;
    count
}
