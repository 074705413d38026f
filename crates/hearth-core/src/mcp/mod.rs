//! Tool providers
//!
//! JSON-RPC clients over stdio, streamable HTTP and SSE, and the manager
//! that owns their lifecycle.

mod client;
mod manager;
mod protocol;
mod tool;
pub mod transport;

pub use client::{McpClient, NotificationHandler, ToolClient, TOOL_CALL_TIMEOUT};
pub use manager::{Connector, McpConnector, McpManager};
pub use protocol::{format_mcp_result, McpContent, McpToolDef, McpToolResult, TOOLS_LIST_CHANGED};
pub use tool::{sync_tools, McpTool, MCP_TOOL_PREFIX};
