//! Tool execution for agent turns
//!
//! Every call is wrapped by the `PreToolUse` and `PostToolUse` hooks. A
//! failing pre hook blocks the call and its message becomes the tool error;
//! a failing post hook is only logged.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::hooks::{HookContext, HookEventType, HookExecutor};
use crate::proto::MessageRole;
use crate::session::SessionStore;
use crate::tools::{ToolContext, ToolDefinition, ToolRegistry, ToolResult};

/// A tool call requested by the model
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    hooks: HookExecutor,
    sessions: Arc<dyn SessionStore>,
    ctx: ToolContext,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        hooks: HookExecutor,
        sessions: Arc<dyn SessionStore>,
        ctx: ToolContext,
    ) -> Self {
        Self {
            registry,
            hooks,
            sessions,
            ctx,
        }
    }

    pub async fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions().await
    }

    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let ctx = self
            .ctx
            .clone()
            .with_call(self.ctx.session_id.clone(), call.id.clone());

        let hook_ctx = HookContext::new(HookEventType::PreToolUse, &ctx.working_dir)
            .with_session(&ctx.session_id)
            .with_tool(&call.name, call.input.clone());

        if let Err(e) = self
            .hooks
            .execute(HookEventType::PreToolUse, &hook_ctx, &ctx.cancel)
            .await
        {
            info!(tool = %call.name, "Tool call blocked by hook: {}", e);
            return ToolResult::error(format!("Blocked by PreToolUse hook: {}", e));
        }

        let result = self
            .registry
            .execute(&call.name, call.input.clone(), &ctx)
            .await;

        let post_ctx = HookContext::new(HookEventType::PostToolUse, &ctx.working_dir)
            .with_session(&ctx.session_id)
            .with_tool(&call.name, call.input.clone())
            .with_tool_result(&result.output, result.is_error);
        if let Err(e) = self
            .hooks
            .execute(HookEventType::PostToolUse, &post_ctx, &ctx.cancel)
            .await
        {
            warn!(tool = %call.name, "PostToolUse hook failed: {}", e);
        }

        if let Err(e) = self
            .sessions
            .add_message(
                &ctx.session_id,
                MessageRole::Tool,
                &result.output,
                Some(&call.name),
            )
            .await
        {
            warn!(tool = %call.name, "Failed to record tool result: {}", e);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventQueue;
    use crate::hooks::{Hook, HookConfig, HookMatcher};
    use crate::process::BackgroundManager;
    use crate::session::MemorySessionStore;
    use serde_json::json;

    async fn executor(config: HookConfig, dir: &std::path::Path) -> (ToolExecutor, Arc<dyn SessionStore>, String) {
        let sessions: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(EventQueue::new()));
        let session = sessions.create("t").await.unwrap();
        let registry = Arc::new(ToolRegistry::with_builtin_tools().await);
        let ctx = ToolContext::new(dir, BackgroundManager::new()).with_call(&session.id, "");
        let exec = ToolExecutor::new(
            registry,
            HookExecutor::new(config, dir),
            Arc::clone(&sessions),
            ctx,
        );
        (exec, sessions, session.id)
    }

    fn hooks(event: HookEventType, matcher: &str, command: &str) -> HookConfig {
        let mut config = HookConfig::new();
        config.insert(
            event,
            vec![HookMatcher {
                matcher: matcher.into(),
                hooks: vec![Hook::command(command)],
            }],
        );
        config
    }

    fn call(command: &str) -> ToolCall {
        ToolCall {
            id: "call-1".into(),
            name: "bash".into(),
            input: json!({"command": command}),
        }
    }

    #[tokio::test]
    async fn failing_pre_hook_blocks_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let (exec, _, _) = executor(
            hooks(HookEventType::PreToolUse, "bash", "echo no bash today >&2; exit 2"),
            dir.path(),
        )
        .await;

        let result = exec
            .execute(&call(&format!("touch {}", marker.display())))
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("no bash today"));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn non_matching_pre_hook_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let (exec, _, _) = executor(
            hooks(HookEventType::PreToolUse, "edit|write", "exit 1"),
            dir.path(),
        )
        .await;
        let result = exec.execute(&call("echo fine")).await;
        assert!(!result.is_error, "{}", result.output);
    }

    #[tokio::test]
    async fn failing_post_hook_keeps_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let (exec, sessions, session_id) = executor(
            hooks(HookEventType::PostToolUse, "*", "exit 1"),
            dir.path(),
        )
        .await;

        let result = exec.execute(&call("echo done")).await;
        assert!(!result.is_error);
        assert_eq!(result.output, "done");

        let messages = sessions.messages(&session_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].tool_name.as_deref(), Some("bash"));
    }

    #[tokio::test]
    async fn post_hook_sees_the_tool_result() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("post.json");
        let (exec, _, _) = executor(
            hooks(
                HookEventType::PostToolUse,
                "bash",
                &format!("cat > {}", out.display()),
            ),
            dir.path(),
        )
        .await;

        exec.execute(&call("echo payload")).await;
        let written: Value = serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["event_type"], "PostToolUse");
        assert_eq!(written["tool_result"], "payload");
    }
}
