//! The model side of a turn

use async_trait::async_trait;

use super::executor::ToolExecutor;
use crate::proto::{Attachment, Message, MessageRole};
use crate::tools::ToolDefinition;

/// Everything a runner needs for one prompt
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub prompt: String,
    pub attachments: Vec<Attachment>,
    /// Prior messages, oldest first, including the new prompt
    pub history: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Drives the model. Tool calls go through the supplied [`ToolExecutor`] so
/// hooks and permissions apply to every one of them.
#[async_trait]
pub trait TurnRunner: Send + Sync {
    /// Run one turn and return the final assistant text
    async fn run_turn(&self, request: TurnRequest, tools: &ToolExecutor) -> anyhow::Result<String>;

    async fn summarize(&self, session_id: &str, messages: &[Message]) -> anyhow::Result<String>;
}

/// Runner used when no model is configured
#[derive(Debug, Default)]
pub struct UnconfiguredRunner;

pub const UNCONFIGURED_REPLY: &str = "No model is configured for this instance.";

#[async_trait]
impl TurnRunner for UnconfiguredRunner {
    async fn run_turn(&self, request: TurnRequest, _tools: &ToolExecutor) -> anyhow::Result<String> {
        tracing::debug!(session = %request.session_id, "Turn without a model");
        Ok(UNCONFIGURED_REPLY.to_string())
    }

    async fn summarize(&self, _session_id: &str, messages: &[Message]) -> anyhow::Result<String> {
        let prompts = messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .count();
        let last = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| crate::session::title_from_prompt(&m.content))
            .unwrap_or_default();
        Ok(if last.is_empty() {
            format!("{} messages", messages.len())
        } else {
            format!(
                "{} messages, {} prompts. Last prompt: {}",
                messages.len(),
                prompts,
                last
            )
        })
    }
}
