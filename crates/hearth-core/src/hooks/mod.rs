//! User-configured hooks
//!
//! Hooks are shell commands run at lifecycle checkpoints. Configuration maps
//! an event type to an ordered list of matchers, each with an ordered list
//! of commands:
//!
//! ```json
//! "hooks": {
//!   "PreToolUse": [
//!     { "matcher": "edit|write", "hooks": [{ "type": "command", "command": "./check.sh", "timeout": 10 }] }
//!   ]
//! }
//! ```
//!
//! Each command gets the [`HookContext`] as JSON on stdin and in
//! `HEARTH_HOOK_CONTEXT`. The first failing command aborts the run.

mod executor;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use executor::{matcher_applies, HookExecutor};

/// Default per-command timeout
pub const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 30;
/// Upper bound for a configured timeout
pub const MAX_HOOK_TIMEOUT_SECS: u64 = 300;

/// Lifecycle checkpoints that can trigger hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HookEventType {
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    Notification,
    Stop,
    SubagentStop,
    PreCompact,
    SessionStart,
    SessionEnd,
}

impl HookEventType {
    pub fn all() -> &'static [HookEventType] {
        &[
            HookEventType::PreToolUse,
            HookEventType::PostToolUse,
            HookEventType::UserPromptSubmit,
            HookEventType::Notification,
            HookEventType::Stop,
            HookEventType::SubagentStop,
            HookEventType::PreCompact,
            HookEventType::SessionStart,
            HookEventType::SessionEnd,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            HookEventType::PreToolUse => "PreToolUse",
            HookEventType::PostToolUse => "PostToolUse",
            HookEventType::UserPromptSubmit => "UserPromptSubmit",
            HookEventType::Notification => "Notification",
            HookEventType::Stop => "Stop",
            HookEventType::SubagentStop => "SubagentStop",
            HookEventType::PreCompact => "PreCompact",
            HookEventType::SessionStart => "SessionStart",
            HookEventType::SessionEnd => "SessionEnd",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|e| e.display_name() == s)
    }

    /// Events whose matcher is compared against a tool name
    pub fn is_tool_event(&self) -> bool {
        matches!(self, HookEventType::PreToolUse | HookEventType::PostToolUse)
    }
}

impl std::fmt::Display for HookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

fn default_hook_type() -> String {
    "command".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hook {
    /// Only `command` is supported
    #[serde(rename = "type", default = "default_hook_type")]
    pub hook_type: String,
    pub command: String,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Hook {
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            hook_type: default_hook_type(),
            command: command.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Some(secs);
        self
    }

    pub fn effective_timeout(&self) -> Duration {
        let secs = match self.timeout {
            Some(0) | None => DEFAULT_HOOK_TIMEOUT_SECS,
            Some(t) => t.min(MAX_HOOK_TIMEOUT_SECS),
        };
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HookMatcher {
    /// Empty or `*` matches everything; otherwise `a|b|c` against tool names
    #[serde(default)]
    pub matcher: String,
    #[serde(default)]
    pub hooks: Vec<Hook>,
}

pub type HookConfig = BTreeMap<HookEventType, Vec<HookMatcher>>;

/// Snapshot handed to a hook command. Build with the `with_*` methods
/// before execution; the executor only reads it.
#[derive(Debug, Clone, Serialize)]
pub struct HookContext {
    pub event_type: HookEventType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub tool_input: Value,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tool_result: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub tool_error: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_prompt: String,
    pub timestamp: DateTime<Utc>,
    pub working_dir: PathBuf,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub provider: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub tokens_used: u64,
    #[serde(skip_serializing_if = "is_zero")]
    pub tokens_input: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub permission_action: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub permission_path: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub permission_params: Value,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub permission_tool_call: String,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl HookContext {
    pub fn new(event_type: HookEventType, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            event_type,
            session_id: String::new(),
            tool_name: String::new(),
            tool_input: Value::Null,
            tool_result: String::new(),
            tool_error: false,
            user_prompt: String::new(),
            timestamp: Utc::now(),
            working_dir: working_dir.into(),
            message_id: String::new(),
            provider: String::new(),
            model: String::new(),
            tokens_used: 0,
            tokens_input: 0,
            permission_action: String::new(),
            permission_path: String::new(),
            permission_params: Value::Null,
            permission_tool_call: String::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, input: Value) -> Self {
        self.tool_name = name.into();
        self.tool_input = input;
        self
    }

    pub fn with_tool_result(mut self, result: impl Into<String>, is_error: bool) -> Self {
        self.tool_result = result.into();
        self.tool_error = is_error;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.user_prompt = prompt.into();
        self
    }

    pub fn with_message(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    pub fn with_tokens(mut self, used: u64, input: u64) -> Self {
        self.tokens_used = used;
        self.tokens_input = input;
        self
    }

    pub fn with_permission(
        mut self,
        action: impl Into<String>,
        path: impl Into<String>,
        params: Value,
        tool_call: impl Into<String>,
    ) -> Self {
        self.permission_action = action.into();
        self.permission_path = path.into();
        self.permission_params = params;
        self.permission_tool_call = tool_call.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook command failed: {command}: exit status {exit_code} (stdout={stdout:?} stderr={stderr:?})")]
    Failed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("hook command timed out after {}s: {command}", timeout.as_secs())]
    TimedOut { command: String, timeout: Duration },

    #[error("hook execution cancelled")]
    Cancelled,

    #[error("unsupported hook type: {0}")]
    UnsupportedType(String),

    #[error("failed to run hook command {command}: {message}")]
    Spawn { command: String, message: String },

    #[error("failed to encode hook context: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_defaults_and_caps() {
        assert_eq!(Hook::command("x").effective_timeout(), Duration::from_secs(30));
        assert_eq!(
            Hook::command("x").with_timeout(5).effective_timeout(),
            Duration::from_secs(5)
        );
        assert_eq!(
            Hook::command("x").with_timeout(10_000).effective_timeout(),
            Duration::from_secs(MAX_HOOK_TIMEOUT_SECS)
        );
    }

    #[test]
    fn event_names_round_trip() {
        for event in HookEventType::all() {
            assert_eq!(HookEventType::parse(event.display_name()), Some(*event));
        }
        assert_eq!(HookEventType::parse("pre_tool_use"), None);
    }

    #[test]
    fn context_omits_empty_fields() {
        let ctx = HookContext::new(HookEventType::PostToolUse, "/w")
            .with_tool("edit", serde_json::json!({"path": "a.rs"}));
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["event_type"], "PostToolUse");
        assert_eq!(value["tool_name"], "edit");
        assert_eq!(value["tool_input"]["path"], "a.rs");
        assert!(value.get("session_id").is_none());
        assert!(value.get("tool_error").is_none());
    }

    #[test]
    fn hook_type_defaults_to_command() {
        let hook: Hook = serde_json::from_str(r#"{"command":"true"}"#).unwrap();
        assert_eq!(hook.hook_type, "command");
    }
}
