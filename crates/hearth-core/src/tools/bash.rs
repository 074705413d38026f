//! Shell tools: `bash`, `bash_output`, `bash_kill`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{parse_params, Tool, ToolContext, ToolResult};
use crate::error::HearthError;
use crate::permission::NewPermissionRequest;
use crate::shell::{block_commands, BlockFunc, ExecOptions, Shell, DEFAULT_BANNED_COMMANDS};

const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const MAX_TIMEOUT_MS: u64 = 600_000;
const MAX_OUTPUT_BYTES: usize = 30_000;
const NO_OUTPUT: &str = "no output";

/// Block rules applied to every agent-issued command
pub fn default_block_funcs() -> Vec<BlockFunc> {
    vec![block_commands(DEFAULT_BANNED_COMMANDS)]
}

/// Keep the tail of the output, on a char boundary
fn truncate_output(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.to_string();
    }
    let mut start = text.len() - MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("[... output truncated ...]\n{}", &text[start..])
}

fn join_streams(stdout: &str, stderr: &str) -> String {
    [stdout, stderr]
        .iter()
        .map(|s| s.trim_end())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct BashTool {
    block_funcs: Vec<BlockFunc>,
}

impl Default for BashTool {
    fn default() -> Self {
        Self {
            block_funcs: default_block_funcs(),
        }
    }
}

impl BashTool {
    pub fn new(block_funcs: Vec<BlockFunc>) -> Self {
        Self { block_funcs }
    }
}

#[derive(Deserialize)]
struct BashParams {
    command: String,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    run_in_background: bool,
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace. Set run_in_background:true for \
         servers, watchers and long builds, then poll with bash_output."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in milliseconds (max 600000)"
                },
                "description": {
                    "type": "string",
                    "description": "What this command does in 5-10 words"
                },
                "run_in_background": {
                    "type": "boolean",
                    "description": "Run without waiting; returns a shell ID"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let raw = params.clone();
        let params = match parse_params::<BashParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };

        tracing::info!(
            command = %params.command,
            background = params.run_in_background,
            "Executing bash command"
        );

        if let Some(permissions) = &ctx.permissions {
            let request = NewPermissionRequest {
                session_id: ctx.session_id.clone(),
                tool_call_id: ctx.tool_call_id.clone(),
                tool_name: self.name().to_string(),
                action: "execute".to_string(),
                description: params
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("Execute command: {}", params.command)),
                params: raw,
                path: ctx.working_dir.clone(),
            };
            if let Err(e) = permissions.request(request).await {
                return ToolResult::error(e);
            }
        }

        if params.run_in_background {
            let task = ctx.background.start(
                &ctx.working_dir,
                self.block_funcs.clone(),
                params.command.as_str(),
            );
            return ToolResult::success(format!(
                "Background shell started with ID: {}\n\nUse bash_output to read its output and bash_kill to stop it.",
                task.id()
            ));
        }

        let timeout_ms = params.timeout.unwrap_or(DEFAULT_TIMEOUT_MS).min(MAX_TIMEOUT_MS);
        let shell = Shell::new(&ctx.working_dir).with_block_funcs(self.block_funcs.clone());
        let output = match shell
            .exec(
                &params.command,
                ExecOptions {
                    timeout: Some(Duration::from_millis(timeout_ms)),
                    ..Default::default()
                },
                &ctx.cancel,
            )
            .await
        {
            Ok(output) => output,
            Err(e) => return ToolResult::error(format!("Failed to run command: {:#}", e)),
        };

        if let Some(reason) = output.blocked {
            return ToolResult::error(reason);
        }

        let mut text = join_streams(&output.stdout, &output.stderr);
        if let Some(problem) = output.error_message() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&format!("Command failed: {}", problem));
            return ToolResult::error(truncate_output(&text));
        }
        if text.is_empty() {
            text = NO_OUTPUT.to_string();
        }
        ToolResult::success(truncate_output(&text))
    }
}

#[derive(Deserialize)]
struct ShellIdParams {
    shell_id: String,
}

fn shell_id_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "shell_id": {
                "type": "string",
                "description": description
            }
        },
        "required": ["shell_id"],
        "additionalProperties": false
    })
}

pub struct BashOutputTool;

#[async_trait]
impl Tool for BashOutputTool {
    fn name(&self) -> &str {
        "bash_output"
    }

    fn description(&self) -> &str {
        "Read the current output of a background shell. Never waits for the \
         command; call again to see more output."
    }

    fn parameters_schema(&self) -> Value {
        shell_id_schema("ID returned by bash with run_in_background")
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<ShellIdParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if params.shell_id.is_empty() {
            return ToolResult::error("missing shell_id");
        }

        let snapshot = match ctx.background.output(&params.shell_id) {
            Ok(s) => s,
            Err(e) => return ToolResult::error(e),
        };

        let mut output = join_streams(&snapshot.stdout, &snapshot.stderr);
        let status = if snapshot.done {
            if let Some(code) = snapshot.exit_code.filter(|c| *c != 0) {
                if !output.is_empty() {
                    output.push('\n');
                }
                output.push_str(&format!("Exit code {}", code));
            }
            "completed"
        } else {
            "running"
        };
        if output.is_empty() {
            output = NO_OUTPUT.to_string();
        }

        ToolResult::success(format!(
            "Shell ID: {}\nStatus: {}\n\nOutput:\n{}",
            params.shell_id,
            status,
            truncate_output(&output)
        ))
    }
}

pub struct BashKillTool;

#[async_trait]
impl Tool for BashKillTool {
    fn name(&self) -> &str {
        "bash_kill"
    }

    fn description(&self) -> &str {
        "Stop a background shell and forget it. The shell ID is invalid afterwards."
    }

    fn parameters_schema(&self) -> Value {
        shell_id_schema("ID of the background shell to stop")
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> ToolResult {
        let params = match parse_params::<ShellIdParams>(params) {
            Ok(p) => p,
            Err(e) => return e,
        };
        if params.shell_id.is_empty() {
            return ToolResult::error("missing shell_id");
        }

        match ctx.background.kill(&params.shell_id).await {
            Ok(()) => ToolResult::success(format!(
                "Background shell {} terminated successfully",
                params.shell_id
            )),
            Err(e @ HearthError::TaskNotFound(_)) => ToolResult::error(e),
            Err(e) => ToolResult::error(format!("Failed to kill {}: {}", params.shell_id, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::BackgroundManager;

    fn ctx(dir: &std::path::Path) -> ToolContext {
        ToolContext::new(dir, BackgroundManager::new())
    }

    fn shell_id(start_output: &str) -> String {
        start_output
            .lines()
            .next()
            .and_then(|l| l.rsplit(' ').next())
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn foreground_command_returns_output() {
        let dir = tempfile::tempdir().unwrap();
        let result = BashTool::default()
            .execute(json!({"command": "echo hello"}), &ctx(dir.path()))
            .await;
        assert!(!result.is_error, "{}", result.output);
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn failing_command_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = BashTool::default()
            .execute(json!({"command": "echo oops >&2; exit 3"}), &ctx(dir.path()))
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("oops"));
        assert!(result.output.contains("exit status 3"));
    }

    #[tokio::test]
    async fn banned_command_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let result = BashTool::default()
            .execute(json!({"command": "curl http://example.com"}), &ctx(dir.path()))
            .await;
        assert!(result.is_error);
        assert!(result.output.contains("curl"));
    }

    #[tokio::test]
    async fn background_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());

        let started = BashTool::default()
            .execute(
                json!({"command": "echo ready; sleep 30", "run_in_background": true}),
                &ctx,
            )
            .await;
        assert!(!started.is_error);
        let id = shell_id(&started.output);

        let mut seen = String::new();
        for _ in 0..50 {
            seen = BashOutputTool
                .execute(json!({"shell_id": id}), &ctx)
                .await
                .output;
            if seen.contains("ready") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(seen.starts_with(&format!("Shell ID: {}\nStatus: running\n\nOutput:\n", id)));
        assert!(seen.contains("ready"));

        let killed = BashKillTool.execute(json!({"shell_id": id}), &ctx).await;
        assert!(!killed.is_error);

        let gone = BashOutputTool.execute(json!({"shell_id": id}), &ctx).await;
        assert!(gone.is_error);
        assert!(gone.output.contains("background shell not found"));
    }

    #[tokio::test]
    async fn completed_status_includes_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx(dir.path());
        let task = ctx.background.start(dir.path(), vec![], "exit 4");
        task.wait().await;

        let out = BashOutputTool
            .execute(json!({"shell_id": task.id()}), &ctx)
            .await;
        assert!(out.output.contains("Status: completed"));
        assert!(out.output.ends_with("Exit code 4"));
    }

    #[test]
    fn long_output_keeps_the_tail() {
        let text = "x".repeat(MAX_OUTPUT_BYTES + 10) + "END";
        let truncated = truncate_output(&text);
        assert!(truncated.starts_with("[... output truncated ...]"));
        assert!(truncated.ends_with("END"));
    }
}
