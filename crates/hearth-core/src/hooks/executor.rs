use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Hook, HookConfig, HookContext, HookError, HookEventType};
use crate::shell::{ExecOptions, Interrupt, Shell};

/// Does `matcher` select this invocation?
///
/// Empty and `*` always apply. For tool events the matcher is an exact
/// tool name or a `|`-separated alternation (case-sensitive, whitespace
/// around alternatives ignored). Other events only match empty or `*`.
pub fn matcher_applies(matcher: &str, event: HookEventType, tool_name: &str) -> bool {
    let matcher = matcher.trim();
    if matcher.is_empty() || matcher == "*" {
        return true;
    }
    if !event.is_tool_event() {
        return false;
    }
    matcher
        .split('|')
        .map(str::trim)
        .any(|alt| !alt.is_empty() && alt == tool_name)
}

/// Runs configured hooks sequentially with fail-fast semantics
#[derive(Clone, Default)]
pub struct HookExecutor {
    config: Arc<HookConfig>,
    working_dir: PathBuf,
}

impl HookExecutor {
    pub fn new(config: HookConfig, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: Arc::new(config),
            working_dir: working_dir.into(),
        }
    }

    pub fn has_hooks(&self, event: HookEventType) -> bool {
        self.config.get(&event).is_some_and(|m| !m.is_empty())
    }

    /// Run every applicable hook for `event`, in configured order.
    ///
    /// The first failure (non-zero exit, timeout, cancellation) stops the
    /// run and is returned; later hooks are skipped.
    pub async fn execute(
        &self,
        event: HookEventType,
        ctx: &HookContext,
        cancel: &CancellationToken,
    ) -> Result<(), HookError> {
        let Some(matchers) = self.config.get(&event) else {
            return Ok(());
        };

        for matcher in matchers {
            if cancel.is_cancelled() {
                return Err(HookError::Cancelled);
            }
            if !matcher_applies(&matcher.matcher, event, &ctx.tool_name) {
                continue;
            }
            debug!(event = %event, matcher = %matcher.matcher, "Hook matcher applies");
            for hook in &matcher.hooks {
                self.run_hook(event, hook, ctx, cancel).await?;
            }
        }

        Ok(())
    }

    async fn run_hook(
        &self,
        event: HookEventType,
        hook: &Hook,
        ctx: &HookContext,
        cancel: &CancellationToken,
    ) -> Result<(), HookError> {
        if hook.hook_type != "command" {
            return Err(HookError::UnsupportedType(hook.hook_type.clone()));
        }

        let payload = serde_json::to_string(ctx)?;
        let timeout = hook.effective_timeout();
        let working_dir = if ctx.working_dir.as_os_str().is_empty() {
            self.working_dir.clone()
        } else {
            ctx.working_dir.clone()
        };

        let env = vec![
            ("HEARTH_HOOK_EVENT".to_string(), event.to_string()),
            ("HEARTH_HOOK_CONTEXT".to_string(), payload.clone()),
            ("HEARTH_SESSION_ID".to_string(), ctx.session_id.clone()),
            ("HEARTH_TOOL_NAME".to_string(), ctx.tool_name.clone()),
        ];

        let output = Shell::new(working_dir)
            .exec(
                &hook.command,
                ExecOptions {
                    stdin: Some(payload.into_bytes()),
                    timeout: Some(timeout),
                    env,
                    sink: None,
                },
                cancel,
            )
            .await
            .map_err(|e| HookError::Spawn {
                command: hook.command.clone(),
                message: format!("{:#}", e),
            })?;

        match output.interrupted {
            Some(Interrupt::TimedOut) => {
                warn!(event = %event, command = %hook.command, "Hook timed out");
                return Err(HookError::TimedOut {
                    command: hook.command.clone(),
                    timeout,
                });
            }
            Some(Interrupt::Cancelled) => return Err(HookError::Cancelled),
            None => {}
        }

        if output.exit_code != 0 {
            warn!(
                event = %event,
                command = %hook.command,
                exit_code = output.exit_code,
                "Hook failed"
            );
            return Err(HookError::Failed {
                command: hook.command.clone(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        info!(event = %event, command = %hook.command, "Hook completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookMatcher;
    use std::path::Path;
    use std::time::{Duration, Instant};

    fn config(event: HookEventType, matchers: Vec<HookMatcher>) -> HookConfig {
        let mut cfg = HookConfig::new();
        cfg.insert(event, matchers);
        cfg
    }

    fn matcher(pattern: &str, hooks: Vec<Hook>) -> HookMatcher {
        HookMatcher {
            matcher: pattern.to_string(),
            hooks,
        }
    }

    fn ctx(event: HookEventType, dir: &Path, tool: &str) -> HookContext {
        HookContext::new(event, dir)
            .with_session("sess-1")
            .with_tool(tool, serde_json::json!({"file_path": "main.rs"}))
    }

    #[test]
    fn alternation_matches_exact_names_only() {
        let ev = HookEventType::PreToolUse;
        for tool in ["edit", "write", "multiedit"] {
            assert!(matcher_applies("edit|write|multiedit", ev, tool));
        }
        for tool in ["bash", "Edit", "edi", "writer", ""] {
            assert!(!matcher_applies("edit|write|multiedit", ev, tool));
        }
        assert!(matcher_applies("edit | write", ev, "write"));
        assert!(matcher_applies(" edit ", ev, "edit"));
    }

    #[test]
    fn wildcard_and_empty_match_everything() {
        assert!(matcher_applies("", HookEventType::PostToolUse, "bash"));
        assert!(matcher_applies("*", HookEventType::PostToolUse, "bash"));
        assert!(matcher_applies("*", HookEventType::Stop, ""));
        assert!(matcher_applies("", HookEventType::UserPromptSubmit, ""));
    }

    #[test]
    fn non_tool_events_ignore_named_matchers() {
        assert!(!matcher_applies("bash", HookEventType::UserPromptSubmit, "bash"));
        assert!(!matcher_applies("edit|write", HookEventType::SessionStart, "edit"));
    }

    #[tokio::test]
    async fn no_hooks_is_noop() {
        let exec = HookExecutor::default();
        let dir = tempfile::tempdir().unwrap();
        exec.execute(
            HookEventType::PreToolUse,
            &ctx(HookEventType::PreToolUse, dir.path(), "bash"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn simple_command_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let exec = HookExecutor::new(
            config(
                HookEventType::PreToolUse,
                vec![matcher("bash", vec![Hook::command("echo ok")])],
            ),
            dir.path(),
        );
        exec.execute(
            HookEventType::PreToolUse,
            &ctx(HookEventType::PreToolUse, dir.path(), "bash"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn context_arrives_on_stdin_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("ctx.json");
        let command = format!(
            "cat > {} && test \"$HEARTH_TOOL_NAME\" = edit && test \"$HEARTH_HOOK_EVENT\" = PreToolUse",
            out.display()
        );
        let exec = HookExecutor::new(
            config(
                HookEventType::PreToolUse,
                vec![matcher("*", vec![Hook::command(command)])],
            ),
            dir.path(),
        );
        exec.execute(
            HookEventType::PreToolUse,
            &ctx(HookEventType::PreToolUse, dir.path(), "edit"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(written["tool_name"], "edit");
        assert_eq!(written["session_id"], "sess-1");
        assert_eq!(written["tool_input"]["file_path"], "main.rs");
    }

    #[tokio::test]
    async fn failed_command_reports_output() {
        let dir = tempfile::tempdir().unwrap();
        let exec = HookExecutor::new(
            config(
                HookEventType::PreToolUse,
                vec![matcher("", vec![Hook::command("echo nope >&2; exit 1")])],
            ),
            dir.path(),
        );
        let err = exec
            .execute(
                HookEventType::PreToolUse,
                &ctx(HookEventType::PreToolUse, dir.path(), "bash"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            HookError::Failed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr.trim(), "nope");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn first_failure_skips_later_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("second-ran");
        let exec = HookExecutor::new(
            config(
                HookEventType::PreToolUse,
                vec![
                    matcher(
                        "bash",
                        vec![
                            Hook::command("exit 7"),
                            Hook::command(format!("touch {}", marker.display())),
                        ],
                    ),
                    matcher("*", vec![Hook::command(format!("touch {}", marker.display()))]),
                ],
            ),
            dir.path(),
        );
        let err = exec
            .execute(
                HookEventType::PreToolUse,
                &ctx(HookEventType::PreToolUse, dir.path(), "bash"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Failed { exit_code: 7, .. }));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn timeout_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let exec = HookExecutor::new(
            config(
                HookEventType::PreToolUse,
                vec![matcher("", vec![Hook::command("sleep 10").with_timeout(1)])],
            ),
            dir.path(),
        );
        let start = Instant::now();
        let err = exec
            .execute(
                HookEventType::PreToolUse,
                &ctx(HookEventType::PreToolUse, dir.path(), "bash"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn non_matching_matcher_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let exec = HookExecutor::new(
            config(
                HookEventType::PreToolUse,
                vec![matcher("edit|write", vec![Hook::command("exit 1")])],
            ),
            dir.path(),
        );
        exec.execute(
            HookEventType::PreToolUse,
            &ctx(HookEventType::PreToolUse, dir.path(), "bash"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn multiple_hooks_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("order.log");
        let hooks = (1..=3)
            .map(|i| Hook::command(format!("echo {} >> {}", i, log.display())))
            .collect();
        let exec = HookExecutor::new(
            config(HookEventType::Stop, vec![matcher("", hooks)]),
            dir.path(),
        );
        exec.execute(
            HookEventType::Stop,
            &HookContext::new(HookEventType::Stop, dir.path()),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read_to_string(log).unwrap(), "1\n2\n3\n");
    }

    #[tokio::test]
    async fn cancelled_context_stops_before_next_matcher() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let exec = HookExecutor::new(
            config(
                HookEventType::PreToolUse,
                vec![matcher("", vec![Hook::command(format!("touch {}", marker.display()))])],
            ),
            dir.path(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = exec
            .execute(
                HookEventType::PreToolUse,
                &ctx(HookEventType::PreToolUse, dir.path(), "bash"),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::Cancelled));
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn unsupported_hook_type_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut hook = Hook::command("true");
        hook.hook_type = "prompt".into();
        let exec = HookExecutor::new(
            config(HookEventType::PreToolUse, vec![matcher("", vec![hook])]),
            dir.path(),
        );
        let err = exec
            .execute(
                HookEventType::PreToolUse,
                &ctx(HookEventType::PreToolUse, dir.path(), "bash"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HookError::UnsupportedType(t) if t == "prompt"));
    }

    #[tokio::test]
    async fn post_tool_use_appends_tool_names_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("tools.log");
        let exec = HookExecutor::new(
            config(
                HookEventType::PostToolUse,
                vec![matcher(
                    "*",
                    vec![Hook::command(format!(
                        "printf '%s\\n' \"$HEARTH_TOOL_NAME\" >> {}",
                        log.display()
                    ))],
                )],
            ),
            dir.path(),
        );

        for tool in ["edit", "write", "bash"] {
            exec.execute(
                HookEventType::PostToolUse,
                &ctx(HookEventType::PostToolUse, dir.path(), tool),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        }

        let content = std::fs::read_to_string(log).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines, vec!["edit", "write", "bash"]);
    }
}
