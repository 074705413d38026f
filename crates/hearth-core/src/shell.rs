//! Shell command runner
//!
//! Runs `sh -c` (or `cmd /C`) in its own process group so cancellation can
//! take down the whole tree. Used by background tasks and hooks.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Returns a refusal reason when a command must not run
pub type BlockFunc = Arc<dyn Fn(&[String]) -> Option<String> + Send + Sync>;

/// Exit code reported for a refused command
pub const BLOCKED_EXIT_CODE: i32 = 1;
/// Exit code reported when the run was cancelled
pub const CANCELLED_EXIT_CODE: i32 = 130;
/// Exit code reported when the run hit its timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const READ_CHUNK: usize = 8192;

/// Commands refused by the agent-facing bash tools
pub const DEFAULT_BANNED_COMMANDS: &[&str] = &[
    "curl", "wget", "nc", "telnet", "ssh", "scp", "sudo", "su", "doas",
];

/// Receives output as it is produced
pub trait OutputSink: Send + Sync {
    fn stdout(&self, chunk: &str);
    fn stderr(&self, chunk: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut,
}

#[derive(Debug, Clone, Default)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub interrupted: Option<Interrupt>,
    /// Set when a block rule refused the command
    pub blocked: Option<String>,
}

impl ShellOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.interrupted.is_none() && self.blocked.is_none()
    }

    /// Human-readable failure description, `None` on success
    pub fn error_message(&self) -> Option<String> {
        if let Some(reason) = &self.blocked {
            return Some(reason.clone());
        }
        match self.interrupted {
            Some(Interrupt::Cancelled) => Some("command cancelled".to_string()),
            Some(Interrupt::TimedOut) => Some("command timed out".to_string()),
            None if self.exit_code != 0 => Some(format!("exit status {}", self.exit_code)),
            None => None,
        }
    }
}

#[derive(Default)]
pub struct ExecOptions {
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub env: Vec<(String, String)>,
    pub sink: Option<Arc<dyn OutputSink>>,
}

#[derive(Clone)]
pub struct Shell {
    working_dir: PathBuf,
    block_funcs: Vec<BlockFunc>,
}

impl Shell {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            block_funcs: Vec::new(),
        }
    }

    pub fn with_block_funcs(mut self, block_funcs: Vec<BlockFunc>) -> Self {
        self.block_funcs = block_funcs;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Reason the command is refused, if any block rule applies
    pub fn check_blocked(&self, command: &str) -> Option<String> {
        if self.block_funcs.is_empty() {
            return None;
        }
        simple_commands(command).iter().find_map(|segment| {
            let words = shell_words::split(segment)
                .unwrap_or_else(|_| segment.split_whitespace().map(str::to_string).collect());
            self.block_funcs.iter().find_map(|f| f(&words))
        })
    }

    /// Run a command to completion, cancellation, or timeout.
    ///
    /// Non-zero exits, refusals and interruptions are reported in the
    /// returned [`ShellOutput`]; `Err` means the process could not be
    /// spawned or its pipes failed.
    pub async fn exec(
        &self,
        command: &str,
        opts: ExecOptions,
        cancel: &CancellationToken,
    ) -> Result<ShellOutput> {
        if let Some(reason) = self.check_blocked(command) {
            tracing::info!(command = %command, reason = %reason, "Command blocked");
            if let Some(sink) = &opts.sink {
                sink.stderr(&reason);
            }
            return Ok(ShellOutput {
                stderr: reason.clone(),
                exit_code: BLOCKED_EXIT_CODE,
                blocked: Some(reason),
                ..Default::default()
            });
        }

        let mut cmd = shell_command(command);
        cmd.current_dir(&self.working_dir)
            .stdin(if opts.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn shell for: {}", command))?;
        let pid = child.id();

        if let (Some(input), Some(mut stdin)) = (opts.stdin, child.stdin.take()) {
            tokio::spawn(async move {
                // A command that ignores stdin may close it early
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            });
        }

        let stdout = child.stdout.take().context("No stdout")?;
        let stderr = child.stderr.take().context("No stderr")?;
        let out_task = tokio::spawn(pump(stdout, opts.sink.clone(), false));
        let err_task = tokio::spawn(pump(stderr, opts.sink.clone(), true));

        let timeout = async {
            match opts.timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);
        let pumps = async {
            (
                out_task.await.unwrap_or_default(),
                err_task.await.unwrap_or_default(),
            )
        };
        tokio::pin!(pumps);

        let (status, mut interrupted) = tokio::select! {
            status = child.wait() => (Some(status?), None),
            _ = cancel.cancelled() => (None, Some(Interrupt::Cancelled)),
            _ = &mut timeout => (None, Some(Interrupt::TimedOut)),
        };

        // The shell is gone, but processes it left behind may still hold
        // the pipes open
        let mut collected = None;
        if interrupted.is_none() {
            tokio::select! {
                biased;
                output = &mut pumps => collected = Some(output),
                _ = cancel.cancelled() => interrupted = Some(Interrupt::Cancelled),
                _ = &mut timeout => interrupted = Some(Interrupt::TimedOut),
            }
        }

        if interrupted.is_some() {
            if let Some(pid) = pid {
                kill_process_group(pid);
            }
            if status.is_none() {
                let _ = child.kill().await;
                let _ = child.wait().await;
            }
        }

        let (stdout, stderr) = match collected {
            Some(output) => output,
            None => pumps.await,
        };

        let exit_code = match (interrupted, status) {
            (Some(Interrupt::TimedOut), _) => TIMEOUT_EXIT_CODE,
            (Some(Interrupt::Cancelled), _) => CANCELLED_EXIT_CODE,
            (None, Some(status)) => status.code().unwrap_or(-1),
            (None, None) => -1,
        };

        Ok(ShellOutput {
            stdout,
            stderr,
            exit_code,
            interrupted,
            blocked: None,
        })
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        #[cfg(unix)]
        {
            // Own process group so the whole tree can be signalled
            c.process_group(0);
        }
        c
    }
}

async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    sink: Option<Arc<dyn OutputSink>>,
    is_stderr: bool,
) -> String {
    let mut collected = String::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                if let Some(sink) = &sink {
                    if is_stderr {
                        sink.stderr(&chunk);
                    } else {
                        sink.stdout(&chunk);
                    }
                }
                collected.push_str(&chunk);
            }
        }
    }
    collected
}

/// Kill a process group created with `process_group(0)`
pub fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        // SAFETY: kill with a negative pid signals the process group; no
        // memory is touched and failure is reported through the return value
        let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
        if rc != 0 {
            tracing::debug!(pid, "Process group already gone");
        }
    }
    #[cfg(windows)]
    {
        // /T kills the process tree
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output();
    }
}

/// Split a command line into the simple commands a shell would run.
///
/// Control operators outside quotes end a command. The bodies of `$(..)`
/// and backtick substitutions come out as commands of their own, including
/// inside double quotes.
fn simple_commands(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    // (closing char, whether the enclosing text was double-quoted)
    let mut frames: Vec<(char, bool)> = Vec::new();
    let mut single = false;
    let mut double = false;

    fn flush(segments: &mut Vec<String>, current: &mut String) {
        let segment = current.trim();
        if !segment.is_empty() {
            segments.push(segment.to_string());
        }
        current.clear();
    }

    let mut chars = command.chars().peekable();
    while let Some(c) = chars.next() {
        if single {
            current.push(c);
            if c == '\'' {
                single = false;
            }
            continue;
        }
        let closes = frames.last().map(|f| f.0);
        let next = chars.peek().copied();
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '\'' if !double => {
                single = true;
                current.push(c);
            }
            '"' => {
                double = !double;
                current.push(c);
            }
            '`' if !double && closes == Some('`') => {
                flush(&mut segments, &mut current);
                if let Some((_, quoted)) = frames.pop() {
                    double = quoted;
                    if quoted {
                        current.push('"');
                    }
                }
            }
            ')' if !double && closes == Some(')') => {
                flush(&mut segments, &mut current);
                if let Some((_, quoted)) = frames.pop() {
                    double = quoted;
                    if quoted {
                        current.push('"');
                    }
                }
            }
            '`' | '$' if c == '`' || next == Some('(') => {
                if c == '$' {
                    chars.next();
                }
                if double {
                    current.push('"');
                }
                flush(&mut segments, &mut current);
                frames.push((if c == '`' { '`' } else { ')' }, double));
                double = false;
            }
            '|' | '&' | ';' | '(' | ')' | '\n' if !double => {
                flush(&mut segments, &mut current);
            }
            _ => current.push(c),
        }
    }
    flush(&mut segments, &mut current);
    segments
}

/// Refuse commands whose program name is listed. Leading `NAME=value`
/// assignments are skipped.
pub fn block_commands(banned: &[&str]) -> BlockFunc {
    let banned: Vec<String> = banned.iter().map(|s| s.to_string()).collect();
    Arc::new(move |words: &[String]| {
        let word = words.iter().find(|w| !is_assignment(w))?;
        let program = word.rsplit('/').next().unwrap_or(word);
        banned
            .iter()
            .any(|b| b == program)
            .then(|| format!("command is not allowed: {}", program))
    })
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !name.starts_with(|c: char| c.is_ascii_digit())
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<String>);

    impl OutputSink for Collect {
        fn stdout(&self, chunk: &str) {
            self.0.lock().push_str(chunk);
        }
        fn stderr(&self, _chunk: &str) {}
    }

    fn shell() -> Shell {
        Shell::new(std::env::temp_dir())
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let out = shell()
            .exec(
                "echo hello; echo oops >&2; exit 3",
                ExecOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn feeds_stdin_and_env() {
        let out = shell()
            .exec(
                "cat; printf \"$GREETING\"",
                ExecOptions {
                    stdin: Some(b"from-stdin ".to_vec()),
                    env: vec![("GREETING".into(), "hi".into())],
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout, "from-stdin hi");
    }

    #[tokio::test]
    async fn streams_into_sink() {
        let sink = Arc::new(Collect::default());
        shell()
            .exec(
                "echo streamed",
                ExecOptions {
                    sink: Some(sink.clone()),
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(sink.0.lock().trim(), "streamed");
    }

    #[tokio::test]
    async fn timeout_interrupts_quickly() {
        let start = std::time::Instant::now();
        let out = shell()
            .exec(
                "sleep 10",
                ExecOptions {
                    timeout: Some(Duration::from_millis(200)),
                    ..Default::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(out.interrupted, Some(Interrupt::TimedOut));
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
    }

    #[tokio::test]
    async fn cancellation_keeps_partial_output() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });
        let out = shell()
            .exec("echo before; sleep 10", ExecOptions::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(out.interrupted, Some(Interrupt::Cancelled));
        assert_eq!(out.stdout.trim(), "before");
    }

    #[tokio::test]
    async fn blocked_command_reports_nonzero_without_spawning() {
        let sh = shell().with_block_funcs(vec![block_commands(&["curl"])]);
        let out = sh
            .exec(
                "echo hi | curl http://example.com",
                ExecOptions::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.exit_code, BLOCKED_EXIT_CODE);
        assert!(out.blocked.is_some());
        assert!(out.stdout.is_empty());
    }

    #[test]
    fn block_rule_checks_every_pipeline_stage() {
        let sh = shell().with_block_funcs(vec![block_commands(DEFAULT_BANNED_COMMANDS)]);
        assert!(sh.check_blocked("ls -la").is_none());
        assert!(sh.check_blocked("echo curl").is_none());
        assert!(sh.check_blocked("echo 'a; curl x'").is_none());
        assert!(sh.check_blocked("/usr/bin/wget x").is_some());
        assert!(sh.check_blocked("true && sudo rm -rf /").is_some());
        assert!(sh.check_blocked("PROXY=1 curl x").is_some());
        for command in [
            "echo hi|curl x",
            "true;curl x",
            "true&&curl x",
            "false||curl x",
            "sleep 1&curl x",
            "(curl x)",
            "echo $(curl x)",
            "echo \"got: $(curl x)\"",
            "echo `curl x`",
        ] {
            assert!(sh.check_blocked(command).is_some(), "{command}");
        }
    }

    #[test]
    fn substitutions_split_into_their_own_commands() {
        assert_eq!(
            simple_commands("echo \"a $(curl x) b\"; ls"),
            vec!["echo \"a \"", "curl x", "\" b\"", "ls"]
        );
        assert_eq!(simple_commands("echo 'x|y'"), vec!["echo 'x|y'"]);
    }

    #[tokio::test]
    async fn cancel_reaches_processes_left_holding_the_pipes() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });
        let out = tokio::time::timeout(
            Duration::from_secs(5),
            shell().exec("sleep 20 & echo hi", ExecOptions::default(), &cancel),
        )
        .await
        .expect("exec returned after cancel")
        .unwrap();
        assert_eq!(out.interrupted, Some(Interrupt::Cancelled));
        assert_eq!(out.exit_code, CANCELLED_EXIT_CODE);
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn timeout_applies_after_the_shell_exits() {
        let out = tokio::time::timeout(
            Duration::from_secs(5),
            shell().exec(
                "sleep 20 & true",
                ExecOptions {
                    timeout: Some(Duration::from_millis(300)),
                    ..Default::default()
                },
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("exec returned after timeout")
        .unwrap();
        assert_eq!(out.interrupted, Some(Interrupt::TimedOut));
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
    }
}
