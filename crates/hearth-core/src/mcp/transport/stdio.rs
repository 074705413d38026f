//! Newline-delimited JSON over a child process's stdin/stdout

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::Transport;

pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Child>,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        working_dir: &Path,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("stdio provider has no command"));
        }
        tracing::info!("Spawning tool provider: {} {:?}", command, args);
        for key in env.keys() {
            tracing::debug!("  env {}=<set>", key);
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .current_dir(working_dir)
            .envs(env)
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                anyhow!(
                    "Command not found: {}. Is it installed and in PATH?",
                    command
                )
            } else {
                anyhow!("Failed to spawn {}: {}", command, e)
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("No stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| anyhow!("No stdout"))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(child),
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(message.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        tracing::trace!("Sent: {}", message);
        Ok(())
    }

    async fn receive(&self) -> Result<String> {
        let mut stdout = self.stdout.lock().await;

        loop {
            let mut line = String::new();
            let bytes = stdout.read_line(&mut line).await?;

            if bytes == 0 {
                let mut child = self.child.lock().await;
                return Err(match child.try_wait() {
                    Ok(Some(status)) => anyhow!("provider exited with {}", status),
                    Ok(None) => anyhow!("provider closed stdout unexpectedly"),
                    Err(e) => anyhow!("error checking provider status: {}", e),
                });
            }

            let line = line.trim();
            if line.starts_with('{') {
                tracing::trace!("Received: {}", line);
                return Ok(line.to_string());
            }
            if !line.is_empty() {
                // Providers sometimes log to stdout
                tracing::debug!("Skipping non-JSON line: {}", line);
            }
        }
    }

    async fn is_alive(&self) -> bool {
        let mut child = self.child.lock().await;
        matches!(child.try_wait(), Ok(None))
    }

    async fn close(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::debug!("Provider already exited: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echoes_json_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        let transport = StdioTransport::spawn(
            "sh",
            &[
                "-c".to_string(),
                "echo 'starting up'; while read line; do echo \"$line\"; done".to_string(),
            ],
            &HashMap::new(),
            dir.path(),
        )
        .await
        .unwrap();

        transport.send(r#"{"jsonrpc":"2.0","id":1}"#).await.unwrap();
        let got = transport.receive().await.unwrap();
        assert_eq!(got, r#"{"jsonrpc":"2.0","id":1}"#);
        assert!(transport.is_alive().await);

        transport.close().await;
        assert!(transport.receive().await.is_err());
    }

    #[tokio::test]
    async fn missing_command_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = StdioTransport::spawn(
            "hearth-no-such-provider-binary",
            &[],
            &HashMap::new(),
            dir.path(),
        )
        .await
        .err()
        .unwrap();
        assert!(err.to_string().contains("Command not found"));
    }
}
