//! Client modes: attach to an instance, print its events, answer prompts
//!
//! The server is started detached when nobody is listening yet. Leaving
//! either mode deletes the instance this process attached to.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use hearth_core::proto::{
    AgentEventType, AgentMessage, EventPayload, InstanceDescriptor, PermissionAction,
    PermissionGrant, PermissionRequest, Session,
};
use hearth_server::{Client, EventStream};

use crate::render::render;

const SERVER_START_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AttachOptions {
    pub address: String,
    pub cwd: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub debug: bool,
    pub yolo: bool,
}

/// An attached instance with one session and an open event stream
struct Attached {
    client: Client,
    instance: InstanceDescriptor,
    session: Session,
    events: EventStream,
}

type StdinLines = Lines<BufReader<Stdin>>;

/// Return a client for a running server, starting one if needed
async fn connect(address: &str) -> Result<Client> {
    let client = Client::new(address);
    match client.health().await {
        Ok(health) => {
            tracing::debug!(version = %health.version, "Server already running");
            return Ok(client);
        }
        Err(e) if e.is_unreachable() => {}
        Err(e) => return Err(e.into()),
    }

    spawn_server(address)?;

    let deadline = tokio::time::Instant::now() + SERVER_START_TIMEOUT;
    loop {
        match client.health().await {
            Ok(_) => return Ok(client),
            Err(e) if tokio::time::Instant::now() >= deadline => {
                return Err(e).context("Server did not come up");
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
}

/// Launch `hearth server` detached from this terminal
fn spawn_server(address: &str) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate the hearth binary")?;
    let mut command = std::process::Command::new(exe);
    command
        .arg("server")
        .arg("--host")
        .arg(address)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group so a Ctrl-C here does not reach the server
        command.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const DETACHED_PROCESS: u32 = 0x0000_0008;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    }

    let child = command.spawn().context("Failed to start hearth server")?;
    tracing::info!(pid = child.id(), address, "Started server");
    Ok(())
}

async fn attach(options: &AttachOptions) -> Result<Attached> {
    let client = connect(&options.address).await?;
    let instance = client
        .create_instance(&InstanceDescriptor {
            path: options.cwd.clone(),
            data_dir: options.data_dir.clone(),
            debug: options.debug,
            yolo: options.yolo,
            ..Default::default()
        })
        .await?;
    let events = client.subscribe_events(&instance.id).await?;
    let session = client.create_session(&instance.id, None).await?;

    tracing::info!(instance = %instance.id, session = %session.id, "Attached");
    Ok(Attached {
        client,
        instance,
        session,
        events,
    })
}

impl Attached {
    async fn detach(self) {
        drop(self.events);
        match self.client.delete_instance(&self.instance.id).await {
            Ok(()) => tracing::info!(instance = %self.instance.id, "Detached"),
            Err(e) if e.is_not_found() => {}
            Err(e) => tracing::warn!(instance = %self.instance.id, "Failed to delete instance: {}", e),
        }
    }

    async fn send(&self, prompt: &str) -> Result<()> {
        self.client
            .send_prompt(
                &self.instance.id,
                &AgentMessage {
                    session_id: self.session.id.clone(),
                    prompt: prompt.to_string(),
                    attachments: Vec::new(),
                },
            )
            .await?;
        Ok(())
    }

    async fn answer(&self, request_id: &str, action: PermissionAction) -> Result<()> {
        self.client
            .grant_permission(
                &self.instance.id,
                &PermissionGrant {
                    request_id: request_id.to_string(),
                    action,
                },
            )
            .await?;
        Ok(())
    }

    /// Handle one typed line. Returns false to leave.
    async fn command(&self, line: &str) -> Result<bool> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(true);
        }
        if !line.starts_with('/') {
            self.send(line).await?;
            return Ok(true);
        }

        let (cmd, arg) = match line.split_once(char::is_whitespace) {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line, ""),
        };
        let id = &self.instance.id;
        match cmd {
            "/quit" | "/exit" => return Ok(false),
            "/allow" => self.answer(arg, PermissionAction::Allow).await?,
            "/always" => self.answer(arg, PermissionAction::AllowSession).await?,
            "/deny" => self.answer(arg, PermissionAction::Deny).await?,
            "/cancel" => {
                if !self.client.cancel(id, &self.session.id).await? {
                    println!("nothing to cancel");
                }
            }
            "/queue" => {
                for prompt in self.client.queued_prompts(id, &self.session.id).await? {
                    println!("  {}", prompt);
                }
            }
            "/summarize" => {
                println!("{}", self.client.summarize(id, &self.session.id).await?);
            }
            "/tasks" => {
                for task in self.client.tasks(id).await? {
                    let status = if task.done { "completed" } else { "running" };
                    println!("  {}  {}  {}", task.id, status, task.command);
                }
            }
            "/kill" => {
                self.client.kill_task(id, arg).await?;
                println!("killed {}", arg);
            }
            "/mcp" => {
                for provider in self.client.mcp_providers(id).await? {
                    println!(
                        "  {}  {}  {} tools{}",
                        provider.name,
                        provider.state,
                        provider.tool_count,
                        provider
                            .error
                            .map(|e| format!("  ({})", e))
                            .unwrap_or_default()
                    );
                }
            }
            "/yolo" => {
                let skip = !self.client.skip_permissions(id).await?;
                self.client.set_skip_permissions(id, skip).await?;
                println!("auto-approve {}", if skip { "on" } else { "off" });
            }
            _ => print_help(),
        }
        Ok(true)
    }
}

fn print_help() {
    println!("  <text>            send a prompt");
    println!("  /allow <id>       allow a permission request once");
    println!("  /always <id>      allow for the rest of the session");
    println!("  /deny <id>        deny a permission request");
    println!("  /cancel           cancel the running turn and queued prompts");
    println!("  /queue            show queued prompts");
    println!("  /summarize        summarize the session");
    println!("  /tasks, /kill <id>  background shells");
    println!("  /mcp              tool provider status");
    println!("  /yolo             toggle auto-approve");
    println!("  /quit");
}

/// `hearth`: print events and forward typed lines until EOF or Ctrl-C
pub async fn run_interactive(options: AttachOptions) -> Result<()> {
    let mut attached = attach(&options).await?;
    println!(
        "Attached to {} (type a prompt, /help for commands)",
        attached.instance.path.display()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = attached.events.next() => match event {
                Some(envelope) => {
                    if let Some(text) = render(&envelope) {
                        println!("{}", text);
                    }
                }
                None => {
                    println!("Server closed the event stream");
                    break;
                }
            },
            line = lines.next_line() => match line? {
                Some(line) => match attached.command(&line).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("\x1b[31merror:\x1b[0m {}", e),
                },
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    attached.detach().await;
    Ok(())
}

/// Ask on stdin; anything but y/a denies
async fn ask(lines: &mut StdinLines, request: &PermissionRequest) -> Result<PermissionAction> {
    println!(
        "\x1b[1;33m[permission]\x1b[0m {} wants to {}: {}",
        request.tool_name, request.action, request.description
    );
    println!("  Allow? [y]es / [a]lways / [N]o");
    let answer = lines.next_line().await?.unwrap_or_default();
    Ok(match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => PermissionAction::Allow,
        "a" | "always" => PermissionAction::AllowSession,
        _ => PermissionAction::Deny,
    })
}

/// `hearth run`: one prompt, exit when the agent goes idle
pub async fn run_prompt(options: AttachOptions, prompt: &str) -> Result<()> {
    let mut attached = attach(&options).await?;
    attached.send(prompt).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut failure: Option<String> = None;
    loop {
        let envelope = tokio::select! {
            event = attached.events.next() => event,
            _ = tokio::signal::ctrl_c() => {
                failure = Some("interrupted".to_string());
                break;
            }
        };
        let Some(envelope) = envelope else {
            failure = Some("server closed the event stream".to_string());
            break;
        };

        match &envelope.payload {
            EventPayload::PermissionRequest(request)
                if request.session_id == attached.session.id =>
            {
                let action = ask(&mut lines, request).await?;
                attached.answer(&request.id, action).await?;
                continue;
            }
            EventPayload::Agent(e) if e.session_id == attached.session.id => match e.event_type {
                AgentEventType::Idle => break,
                AgentEventType::Error => {
                    failure = e.error.clone().or_else(|| Some("turn failed".to_string()))
                }
                _ => {}
            },
            _ => {}
        }
        if let Some(text) = render(&envelope) {
            println!("{}", text);
        }
    }

    attached.detach().await;
    match failure {
        Some(reason) => bail!(reason),
        None => Ok(()),
    }
}
