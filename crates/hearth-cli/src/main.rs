//! Hearth - terminal front end for the agent runtime
//!
//! - `hearth server` runs the control-plane server on the per-user socket
//! - `hearth` attaches to the current directory's instance and streams events
//! - `hearth run <prompt>` sends one prompt and exits when the agent is idle

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use hearth_core::paths;

mod attach;
mod render;
mod serve;

/// Hearth - agent runtime
#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Terminal front end for the Hearth agent runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Control-plane socket path (named pipe on Windows)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Workspace directory (defaults to the current directory)
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Override the instance data directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Approve every permission request without asking
    #[arg(long)]
    yolo: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control-plane server until Ctrl-C
    Server,

    /// Send one prompt and exit once the agent is idle
    Run {
        /// Prompt text
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
}

fn log_level(debug: bool) -> tracing::Level {
    if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    }
}

/// Client modes log to a file so log lines never mix with rendered events
fn init_file_logging(debug: bool) -> Result<()> {
    let log_dir = paths::logs_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory: {}", e);
    }

    #[cfg(unix)]
    let null_device = "/dev/null";
    #[cfg(windows)]
    let null_device = "NUL";

    let log_file = match std::fs::File::create(log_dir.join("hearth.log")) {
        Ok(file) => file,
        Err(e) => {
            eprintln!(
                "Failed to create log file: {}, falling back to null device",
                e
            );
            std::fs::File::create(null_device)?
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(log_level(debug).into()),
        )
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let address = cli.host.clone().unwrap_or_else(paths::default_socket_address);

    let prompt = match cli.command {
        // Server mode has its own logging (stdout)
        Some(Commands::Server) => return serve::run(address, cli.debug).await,
        Some(Commands::Run { prompt }) => Some(prompt.join(" ")),
        None => None,
    };

    init_file_logging(cli.debug)?;

    let cwd = match cli.cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let options = attach::AttachOptions {
        address,
        cwd,
        data_dir: cli.data_dir,
        debug: cli.debug,
        yolo: cli.yolo,
    };

    match prompt {
        Some(prompt) => attach::run_prompt(options, &prompt).await,
        None => attach::run_interactive(options).await,
    }
}
