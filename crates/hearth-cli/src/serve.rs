//! `hearth server` - the control-plane server in the foreground

use anyhow::Result;

use hearth_server::{ServerConfig, SHUTDOWN_GRACE};

pub async fn run(address: String, debug: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(crate::log_level(debug).into()),
        )
        .init();

    print_banner(&address);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
        println!(
            "\n  Shutting down (up to {}s)...",
            SHUTDOWN_GRACE.as_secs()
        );
    };

    hearth_server::start_server(ServerConfig { address }, shutdown_signal).await
}

fn print_banner(address: &str) {
    println!();
    println!("  \x1b[1;36mHearth\x1b[0m server v{}", env!("CARGO_PKG_VERSION"));
    println!("  ─────────────────────────────────────");
    println!("  Socket: {}", address);
    println!();
}
