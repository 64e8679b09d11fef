//! sandgridd — the SandGrid control-plane daemon.
//!
//! Single binary that assembles all SandGrid subsystems:
//! - State store (redb)
//! - Scheduler + node registry
//! - Warm pool + replenish loop
//! - Executor client
//! - Session/execution lifecycle + result applier
//! - Heartbeat monitor / idle reaper
//! - REST API
//!
//! # Usage
//!
//! ```text
//! sandgridd serve --config /etc/sandgrid/config.toml
//! ```

mod config;
mod daemon;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::DaemonConfig;
use crate::daemon::Daemon;

#[derive(Parser)]
#[command(name = "sandgridd", about = "SandGrid control-plane daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane.
    Serve {
        /// Path to the TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sandgridd=debug,sandgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => DaemonConfig::load(&path)?,
                None => DaemonConfig::default(),
            };
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            serve(config).await
        }
    }
}

async fn serve(config: DaemonConfig) -> anyhow::Result<()> {
    info!("SandGrid daemon starting");

    let daemon = Daemon::init(&config).await?;
    let router = daemon.router();

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    daemon.shutdown().await;
    info!("SandGrid daemon stopped");
    Ok(())
}
