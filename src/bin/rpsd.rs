//! RPS Daemon - Lobby server for rock-paper-scissors-joker matches
//!
//! Clients connect over WebSocket with a `/<method>/<lobby>/<client>`
//! path and play best-of rounds against one other participant.
//!
//! # Usage
//!
//! ```bash
//! # Start the server (default subcommand)
//! rpsd start
//!
//! # Listen elsewhere
//! rpsd start --listen 0.0.0.0:9000
//! RPS_LISTEN=0.0.0.0:9000 rpsd start
//!
//! # Use a config file
//! rpsd start --config /etc/rpsd.toml
//!
//! # Print the effective configuration
//! rpsd check-config --config /etc/rpsd.toml
//!
//! # Enable debug logging
//! RUST_LOG=rpsd=debug rpsd start
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: disband every lobby and exit

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rpsd::config::ServerConfig;
use rpsd::directory::spawn_directory;
use rpsd::server::GameServer;

/// rpsd - rock-paper-scissors-joker lobby server
#[derive(Parser, Debug)]
#[command(name = "rpsd", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the server
    Start {
        /// Address to listen on (overrides config and RPS_LISTEN)
        #[arg(short, long)]
        listen: Option<String>,

        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate the configuration and print the effective settings
    CheckConfig {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Loads the config file (if any) and applies environment overrides.
fn load_config(path: Option<&PathBuf>) -> Result<ServerConfig> {
    let mut config = ServerConfig::load(path.map(PathBuf::as_path))
        .context("Failed to load configuration")?;
    config.apply_env();
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    // No subcommand means start with defaults
    let command = args.command.unwrap_or(Command::Start {
        listen: None,
        config: None,
    });

    match command {
        Command::Start { listen, config } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(listen) = listen {
                config.listen = listen;
            }
            run_server(config)
        }
        Command::CheckConfig { config } => {
            let config = load_config(config.as_ref())?;
            let rendered = config.to_toml().context("Failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

/// Runs the server (async entry point).
#[tokio::main]
async fn run_server(config: ServerConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("rpsd=info".parse()?)
                .add_directive("rps_core=info".parse()?)
                .add_directive("rps_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "rps daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let directory = spawn_directory(config.lobby.clone(), config.max_lobbies);
    info!(
        max_lobbies = config.max_lobbies,
        win_threshold = config.lobby.win_threshold,
        "Lobby directory started"
    );

    let server = GameServer::bind(&config.listen, directory, cancel_token)
        .await
        .with_context(|| format!("Failed to start server on {}", config.listen))?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("rps daemon stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
