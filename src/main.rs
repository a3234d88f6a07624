//! linerelay - Concurrent text-line chat relay server

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linerelay::{config::ConfigManager, RelayServer, ShutdownCoordinator};

/// CLI arguments for linerelay
#[derive(Parser, Debug)]
#[command(name = "linerelay")]
#[command(about = "linerelay - Text-line chat relay server")]
#[command(version)]
#[command(long_about = "
linerelay - Text-line chat relay server

Clients connect over TCP and send newline-delimited commands:
  /broadcast <text>   relay <text> to every connected client
  /quit               close the connection

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  LINERELAY_BIND_ADDR         - Bind address (e.g., 127.0.0.1:8080)
  LINERELAY_SHUTDOWN_TIMEOUT  - Session drain timeout on shutdown (e.g., 10s)
  LINERELAY_WRITE_TIMEOUT     - Per-recipient broadcast write timeout (e.g., 5s)
  LINERELAY_SENDER_POLICY     - Whether senders receive their own broadcasts (include/exclude)
  LINERELAY_MAX_LINE_LENGTH   - Longest accepted client line in bytes (e.g., 65536)
  LINERELAY_LOG_LEVEL         - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "linerelay.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:8080)")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level (defaults to the configured level)")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Do not deliver a broadcast back to its sender
    #[arg(long, help = "Exclude the sender from its own broadcasts")]
    pub exclude_sender: bool,

    /// Per-recipient write timeout in seconds
    #[arg(long, help = "Broadcast write timeout in seconds")]
    pub write_timeout: Option<u64>,

    /// Longest accepted client line in bytes
    #[arg(long, help = "Maximum line length in bytes")]
    pub max_line_length: Option<usize>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    init_tracing(&args, &config.logging.level)?;

    info!("Starting linerelay v{}", env!("CARGO_PKG_VERSION"));

    // Apply CLI argument overrides (highest priority)
    config
        .merge_with_cli_args(
            args.bind.as_deref(),
            args.port,
            args.exclude_sender,
            args.write_timeout,
            args.max_line_length,
        )
        .context("Invalid command-line arguments")?;

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Shutdown timeout: {:?}", config.server.shutdown_timeout);
        info!("  TCP_NODELAY: {}", config.server.tcp_nodelay);
        info!("  Sender policy: {}", config.relay.sender_policy);
        info!("  Write timeout: {:?}", config.relay.write_timeout);
        info!("  Max line length: {} bytes", config.relay.max_line_length);
        return Ok(());
    }

    let shutdown_coordinator = ShutdownCoordinator::new();
    let shutdown_rx = shutdown_coordinator.subscribe();

    let server = RelayServer::bind(Arc::new(config))
        .await
        .context("Failed to start relay server")?;

    info!("linerelay listening on {}", server.local_addr());
    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");

    let mut server_handle = tokio::spawn(async move {
        server
            .run_until(ShutdownCoordinator::signalled(shutdown_rx))
            .await
    });

    tokio::select! {
        result = &mut server_handle => {
            // The server stopped on its own: a fatal listener error
            let result = result.context("Server task failed")?;
            if let Err(e) = &result {
                error!("Server error: {}", e);
            }
            result?;
        }
        signal_result = shutdown_coordinator.listen_for_signals() => {
            signal_result.context("Error setting up signal handlers")?;
            info!("Initiating graceful shutdown...");

            let result = server_handle.await.context("Server task failed")?;
            if let Err(e) = &result {
                error!("Server error during shutdown: {}", e);
            }
            result?;
        }
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, configured_level: &str) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        args.log_level.as_deref().unwrap_or(configured_level)
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
