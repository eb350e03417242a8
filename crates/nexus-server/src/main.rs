//! Nexus server - multi-endpoint WebSocket hub with an HTTP admin API.

use anyhow::Result;
use clap::Parser;
use nexus_server::{config, inbound, logging, routes, shutdown, state};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use config::Config;
use logging::{LogConfig, LogFormat};
use state::AppState;

/// How long background workers get to stop once the listener is closed.
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Nexus server - WebSocket endpoints with message dispatch.
#[derive(Parser, Debug)]
#[command(name = "nexus-server")]
#[command(about = "Multi-endpoint WebSocket server with an HTTP admin API")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override port from config
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging (INFO level for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging (DEBUG level, excludes ping traces)
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "dispatch=debug" or "ws::ping=trace").
    /// Can be specified multiple times. Targets are prefixed with "nexus::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Also write daily-rotated JSON logs into this directory
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(port) = cli.port {
        config.port = port;
    }

    let mut log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    log_config.file = config.log_file(cli.log_dir);
    let _log_guard = logging::init(&log_config)?;
    if let Some(file) = &log_config.file {
        tracing::info!(target: "nexus::startup", dir = %file.dir.display(), max_files = file.max_files, "writing log files");
    }

    tracing::info!(
        target: "nexus::startup",
        port = config.port,
        endpoints = config.endpoints.len(),
        admin = config.admin_enabled,
        "loaded configuration"
    );

    let state = Arc::new(AppState::new(config.clone())?);
    for endpoint in &config.endpoints {
        tracing::info!(target: "nexus::startup", path = %endpoint.path, identity = ?endpoint.identity, echo = endpoint.echo, "mounted endpoint");
    }

    let cancel = CancellationToken::new();
    let workers = inbound::spawn_workers(&state, cancel.clone());
    tokio::spawn(shutdown::cancel_on_signal(cancel.clone()));

    let app = routes::router(state.clone());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(target: "nexus::startup", "Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_cancel = cancel.clone();
    let manager = state.manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            server_cancel.cancelled().await;
            // Upgraded sockets outlive the HTTP connection; stop them explicitly.
            manager.shutdown();
        })
        .await?;

    tracing::info!(target: "nexus::startup", "server stopped, draining workers");
    state.manager.shutdown();
    cancel.cancel();
    if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, futures::future::join_all(workers))
        .await
        .is_err()
    {
        tracing::warn!(target: "nexus::startup", "workers did not stop in time");
    }

    Ok(())
}
