//! Notebook runtime CLI entry point.
//!
//! Loads the configuration, starts any sessions it declares, and serves the
//! HTTP shim until shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notebook_runtime_common::ConfigFile;
use notebook_runtime_server::{AppState, NotebookServer, ServerConfig};

/// Persistent notebook sessions over HTTP.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "NOTEBOOK_RUNTIME_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind, overriding the config file.
    #[arg(long, env = "BIND_ADDR")]
    bind: Option<SocketAddr>,

    /// Directory for rendered figures, overriding the config file.
    #[arg(long)]
    figures_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,notebook_runtime=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting notebook runtime");

    // Load configuration
    let config = match &args.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let mut server_config =
        ServerConfig::from_file(&config.server, config.runtime.execution.timeout())
            .context("Invalid [server] configuration")?;
    if let Some(bind) = args.bind {
        server_config = server_config.with_bind_addr(bind);
    }
    let figures_dir = args
        .figures_dir
        .unwrap_or_else(|| config.server.figures_dir.clone());

    info!(
        bind_addr = %server_config.bind_addr,
        figures_dir = %figures_dir.display(),
        default_kind = %config.runtime.kernel.default_kind,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config.runtime, figures_dir);

    for entry in &config.sessions {
        let session = state
            .registry()
            .create(&entry.id, entry.path.clone(), entry.kind.as_deref())
            .await
            .with_context(|| format!("Failed to start session '{}'", entry.id))?;
        info!(
            session_id = %session.id,
            backing_path = %session.backing_path.display(),
            "Session started"
        );
    }

    let server = NotebookServer::new(state, server_config);

    info!("Server initialized. Available endpoints:");
    info!("  POST   /sessions                - Create a session");
    info!("  GET    /sessions                - List sessions");
    info!("  DELETE /sessions                - Shut down the active session");
    info!("  POST   /sessions/:id/activate   - Switch the active session");
    info!("  POST   /execute/step            - Run code and record it");
    info!("  POST   /execute/probe           - Run code without recording it");
    info!("  POST   /execute/doc             - Look up documentation");
    info!("  GET    /health                  - Health check");

    server.run().await?;

    Ok(())
}
