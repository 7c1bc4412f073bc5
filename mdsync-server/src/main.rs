//! mdsync-server - follow-list reconciliation service
//!
//! Accepts tracker exports over HTTP, matches their titles against the
//! user's followed MangaDex titles and follows whatever else it can find.
//! Jobs run one at a time; progress and queue position stream over SSE.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mdsync_server::services::MangaDexClient;

/// Command-line arguments for mdsync-server
#[derive(Parser, Debug)]
#[command(name = "mdsync-server")]
#[command(about = "Follow-list reconciliation service for MangaDex")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "MDSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the configuration file
    #[arg(short, long, env = "MDSYNC_BIND")]
    bind: Option<String>,

    /// Directory of static UI assets, overrides the configuration file
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = mdsync_common::config::resolve_config_path(args.config.as_deref());
    let mut config = mdsync_common::config::load_config(config_path.as_deref())
        .context("Failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(dir) = args.static_dir {
        config.static_assets = Some(dir);
    }

    // RUST_LOG wins over the configured level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting mdsync-server");
    info!(
        "Version: {} ({}), built {} [{}]",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: compiled defaults"),
    }

    let client_factory = MangaDexClient::factory(&config.remote)
        .context("Failed to initialize MangaDex client")?;
    info!(
        "Remote API: {} ({} req/s)",
        config.remote.api_base_url, config.remote.requests_per_second
    );

    let bind_address = config.bind_address.clone();
    let shutdown = CancellationToken::new();
    let services = mdsync_server::start_services(config, client_factory, shutdown.clone());
    info!(
        "Job queue capacity: {}",
        services.state.queue.capacity()
    );

    let app = mdsync_server::build_router(services.state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = services.worker.await {
        warn!("Job worker exited abnormally: {}", e);
    }
    if let Err(e) = services.sweeper.await {
        warn!("Session sweeper exited abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM and cancels background tasks
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    shutdown.cancel();
}
