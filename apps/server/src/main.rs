//! Chorus Server - headless host for the Chorus playback core.
//!
//! Runs the Connect sessions, the guild coordinator and the operator HTTP
//! API. Linked accounts come from a JSON token file, track search goes to a
//! Lavalink node, and playback runs on clock-driven headless players.

mod config;
mod headless_player;
mod lavalink;
mod token_store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chorus_core::bootstrap::create_http_client;
use chorus_core::{bootstrap_services, start_server, Adapters, AppState, LoggingEventEmitter};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;
use crate::headless_player::{HeadlessBackend, TrackEnds};
use crate::lavalink::LavalinkResolver;
use crate::token_store::JsonTokenStore;

/// Chorus Server - Spotify Connect mirroring for shared voice channels.
#[derive(Parser, Debug)]
#[command(name = "chorus-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CHORUS_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// API port (overrides config file).
    #[arg(short = 'p', long, env = "CHORUS_API_PORT")]
    port: Option<u16>,

    /// Linked account file (overrides config file).
    #[arg(short = 't', long, env = "CHORUS_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Lavalink REST URL (overrides config file).
    #[arg(long, env = "CHORUS_LAVALINK_URL")]
    lavalink_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Chorus Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(token_file) = args.token_file {
        config.token_file = token_file;
    }
    if let Some(url) = args.lavalink_url {
        config.lavalink_url = url;
    }

    log::info!(
        "Configuration: bind_port={}, environment={:?}, lavalink={}",
        config.bind_port,
        config.environment,
        config.lavalink_url
    );

    let store = JsonTokenStore::open(&config.token_file)
        .await
        .context("Failed to open token store")?;
    let resolver = LavalinkResolver::new(
        create_http_client(),
        config.lavalink_url.clone(),
        config.lavalink_password.clone(),
        config.search_prefix.clone(),
    );
    let (backend, track_ends) = HeadlessBackend::new();

    let services = bootstrap_services(
        config.to_core_config(),
        Adapters {
            backend: Arc::new(backend),
            resolver: Arc::new(resolver),
            store: Arc::new(store),
            emitter: Arc::new(LoggingEventEmitter),
        },
    )
    .context("Failed to bootstrap services")?;

    log::info!("Services bootstrapped successfully");

    let forwarder = tokio::spawn(forward_track_ends(
        track_ends,
        Arc::clone(&services.coordinator),
    ));

    let app_state = AppState::from(&services);
    let shutdown = services.cancel_token.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, shutdown).await {
            log::error!("Server error: {}", e);
        }
    });

    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    services.shutdown().await;

    // The server drains on cancellation; the forwarder only ends with the backend.
    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }
    forwarder.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Hands naturally finished tracks back to the coordinator.
async fn forward_track_ends(
    mut track_ends: TrackEnds,
    coordinator: Arc<chorus_core::GuildCoordinator>,
) {
    while let Some((guild, track)) = track_ends.recv().await {
        coordinator.track_ended(guild, track).await;
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
