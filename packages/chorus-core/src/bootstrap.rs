//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where the
//! Spotify client, the dealer connector, the guild coordinator and the
//! session registry are instantiated and wired together with the adapters
//! supplied by the host process.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ChorusError, ChorusResult};
use crate::events::EventEmitter;
use crate::ports::{AudioBackend, GuildSurface, TokenStore, TrackResolver};
use crate::protocol_constants::HTTP_TIMEOUT_SECS;
use crate::services::{GuildCoordinator, SessionDeps, SessionRegistry};
use crate::spotify::{DealerConnector, SpotifyApi, SpotifyClientImpl, TungsteniteConnector};
use crate::surface::BridgeSurface;

/// Adapters the host process provides.
pub struct Adapters {
    pub backend: Arc<dyn AudioBackend>,
    pub resolver: Arc<dyn TrackResolver>,
    pub store: Arc<dyn TokenStore>,
    pub emitter: Arc<dyn EventEmitter>,
}

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Validated core configuration.
    pub config: Arc<Config>,
    /// Typed Spotify Web API client.
    pub spotify: Arc<dyn SpotifyApi>,
    /// Shared player state per guild.
    pub coordinator: Arc<GuildCoordinator>,
    /// Connect sessions of linked users.
    pub registry: Arc<SessionRegistry>,
    /// Chat surface the front end polls.
    pub surface: Arc<BridgeSurface>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to all background tasks
        self.cancel_token.cancel();

        // Stop every session and leave every voice channel
        self.registry.shutdown().await;

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for all Spotify communication.
pub fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Shared infrastructure (HTTP client, cancellation token, chat surface)
/// 2. Spotify client and dealer connector
/// 3. Guild coordinator (depends on the audio backend and surface)
/// 4. Session registry (depends on everything above; installs itself as the
///    coordinator's session directory)
///
/// # Errors
///
/// Returns [`ChorusError::Configuration`] if `config` fails validation.
pub fn bootstrap_services(config: Config, adapters: Adapters) -> ChorusResult<BootstrappedServices> {
    config.validate().map_err(ChorusError::Configuration)?;
    if config.spotify.client_id.is_empty() {
        log::warn!("[Bootstrap] No Spotify client id configured, token refresh will fail");
    }
    let config = Arc::new(config);

    let http_client = create_http_client();
    let cancel_token = CancellationToken::new();
    let surface = Arc::new(BridgeSurface::new());

    let spotify: Arc<dyn SpotifyApi> = Arc::new(SpotifyClientImpl::new(
        http_client.clone(),
        config.api_base_url.clone(),
        config.accounts_url.clone(),
        config.spotify.clone(),
    ));
    let connector: Arc<dyn DealerConnector> = Arc::new(TungsteniteConnector);

    let coordinator = GuildCoordinator::new(
        adapters.backend,
        Arc::clone(&surface) as Arc<dyn GuildSurface>,
        Arc::clone(&adapters.emitter),
        config.initial_player_volume,
    );

    let registry = SessionRegistry::new(SessionDeps {
        api: Arc::clone(&spotify),
        connector,
        store: adapters.store,
        resolver: adapters.resolver,
        coordinator: Arc::clone(&coordinator),
        emitter: adapters.emitter,
        config: Arc::clone(&config),
    });

    Ok(BootstrappedServices {
        config,
        spotify,
        coordinator,
        registry,
        surface,
        http_client,
        cancel_token,
    })
}
