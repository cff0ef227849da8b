//! Operator HTTP API.
//!
//! The API is the bridge a chat front end uses to drive Chorus: it reports
//! voice-state changes, connects and disconnects the shared player, toggles
//! 24/7 mode and manages linked users. Handlers are thin and delegate to the
//! services.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::BootstrappedServices;
use crate::config::Config;
use crate::services::{GuildCoordinator, SessionRegistry};
use crate::surface::BridgeSurface;

pub mod http;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<GuildCoordinator>,
    pub registry: Arc<SessionRegistry>,
    pub surface: Arc<BridgeSurface>,
    pub config: Arc<Config>,
}

impl From<&BootstrappedServices> for AppState {
    fn from(services: &BootstrappedServices) -> Self {
        Self {
            coordinator: Arc::clone(&services.coordinator),
            registry: Arc::clone(&services.registry),
            surface: Arc::clone(&services.surface),
            config: Arc::clone(&services.config),
        }
    }
}

/// Serves the API on the configured port until `shutdown` is cancelled.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.api_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let port = listener.local_addr()?.port();

    log::info!("Server listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
