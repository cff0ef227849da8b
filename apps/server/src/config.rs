//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chorus_core::{Environment, SpotifyCredentials};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port for the operator HTTP API.
    /// Override: `CHORUS_API_PORT`
    pub bind_port: u16,

    /// `production` or `livedev`. Livedev devices get a name prefix.
    /// Override: `CHORUS_ENVIRONMENT`
    pub environment: Environment,

    /// Spotify application client id used for token refresh.
    /// Override: `CHORUS_SPOTIFY_CLIENT_ID`
    pub spotify_client_id: String,

    /// Spotify application client secret.
    /// Override: `CHORUS_SPOTIFY_CLIENT_SECRET`
    pub spotify_client_secret: String,

    /// Device name used when a user has not chosen one.
    pub default_device_name: String,

    /// Player volume a full Spotify volume maps onto.
    pub player_volume_ceiling: u16,

    /// Volume of a freshly connected player.
    pub initial_player_volume: u16,

    /// JSON file holding linked accounts.
    /// Override: `CHORUS_TOKEN_FILE`
    pub token_file: PathBuf,

    /// Lavalink REST base URL used for track search.
    /// Override: `CHORUS_LAVALINK_URL`
    pub lavalink_url: String,

    /// Lavalink server password.
    /// Override: `CHORUS_LAVALINK_PASSWORD`
    pub lavalink_password: String,

    /// Lavalink search source prefix (`ytsearch`, `scsearch`, ...).
    pub search_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = chorus_core::Config::default();
        Self {
            bind_port: core.api_port,
            environment: core.environment,
            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),
            default_device_name: core.default_device_name,
            player_volume_ceiling: core.player_volume_ceiling,
            initial_player_volume: core.initial_player_volume,
            token_file: PathBuf::from("tokens.json"),
            lavalink_url: "http://localhost:2333".to_string(),
            lavalink_password: "youshallnotpass".to_string(),
            search_prefix: "ytsearch".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CHORUS_API_PORT") {
            if let Ok(port) = val.parse() {
                self.bind_port = port;
            }
        }

        if let Ok(val) = std::env::var("CHORUS_ENVIRONMENT") {
            match val.to_ascii_lowercase().as_str() {
                "production" => self.environment = Environment::Production,
                "livedev" => self.environment = Environment::Livedev,
                other => log::warn!("Ignoring unknown CHORUS_ENVIRONMENT {:?}", other),
            }
        }

        if let Ok(val) = std::env::var("CHORUS_SPOTIFY_CLIENT_ID") {
            self.spotify_client_id = val;
        }

        if let Ok(val) = std::env::var("CHORUS_SPOTIFY_CLIENT_SECRET") {
            self.spotify_client_secret = val;
        }

        if let Ok(val) = std::env::var("CHORUS_LAVALINK_PASSWORD") {
            self.lavalink_password = val;
        }

        // Note: CHORUS_TOKEN_FILE and CHORUS_LAVALINK_URL are handled by clap
        // via #[arg(env = ...)] in main.rs
    }

    /// Converts to chorus-core's Config type.
    pub fn to_core_config(&self) -> chorus_core::Config {
        chorus_core::Config {
            spotify: SpotifyCredentials {
                client_id: self.spotify_client_id.clone(),
                client_secret: self.spotify_client_secret.clone(),
            },
            environment: self.environment,
            default_device_name: self.default_device_name.clone(),
            player_volume_ceiling: self.player_volume_ceiling,
            initial_player_volume: self.initial_player_volume,
            api_port: self.bind_port,
            ..Default::default()
        }
    }
}
