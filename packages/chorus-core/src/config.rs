//! Core configuration.
//!
//! [`Config`] carries everything the core needs from its host process: OAuth
//! client credentials, the deployment environment, endpoint overrides and the
//! player volume mapping. The server binary builds it from YAML and
//! environment variables.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_INITIAL_PLAYER_VOLUME, DEFAULT_PLAYER_VOLUME_CEILING, LIVEDEV_NAME_PREFIX,
    PLAYER_VOLUME_MAX, SPOTIFY_ACCOUNTS_URL, SPOTIFY_API_BASE_URL, SPOTIFY_DEALER_URL,
};

/// Deployment environment. Livedev devices are prefixed so they are easy to
/// tell apart from production devices in the Spotify device picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Livedev,
}

impl Environment {
    /// Prefix prepended to every device display name.
    pub fn device_name_prefix(self) -> &'static str {
        match self {
            Self::Production => "",
            Self::Livedev => LIVEDEV_NAME_PREFIX,
        }
    }
}

/// Spotify application credentials used for token refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Core configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OAuth client credentials.
    pub spotify: SpotifyCredentials,

    /// Deployment environment.
    pub environment: Environment,

    /// Device name used when the user has not chosen one (or chose an invalid one).
    pub default_device_name: String,

    /// Web API base URL.
    pub api_base_url: String,

    /// Accounts service base URL.
    pub accounts_url: String,

    /// Dealer websocket URL.
    pub dealer_url: String,

    /// Player volume that a full Spotify volume (65535) maps onto.
    pub player_volume_ceiling: u16,

    /// Volume applied to a freshly connected player.
    pub initial_player_volume: u16,

    /// Port for the operator HTTP API. 0 disables the API.
    pub api_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            spotify: SpotifyCredentials::default(),
            environment: Environment::default(),
            default_device_name: "Chorus".to_string(),
            api_base_url: SPOTIFY_API_BASE_URL.to_string(),
            accounts_url: SPOTIFY_ACCOUNTS_URL.to_string(),
            dealer_url: SPOTIFY_DEALER_URL.to_string(),
            player_volume_ceiling: DEFAULT_PLAYER_VOLUME_CEILING,
            initial_player_volume: DEFAULT_INITIAL_PLAYER_VOLUME,
            api_port: 49500,
        }
    }
}

impl Config {
    /// Validates values that would otherwise misbehave at runtime.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.player_volume_ceiling == 0 || self.player_volume_ceiling > PLAYER_VOLUME_MAX {
            return Err(format!(
                "player_volume_ceiling must be between 1 and {}",
                PLAYER_VOLUME_MAX
            ));
        }
        if self.initial_player_volume > PLAYER_VOLUME_MAX {
            return Err(format!(
                "initial_player_volume must be at most {}",
                PLAYER_VOLUME_MAX
            ));
        }
        if self.default_device_name.trim().is_empty() {
            return Err("default_device_name must not be empty".into());
        }
        Ok(())
    }

    /// Builds the display name for a device, applying the environment prefix.
    pub fn device_display_name(&self, name: &str) -> String {
        format!("{}{}", self.environment.device_name_prefix(), name)
    }

    /// Maps a Spotify device volume (0–65535) onto the player range.
    pub fn player_volume(&self, spotify_volume: u16) -> u16 {
        let scaled = u32::from(spotify_volume) * u32::from(self.player_volume_ceiling)
            / u32::from(crate::protocol_constants::MAX_DEVICE_VOLUME);
        scaled as u16
    }
}
