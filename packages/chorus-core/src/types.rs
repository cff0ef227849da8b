//! Identifier newtypes shared across the crate.
//!
//! Chat platforms hand out 64-bit snowflake ids for users, guilds and
//! channels. Wrapping them keeps a user id from being passed where a guild id
//! is expected.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

snowflake_id!(
    /// A linked listener.
    UserId
);

snowflake_id!(
    /// A chat community owning one shared audio player.
    GuildId
);

snowflake_id!(
    /// A voice or text channel inside a guild.
    ChannelId
);

/// Role a Connect session currently holds within its guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    /// Drives the shared player.
    Host,
    /// Mirrors the Host on its own Spotify client.
    Slave,
    /// Connected but not participating in any group.
    Unassigned,
}

/// Result of claiming a role in a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleClaim {
    /// The caller is (now) the Host.
    Host,
    /// The caller is a Slave; `newly_added` is true when it just joined the set.
    Slave { newly_added: bool },
}

impl RoleClaim {
    pub fn role(self) -> Role {
        match self {
            Self::Host => Role::Host,
            Self::Slave { .. } => Role::Slave,
        }
    }
}

/// Spotify side of the track a Host is playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotifyTrackInfo {
    pub uri: String,
    pub name: String,
    pub authors: Vec<String>,
    pub duration_ms: u64,
    /// Public `open.spotify.com` link, when Spotify returned one.
    pub web_url: Option<String>,
}

/// Player side of the track a Host is playing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerTrackInfo {
    pub title: String,
    pub url: String,
    pub uploader: String,
    #[serde(rename = "durationMs", serialize_with = "serialize_millis")]
    pub duration: Duration,
}

/// Both descriptions of the loaded track. Set and cleared together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadataPair {
    pub spotify: SpotifyTrackInfo,
    pub player: PlayerTrackInfo,
}

fn serialize_millis<S: serde::Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}
