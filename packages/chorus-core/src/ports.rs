//! Ports to external collaborators.
//!
//! Voice transport, audio decoding, track search, token persistence and the
//! chat surface live outside this crate. Services depend on these traits
//! rather than concrete adapters so they can be exercised with mocks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::types::{ChannelId, GuildId, UserId};

/// Errors raised by adapter implementations.
#[derive(Debug, Error)]
pub enum PortError {
    /// The player has left its voice channel.
    #[error("player is not connected")]
    NotConnected,

    /// Audio backend failure.
    #[error("audio backend error: {0}")]
    Backend(String),

    /// Token or preference storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Convenient Result alias for adapter operations.
pub type PortResult<T> = Result<T, PortError>;

// ─────────────────────────────────────────────────────────────────────────────
// Audio
// ─────────────────────────────────────────────────────────────────────────────

/// An audio track resolved from an external source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTrack {
    pub title: String,
    pub url: String,
    pub author: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Opaque handle the backend needs to play the track.
    pub encoded: String,
}

/// Snapshot of what a player is doing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerStatus {
    pub track: Option<ResolvedTrack>,
    pub position: Duration,
    pub paused: bool,
}

/// One guild's shared audio player.
///
/// When a track finishes on its own the adapter reports it through
/// [`GuildCoordinator::track_ended`](crate::services::GuildCoordinator::track_ended).
#[async_trait]
pub trait AudioPlayer: Send + Sync {
    /// Starts playing `track` at `offset`.
    async fn play(&self, track: &ResolvedTrack, offset: Duration) -> PortResult<()>;

    /// Stops playback and unloads the track.
    async fn stop(&self) -> PortResult<()>;

    async fn pause(&self) -> PortResult<()>;

    async fn resume(&self) -> PortResult<()>;

    async fn seek(&self, position: Duration) -> PortResult<()>;

    /// Sets the output volume (0–150).
    async fn set_volume(&self, volume: u16) -> PortResult<()>;

    fn status(&self) -> PlayerStatus;

    /// Disconnects from the voice channel. The player is unusable afterwards.
    async fn leave(&self) -> PortResult<()>;
}

/// Connects players to voice channels.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn connect(
        &self,
        guild: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> PortResult<Arc<dyn AudioPlayer>>;
}

/// Searches an external catalogue for a playable track.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn search(&self, query: &str) -> PortResult<Option<ResolvedTrack>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────────────────────────

/// Stored OAuth credentials for a linked user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Persistent storage of linked accounts and their preferences.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_token(&self, user: UserId) -> PortResult<Option<TokenPair>>;

    async fn update_access_token(&self, user: UserId, access_token: &str) -> PortResult<()>;

    async fn delete_token(&self, user: UserId) -> PortResult<()>;

    /// The user's chosen device name, if any.
    async fn device_name(&self, user: UserId) -> PortResult<Option<String>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Surface
// ─────────────────────────────────────────────────────────────────────────────

/// The chat platform as seen by the playback core.
#[async_trait]
pub trait GuildSurface: Send + Sync {
    /// Posts a plain notice to a text channel.
    async fn notify(&self, guild: GuildId, channel: ChannelId, message: &str) -> PortResult<()>;

    /// Number of members in the bot's voice channel, the bot included.
    fn voice_member_count(&self, guild: GuildId) -> usize;
}

mod duration_millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
