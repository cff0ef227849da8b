//! Usage events emitted by the playback core.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types for group playback and Connect session lifecycles
//!
//! Where the events go (analytics sink, logs, nowhere) is decided by the host
//! process at bootstrap.

mod emitter;

pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::types::{GuildId, UserId};

/// Events describing what happens to a guild's shared playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackEvent {
    /// The bot joined a voice channel.
    VoiceJoined {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// The bot left its voice channel.
    VoiceLeft {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        timestamp: u64,
    },
    /// A session became the guild's Host.
    HostAssigned {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        #[serde(rename = "userId")]
        user_id: UserId,
        timestamp: u64,
    },
    /// The guild's Host was cleared.
    HostRetracted {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        #[serde(rename = "userId")]
        user_id: UserId,
        timestamp: u64,
    },
    /// The shared player started a track.
    TrackPlayed {
        #[serde(rename = "guildId")]
        guild_id: GuildId,
        /// Spotify URI of the track.
        uri: String,
        timestamp: u64,
    },
}

/// Events describing Connect session lifecycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// The device registered with Spotify.
    DeviceRegistered {
        #[serde(rename = "userId")]
        user_id: UserId,
        #[serde(rename = "deviceId")]
        device_id: String,
        timestamp: u64,
    },
    /// The session was torn down.
    Terminated {
        #[serde(rename = "userId")]
        user_id: UserId,
        /// Short machine-readable reason (`stopped`, `evicted`, `refresh_failed`, ...).
        reason: &'static str,
        timestamp: u64,
    },
}
