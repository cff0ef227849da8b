//! Chorus Core - Spotify Connect mirroring for shared voice channels.
//!
//! Every linked listener gets a virtual Spotify Connect device. The first
//! listener to start playback on it becomes the guild's Host and drives a
//! shared audio player; everyone else becomes a Slave whose own Spotify client
//! is kept in sync with the Host.
//!
//! # Architecture
//!
//! - [`spotify`]: Web API client, token refresh, dealer websocket, protocol
//!   state manager
//! - [`services`]: Connect sessions, the guild coordinator and the session
//!   registry
//! - [`timebase`]: translation between Spotify time and player time
//! - [`ports`]: traits for the audio backend, track search, token storage and
//!   the chat surface
//! - [`api`]: operator HTTP API for the chat front end
//! - [`bootstrap`]: composition root
//! - [`error`]: centralized error types

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod ports;
pub mod protocol_constants;
pub mod services;
pub mod spotify;
pub mod surface;
pub mod timebase;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_fixtures;

// Re-export commonly used types at the crate root
pub use config::{Config, Environment, SpotifyCredentials};
pub use error::{ChorusError, ChorusResult, ErrorCode, SessionError, SessionResult};
pub use events::{EventEmitter, LoggingEventEmitter, NoopEventEmitter, PlaybackEvent, SessionEvent};
pub use ports::{
    AudioBackend, AudioPlayer, GuildSurface, PlayerStatus, PortError, PortResult, ResolvedTrack,
    TokenPair, TokenStore, TrackResolver,
};
pub use timebase::TimeBase;
pub use types::{ChannelId, GuildId, Role, TrackMetadataPair, UserId};
pub use utils::now_millis;

// Re-export service types
pub use services::{ConnectSession, GuildCoordinator, GuildSnapshot, SessionRegistry};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, Adapters, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, ServerError};
