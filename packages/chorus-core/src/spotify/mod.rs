//! Spotify Connect protocol plumbing.
//!
//! - [`http`]: error type and the rate-limit aware send loop
//! - [`client`]: typed Web API endpoints ([`SpotifyApi`])
//! - [`auth`]: per-user token refresh-and-retry
//! - [`protocol`]: dealer frames and acknowledgement payloads
//! - [`state_manager`]: sequence numbers and state identity per device
//! - [`dealer`]: the realtime websocket

pub mod auth;
pub mod client;
pub mod dealer;
pub mod http;
pub mod protocol;
pub mod state_manager;

pub use auth::UserAuth;
pub use client::{SpotifyApi, SpotifyClientImpl};
pub use dealer::{
    DealerConnection, DealerConnector, DealerError, DealerEvent, DisconnectKind,
    TungsteniteConnector,
};
pub use http::{SpotifyError, SpotifyResult};
pub use protocol::{Command, DealerMessage, ReplaceState, TrackMetadata};
pub use state_manager::ProtocolStateManager;
