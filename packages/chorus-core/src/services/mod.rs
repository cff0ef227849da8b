//! Application services layer.
//!
//! This module contains the services that turn Spotify Connect traffic into
//! shared-player actions and keep each guild's listening group consistent.

pub mod connect_session;
pub mod guild_coordinator;
pub mod idle_timer;
pub mod session_registry;

pub use connect_session::{ConnectSession, SessionDeps};
pub use guild_coordinator::{GuildCoordinator, GuildSnapshot, LinkedSession, SessionDirectory};
pub use idle_timer::IdleTimer;
pub use session_registry::{SessionRegistry, SessionStatus};
