//! Registry of linked users' Connect sessions.
//!
//! Sessions are created lazily from the token store the first time a user is
//! seen and live until the account is unlinked or the service shuts down.
//! The registry also reacts to voice-state changes: users entering the bot's
//! channel are activated, users leaving it are deactivated, and a bot that is
//! moved or disconnected tears down the whole group.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::Serialize;

use super::connect_session::{ConnectSession, SessionDeps};
use super::guild_coordinator::{LinkedSession, SessionDirectory};
use crate::error::{ChorusResult, SessionError};
use crate::types::{ChannelId, GuildId, Role, UserId};

/// What the API reports about one linked user's session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub user_id: UserId,
    pub device_id: String,
    pub device_name: String,
    pub role: Role,
    pub active: bool,
    pub guild_id: Option<GuildId>,
}

pub struct SessionRegistry {
    sessions: DashMap<UserId, Arc<ConnectSession>>,
    deps: SessionDeps,
    weak_self: Weak<Self>,
}

impl SessionRegistry {
    /// Creates the registry and installs it as the coordinator's directory.
    pub fn new(deps: SessionDeps) -> Arc<Self> {
        let registry = Arc::new_cyclic(|weak_self| Self {
            sessions: DashMap::new(),
            deps,
            weak_self: weak_self.clone(),
        });
        let directory: Weak<SessionRegistry> = Arc::downgrade(&registry);
        registry.deps.coordinator.set_directory(directory);
        registry
    }

    pub fn get(&self, user: UserId) -> Option<Arc<ConnectSession>> {
        self.sessions.get(&user).map(|s| Arc::clone(&s))
    }

    /// Number of sessions currently held.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn status(&self, user: UserId) -> Option<SessionStatus> {
        self.get(user).map(|s| SessionStatus {
            user_id: user,
            device_id: s.device_id().to_string(),
            device_name: s.device_name(),
            role: s.role(),
            active: s.is_initialized(),
            guild_id: s.guild(),
        })
    }

    /// Returns the user's session, creating it from the stored token.
    async fn instance(&self, user: UserId) -> ChorusResult<Option<Arc<ConnectSession>>> {
        if let Some(session) = self.get(user) {
            return Ok(Some(session));
        }
        let Some(tokens) = self.deps.store.get_token(user).await? else {
            return Ok(None);
        };

        let entry = self.sessions.entry(user).or_insert_with(|| {
            log::debug!("[SessionRegistry] Creating session for {}", user);
            ConnectSession::new(user, tokens, self.deps.clone(), self.weak_self.clone())
        });
        Ok(Some(Arc::clone(&entry)))
    }

    /// Returns true if the user is linked, creating the session on demand.
    pub async fn has_instance(&self, user: UserId) -> ChorusResult<bool> {
        Ok(self.instance(user).await?.is_some())
    }

    /// Starts the user's session in `guild`.
    ///
    /// Returns false when the user has no linked account. Starting a session
    /// that is already running is a no-op that returns true.
    ///
    /// # Errors
    ///
    /// A token that can no longer be refreshed unlinks the account and yields
    /// [`ChorusError::UserNotLinked`](crate::error::ChorusError::UserNotLinked).
    pub async fn activate(
        &self,
        user: UserId,
        guild: GuildId,
        voice_channel: ChannelId,
    ) -> ChorusResult<bool> {
        let Some(session) = self.instance(user).await? else {
            return Ok(false);
        };

        match session.start(guild, voice_channel).await {
            Ok(started) => {
                if started {
                    log::info!("[SessionRegistry] Activated {} in guild {}", user, guild);
                }
                Ok(true)
            }
            Err(SessionError::RefreshFailed(cause)) => {
                log::error!(
                    "[SessionRegistry] Token of {} is unusable, unlinking: {}",
                    user,
                    cause
                );
                self.unlink(user).await;
                Err(SessionError::RefreshFailed(cause).into())
            }
            Err(e) => {
                log::warn!("[SessionRegistry] Could not activate {}: {}", user, e);
                Err(e.into())
            }
        }
    }

    /// Stops the user's session. Returns false if there was none.
    pub async fn deactivate(&self, user: UserId) -> bool {
        match self.get(user) {
            Some(session) => {
                session.stop().await;
                true
            }
            None => false,
        }
    }

    /// Ends the user's session and forgets their account.
    pub async fn unlink(&self, user: UserId) {
        if let Some((_, session)) = self.sessions.remove(&user) {
            session.terminate("unlinked").await;
        }
        if let Err(e) = self.deps.store.delete_token(user).await {
            log::warn!("[SessionRegistry] Failed to delete token of {}: {}", user, e);
        }
        log::info!("[SessionRegistry] Unlinked {}", user);
    }

    /// Running sessions in `guild`'s `voice_channel`.
    fn sessions_in(&self, guild: GuildId, voice_channel: ChannelId) -> Vec<Arc<ConnectSession>> {
        self.sessions
            .iter()
            .filter(|s| s.guild() == Some(guild) && s.voice_channel() == Some(voice_channel))
            .map(|s| Arc::clone(s.value()))
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Voice State
    // ─────────────────────────────────────────────────────────────────────────

    /// A user joined, left or switched voice channels.
    pub async fn handle_user_voice_state(
        &self,
        guild: GuildId,
        user: UserId,
        channel: Option<ChannelId>,
    ) {
        let bot_channel = self.deps.coordinator.voice_channel(guild);

        match (channel, bot_channel) {
            (Some(channel), Some(bot_channel)) if channel == bot_channel => {
                if let Err(e) = self.activate(user, guild, channel).await {
                    log::warn!("[SessionRegistry] Activation of {} failed: {}", user, e);
                }
            }
            _ => {
                let Some(session) = self.get(user) else {
                    return;
                };
                if session.guild() == Some(guild) && session.is_initialized() {
                    log::info!("[SessionRegistry] {} left the listening channel", user);
                    session.stop().await;
                }
            }
        }
    }

    /// The bot itself was moved or disconnected.
    ///
    /// The Host is cleared, Slaves are disposed and every session of the old
    /// channel stops. A move reconnects the player and activates `members` of
    /// the new channel; a disconnect leaves voice.
    pub async fn handle_bot_voice_state(
        &self,
        guild: GuildId,
        previous: Option<ChannelId>,
        current: Option<ChannelId>,
        members: &[UserId],
    ) {
        let Some(previous) = previous else {
            return;
        };
        if current == Some(previous) {
            return;
        }

        let coordinator = &self.deps.coordinator;
        if coordinator.host(guild).is_some() {
            coordinator.clear_host(guild);
        }
        let disposed = coordinator.dispose_slaves(guild).await;
        log::debug!("[SessionRegistry] Disposed {} slaves in guild {}", disposed, guild);

        for session in self.sessions_in(guild, previous) {
            session.stop().await;
        }

        let text_channel = coordinator.text_channel(guild);
        match (current, text_channel) {
            (Some(channel), Some(text_channel)) => {
                log::info!("[SessionRegistry] Bot moved to {} in guild {}", channel, guild);
                if let Err(e) = coordinator.connect(guild, channel, text_channel).await {
                    log::warn!("[SessionRegistry] Reconnect failed in guild {}: {}", guild, e);
                    coordinator.leave(guild).await;
                    return;
                }
                for &user in members {
                    if let Err(e) = self.activate(user, guild, channel).await {
                        log::warn!("[SessionRegistry] Activation of {} failed: {}", user, e);
                    }
                }
            }
            _ => {
                log::info!("[SessionRegistry] Bot left voice in guild {}", guild);
                coordinator.leave(guild).await;
            }
        }
    }

    /// Stops every session and disconnects every player.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.iter().map(|s| Arc::clone(s.value())).collect();
        self.sessions.clear();
        for session in sessions {
            session.stop().await;
        }
        self.deps.coordinator.shutdown().await;
        log::info!("[SessionRegistry] Shutdown complete");
    }
}

impl SessionDirectory for SessionRegistry {
    fn linked_session(&self, user: UserId) -> Option<Arc<dyn LinkedSession>> {
        self.get(user).map(|s| s as Arc<dyn LinkedSession>)
    }
}
