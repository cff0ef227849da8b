//! Per-guild registry of the shared player and the sessions driving it.
//!
//! Responsibilities:
//! - Host election (at most one Host per guild, never also a Slave)
//! - Slave set maintenance and best-effort transport fan-out
//! - Shared player lifecycle (connect, leave, play, pause, seek, volume)
//! - 24/7 mode and the inactivity watcher
//!
//! Sessions are referenced by [`UserId`] and looked up through a
//! [`SessionDirectory`], so the coordinator never owns a session.

use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;

use super::idle_timer::IdleTimer;
use crate::events::{EventEmitter, PlaybackEvent};
use crate::ports::{
    AudioBackend, AudioPlayer, GuildSurface, PlayerStatus, PortError, PortResult, ResolvedTrack,
};
use crate::protocol_constants::{INACTIVITY_NOTICE, INACTIVITY_TIMEOUT_SECS, PLAYER_VOLUME_MAX};
use crate::timebase::TimeBase;
use crate::types::{ChannelId, GuildId, RoleClaim, TrackMetadataPair, UserId};
use crate::utils::now_millis;

// ─────────────────────────────────────────────────────────────────────────────
// Session Seam
// ─────────────────────────────────────────────────────────────────────────────

/// What the coordinator needs from a linked user's Connect session.
///
/// Transport methods are best-effort: failures are handled inside the
/// session and never reported back to the coordinator.
#[async_trait]
pub trait LinkedSession: Send + Sync {
    fn user_id(&self) -> UserId;

    /// Starts `uri` on the user's Spotify at `offset` (player time).
    ///
    /// `timebase` becomes the session's translation for the new track.
    async fn play_track(&self, uri: &str, timebase: TimeBase, offset: Duration);

    /// Seeks the user's Spotify to `position` (player time).
    async fn seek_to(&self, position: Duration);

    async fn pause_playback(&self);

    async fn resume_playback(&self);

    /// Closes the realtime connection. The session restarts on its own.
    fn close_connection(&self);

    /// Stops the session for good.
    async fn stop(&self);

    /// Called on the Host when 24/7 mode is switched off.
    fn on_disabled_247(&self);

    /// Called on the session that last started the shared player whenever
    /// a track ends, including ends caused by stop or replacement.
    async fn on_track_finished(&self, track: ResolvedTrack);

    fn now_playing(&self) -> Option<TrackMetadataPair>;

    /// Spotify URI and time base of the loaded track, if any.
    fn loaded_track(&self) -> Option<(String, TimeBase)>;
}

/// Looks up live sessions by user.
pub trait SessionDirectory: Send + Sync {
    fn linked_session(&self, user: UserId) -> Option<Arc<dyn LinkedSession>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Guild State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct GuildState {
    player: Option<Arc<dyn AudioPlayer>>,
    voice_channel: Option<ChannelId>,
    text_channel: Option<ChannelId>,
    host: Option<UserId>,
    slaves: Vec<UserId>,
    always_on: bool,
    /// Receives `track_ended` for the shared player.
    finished_listener: Option<UserId>,
}

struct GuildSession {
    guild: GuildId,
    state: Mutex<GuildState>,
    inactivity: IdleTimer,
}

impl GuildSession {
    fn new(guild: GuildId) -> Self {
        Self {
            guild,
            state: Mutex::new(GuildState::default()),
            inactivity: IdleTimer::new(),
        }
    }

    fn player(&self) -> Option<Arc<dyn AudioPlayer>> {
        self.state.lock().player.clone()
    }
}

/// Point-in-time view of a guild for the operator API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildSnapshot {
    pub guild_id: GuildId,
    pub connected: bool,
    pub voice_channel: Option<ChannelId>,
    pub text_channel: Option<ChannelId>,
    pub host: Option<UserId>,
    pub slaves: Vec<UserId>,
    #[serde(rename = "twentyFourSeven")]
    pub always_on: bool,
    pub playing: bool,
    pub paused: bool,
    pub position_ms: u64,
    pub now_playing: Option<TrackMetadataPair>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────────────────

pub struct GuildCoordinator {
    guilds: DashMap<GuildId, Arc<GuildSession>>,
    backend: Arc<dyn AudioBackend>,
    surface: Arc<dyn GuildSurface>,
    emitter: Arc<dyn EventEmitter>,
    initial_volume: u16,
    inactivity_budget: Duration,
    directory: OnceLock<Weak<dyn SessionDirectory>>,
    weak_self: Weak<Self>,
}

impl GuildCoordinator {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        surface: Arc<dyn GuildSurface>,
        emitter: Arc<dyn EventEmitter>,
        initial_volume: u16,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            guilds: DashMap::new(),
            backend,
            surface,
            emitter,
            initial_volume,
            inactivity_budget: Duration::from_secs(INACTIVITY_TIMEOUT_SECS),
            directory: OnceLock::new(),
            weak_self: weak_self.clone(),
        })
    }

    /// Wires the session lookup. Only the first call has an effect.
    pub fn set_directory(&self, directory: Weak<dyn SessionDirectory>) {
        if self.directory.set(directory).is_err() {
            log::warn!("[Coordinator] Session directory already set, ignoring");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Private helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Returns the guild's session, creating it on first access.
    fn guild(&self, guild: GuildId) -> Arc<GuildSession> {
        let entry = self
            .guilds
            .entry(guild)
            .or_insert_with(|| Arc::new(GuildSession::new(guild)));
        Arc::clone(&entry)
    }

    fn existing(&self, guild: GuildId) -> Option<Arc<GuildSession>> {
        self.guilds.get(&guild).map(|g| Arc::clone(&g))
    }

    fn session(&self, user: UserId) -> Option<Arc<dyn LinkedSession>> {
        self.directory.get()?.upgrade()?.linked_session(user)
    }

    fn emit(&self, event: PlaybackEvent) {
        self.emitter.emit_playback(event);
    }

    /// Runs `op` on every Slave concurrently. Iterates over a snapshot.
    async fn for_each_slave<F, Fut>(&self, gs: &GuildSession, op: F)
    where
        F: Fn(Arc<dyn LinkedSession>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let slaves = gs.state.lock().slaves.clone();
        let sessions: Vec<_> = slaves.into_iter().filter_map(|u| self.session(u)).collect();
        join_all(sessions.into_iter().map(op)).await;
    }

    fn host_retracted(&self, gs: &GuildSession, user: UserId) {
        log::info!("[Coordinator] Host {} retracted in guild {}", user, gs.guild);
        self.emit(PlaybackEvent::HostRetracted {
            guild_id: gs.guild,
            user_id: user,
            timestamp: now_millis(),
        });
        if gs.player().is_some() {
            self.arm_inactivity(gs);
        }
    }

    fn host_assigned(&self, gs: &GuildSession, user: UserId) {
        log::info!("[Coordinator] Host {} assigned in guild {}", user, gs.guild);
        gs.inactivity.signal();
        self.emit(PlaybackEvent::HostAssigned {
            guild_id: gs.guild,
            user_id: user,
            timestamp: now_millis(),
        });
    }

    /// Starts the inactivity countdown unless 24/7 mode is on.
    fn arm_inactivity(&self, gs: &GuildSession) {
        if gs.state.lock().always_on {
            return;
        }

        let weak = self.weak_self.clone();
        let guild = gs.guild;
        gs.inactivity.arm(self.inactivity_budget, async move {
            if let Some(coordinator) = weak.upgrade() {
                coordinator.inactivity_elapsed(guild).await;
            }
        });
    }

    async fn inactivity_elapsed(&self, guild: GuildId) {
        let Some(gs) = self.existing(guild) else {
            return;
        };
        let text_channel = gs.state.lock().text_channel;

        log::info!("[Coordinator] Guild {} inactive, leaving voice", guild);
        if let Some(channel) = text_channel {
            if let Err(e) = self.surface.notify(guild, channel, INACTIVITY_NOTICE).await {
                log::warn!("[Coordinator] Failed to post inactivity notice: {}", e);
            }
        }
        self.leave(guild).await;
    }

    /// Brings a new Slave's Spotify to the Host's track and position.
    async fn sync_slave(&self, gs: &GuildSession, user: UserId) {
        let (host, player) = {
            let st = gs.state.lock();
            (st.host, st.player.clone())
        };
        let Some(host) = host.and_then(|h| self.session(h)) else {
            return;
        };
        let Some((uri, timebase)) = host.loaded_track() else {
            return;
        };
        let Some(slave) = self.session(user) else {
            return;
        };

        let position = player.map(|p| p.status().position).unwrap_or_default();
        log::debug!(
            "[Coordinator] Syncing slave {} to {} at {:?}",
            user,
            uri,
            position
        );
        slave.play_track(&uri, timebase, position).await;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    /// Claims a role for `user`: Host if the guild has none, otherwise Slave.
    ///
    /// The decision is made under the guild lock, so concurrent claims elect
    /// exactly one Host. A newly added Slave is synced to the Host's track.
    pub async fn claim_role(&self, guild: GuildId, user: UserId) -> RoleClaim {
        let gs = self.guild(guild);
        let (claim, newly_host) = {
            let mut st = gs.state.lock();
            match st.host {
                None => {
                    st.host = Some(user);
                    st.slaves.retain(|s| *s != user);
                    (RoleClaim::Host, true)
                }
                Some(host) if host == user => (RoleClaim::Host, false),
                Some(_) if st.slaves.contains(&user) => {
                    (RoleClaim::Slave { newly_added: false }, false)
                }
                Some(_) => {
                    st.slaves.push(user);
                    (RoleClaim::Slave { newly_added: true }, false)
                }
            }
        };

        if newly_host {
            self.host_assigned(&gs, user);
        }
        if claim == (RoleClaim::Slave { newly_added: true }) {
            log::info!("[Coordinator] Slave {} joined guild {}", user, guild);
            self.sync_slave(&gs, user).await;
        }
        claim
    }

    /// Makes `user` the Host, replacing any current one.
    pub fn set_host(&self, guild: GuildId, user: UserId) {
        let gs = self.guild(guild);
        {
            let mut st = gs.state.lock();
            st.host = Some(user);
            st.slaves.retain(|s| *s != user);
        }
        self.host_assigned(&gs, user);
    }

    /// Clears the Host. Arms the inactivity watcher if a player exists.
    pub fn clear_host(&self, guild: GuildId) {
        let gs = self.guild(guild);
        let previous = gs.state.lock().host.take();
        match previous {
            Some(user) => self.host_retracted(&gs, user),
            None if gs.player().is_some() => self.arm_inactivity(&gs),
            None => {}
        }
    }

    /// Clears the Host only if it is `user`. Returns true if it was.
    pub fn retract_host(&self, guild: GuildId, user: UserId) -> bool {
        let Some(gs) = self.existing(guild) else {
            return false;
        };
        let cleared = {
            let mut st = gs.state.lock();
            if st.host == Some(user) {
                st.host = None;
                true
            } else {
                false
            }
        };
        if cleared {
            self.host_retracted(&gs, user);
        }
        cleared
    }

    pub fn host(&self, guild: GuildId) -> Option<UserId> {
        self.existing(guild)?.state.lock().host
    }

    /// Adds `user` to the Slave set and syncs it to the Host.
    pub async fn add_slave(&self, guild: GuildId, user: UserId) {
        let gs = self.guild(guild);
        {
            let mut st = gs.state.lock();
            if st.host == Some(user) {
                return;
            }
            if !st.slaves.contains(&user) {
                st.slaves.push(user);
            }
        }
        self.sync_slave(&gs, user).await;
    }

    /// Removes `user` from the Slave set. Returns true if it was a member.
    pub fn remove_slave(&self, guild: GuildId, user: UserId) -> bool {
        let Some(gs) = self.existing(guild) else {
            return false;
        };
        let mut st = gs.state.lock();
        let before = st.slaves.len();
        st.slaves.retain(|s| *s != user);
        st.slaves.len() != before
    }

    pub fn has_slave(&self, guild: GuildId, user: UserId) -> bool {
        self.existing(guild)
            .is_some_and(|gs| gs.state.lock().slaves.contains(&user))
    }

    pub fn slaves(&self, guild: GuildId) -> Vec<UserId> {
        self.existing(guild)
            .map(|gs| gs.state.lock().slaves.clone())
            .unwrap_or_default()
    }

    /// Empties the Slave set and closes each Slave's connection.
    ///
    /// The Slaves restart and re-claim a role on their next command.
    pub fn release_slaves(&self, guild: GuildId) -> usize {
        let Some(gs) = self.existing(guild) else {
            return 0;
        };
        let slaves = std::mem::take(&mut gs.state.lock().slaves);
        for session in slaves.iter().filter_map(|u| self.session(*u)) {
            session.close_connection();
        }
        slaves.len()
    }

    /// Empties the Slave set and stops each Slave session.
    pub async fn dispose_slaves(&self, guild: GuildId) -> usize {
        let Some(gs) = self.existing(guild) else {
            return 0;
        };
        let slaves = std::mem::take(&mut gs.state.lock().slaves);
        let sessions: Vec<_> = slaves.iter().filter_map(|u| self.session(*u)).collect();
        join_all(sessions.iter().map(|s| s.stop())).await;
        slaves.len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts `track` on the shared player for the Host's Spotify `uri`.
    ///
    /// Every Slave is sent to the start of `uri` first. The Host becomes the
    /// receiver of `track_ended` for this player.
    pub async fn play(
        &self,
        guild: GuildId,
        track: &ResolvedTrack,
        uri: &str,
        timebase: TimeBase,
    ) -> PortResult<()> {
        let gs = self.guild(guild);
        let (player, host) = {
            let st = gs.state.lock();
            (st.player.clone(), st.host)
        };
        let Some(player) = player else {
            return Err(PortError::NotConnected);
        };
        let Some(host) = host else {
            log::debug!("[Coordinator] Ignoring play in guild {} without a Host", guild);
            return Ok(());
        };

        self.for_each_slave(&gs, |slave| async move {
            slave.play_track(uri, timebase, Duration::ZERO).await;
        })
        .await;

        player.play(track, Duration::ZERO).await?;
        gs.state.lock().finished_listener = Some(host);

        log::info!("[Coordinator] Playing \"{}\" in guild {}", track.title, guild);
        self.emit(PlaybackEvent::TrackPlayed {
            guild_id: guild,
            uri: uri.to_string(),
            timestamp: now_millis(),
        });
        Ok(())
    }

    /// Stops the shared player. Returns false if there is none.
    pub async fn stop(&self, guild: GuildId) -> PortResult<bool> {
        let Some(player) = self.existing(guild).and_then(|gs| gs.player()) else {
            return Ok(false);
        };
        player.stop().await?;
        Ok(true)
    }

    /// Pauses every Slave, then the shared player unless already paused.
    pub async fn pause(&self, guild: GuildId) -> PortResult<bool> {
        let gs = self.guild(guild);
        self.for_each_slave(&gs, |slave| async move { slave.pause_playback().await })
            .await;

        let Some(player) = gs.player() else {
            return Ok(false);
        };
        if !player.status().paused {
            player.pause().await?;
        }
        Ok(true)
    }

    /// Resumes every Slave, then the shared player if it is paused.
    pub async fn resume(&self, guild: GuildId) -> PortResult<bool> {
        let gs = self.guild(guild);
        self.for_each_slave(&gs, |slave| async move { slave.resume_playback().await })
            .await;

        let Some(player) = gs.player() else {
            return Ok(false);
        };
        if player.status().paused {
            player.resume().await?;
        }
        Ok(true)
    }

    /// Seeks every Slave, then the shared player, to `position` (player time).
    ///
    /// Returns false when no track is loaded.
    pub async fn seek_to(&self, guild: GuildId, position: Duration) -> PortResult<bool> {
        let gs = self.guild(guild);
        self.for_each_slave(&gs, |slave| async move { slave.seek_to(position).await })
            .await;

        let Some(player) = gs.player() else {
            return Ok(false);
        };
        if player.status().track.is_none() {
            return Ok(false);
        }
        player.seek(position).await?;
        Ok(true)
    }

    /// Sets the shared player volume (0–150). Out-of-range values are ignored.
    pub async fn set_volume(&self, guild: GuildId, volume: u16) -> PortResult<bool> {
        if volume > PLAYER_VOLUME_MAX {
            return Ok(false);
        }
        let Some(player) = self.existing(guild).and_then(|gs| gs.player()) else {
            return Ok(false);
        };
        player.set_volume(volume).await?;
        Ok(true)
    }

    /// Forwards a finished track to the session that started it.
    pub async fn track_ended(&self, guild: GuildId, track: ResolvedTrack) {
        let listener = self
            .existing(guild)
            .and_then(|gs| gs.state.lock().finished_listener);
        match listener.and_then(|u| self.session(u)) {
            Some(session) => session.on_track_finished(track).await,
            None => log::debug!("[Coordinator] Track ended in guild {} with no listener", guild),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 24/7 Mode
    // ─────────────────────────────────────────────────────────────────────────

    /// Flips 24/7 mode and returns the new value.
    pub fn toggle_247(&self, guild: GuildId) -> bool {
        let gs = self.guild(guild);
        let (enabled, host, has_player) = {
            let mut st = gs.state.lock();
            st.always_on = !st.always_on;
            (st.always_on, st.host, st.player.is_some())
        };

        if enabled {
            gs.inactivity.signal();
        } else if let Some(host) = host {
            if let Some(session) = self.session(host) {
                session.on_disabled_247();
            }
        } else if has_player {
            self.arm_inactivity(&gs);
        }

        log::info!(
            "[Coordinator] 24/7 mode {} in guild {}",
            if enabled { "enabled" } else { "disabled" },
            guild
        );
        enabled
    }

    pub fn is_247(&self, guild: GuildId) -> bool {
        self.existing(guild)
            .is_some_and(|gs| gs.state.lock().always_on)
    }

    /// True when a paused Host must not be evicted: 24/7 mode is on and only
    /// the bot and the Host are in the channel.
    pub fn silence_exempt(&self, guild: GuildId) -> bool {
        self.is_247(guild) && self.surface.voice_member_count(guild) == 2
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Voice Connection
    // ─────────────────────────────────────────────────────────────────────────

    /// Connects the shared player to `voice_channel`.
    ///
    /// A player already in another channel is disconnected first. A fresh
    /// player gets the initial volume and starts the inactivity watcher.
    pub async fn connect(
        &self,
        guild: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> PortResult<()> {
        let gs = self.guild(guild);
        let existing = {
            let st = gs.state.lock();
            st.player.clone().map(|p| (p, st.voice_channel))
        };

        let moving = existing.is_some();
        if let Some((player, current)) = existing {
            if current == Some(voice_channel) {
                gs.state.lock().text_channel = Some(text_channel);
                return Ok(());
            }
            if let Err(e) = player.leave().await {
                log::warn!("[Coordinator] Failed to leave previous channel: {}", e);
            }
            gs.state.lock().player = None;
        }

        let player = self
            .backend
            .connect(guild, voice_channel, text_channel)
            .await?;
        if let Err(e) = player.set_volume(self.initial_volume).await {
            log::warn!("[Coordinator] Failed to set initial volume: {}", e);
        }

        {
            let mut st = gs.state.lock();
            st.player = Some(player);
            st.voice_channel = Some(voice_channel);
            st.text_channel = Some(text_channel);
        }
        self.arm_inactivity(&gs);

        log::info!(
            "[Coordinator] Connected to channel {} in guild {}",
            voice_channel,
            guild
        );
        if !moving {
            self.emit(PlaybackEvent::VoiceJoined {
                guild_id: guild,
                timestamp: now_millis(),
            });
        }
        Ok(())
    }

    /// Disconnects the shared player. Returns false if there was none.
    pub async fn leave(&self, guild: GuildId) -> bool {
        let Some(gs) = self.existing(guild) else {
            return false;
        };
        let player = {
            let mut st = gs.state.lock();
            st.voice_channel = None;
            st.text_channel = None;
            st.finished_listener = None;
            st.player.take()
        };
        let Some(player) = player else {
            return false;
        };

        if let Err(e) = player.leave().await {
            log::warn!("[Coordinator] Player leave failed in guild {}: {}", guild, e);
        }
        gs.inactivity.signal();

        log::info!("[Coordinator] Left voice in guild {}", guild);
        self.emit(PlaybackEvent::VoiceLeft {
            guild_id: guild,
            timestamp: now_millis(),
        });
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_connected(&self, guild: GuildId) -> bool {
        self.existing(guild).is_some_and(|gs| gs.player().is_some())
    }

    /// True when the shared player has a track loaded.
    pub fn is_playing(&self, guild: GuildId) -> bool {
        self.player_status(guild)
            .is_some_and(|status| status.track.is_some())
    }

    pub fn player_status(&self, guild: GuildId) -> Option<PlayerStatus> {
        self.existing(guild)?.player().map(|p| p.status())
    }

    pub fn voice_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.existing(guild)?.state.lock().voice_channel
    }

    pub fn text_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.existing(guild)?.state.lock().text_channel
    }

    pub fn voice_member_count(&self, guild: GuildId) -> usize {
        self.surface.voice_member_count(guild)
    }

    /// What the Host is playing, both sides.
    pub fn now_playing(&self, guild: GuildId) -> Option<TrackMetadataPair> {
        let host = self.host(guild)?;
        self.session(host)?.now_playing()
    }

    pub fn snapshot(&self, guild: GuildId) -> GuildSnapshot {
        let status = self.player_status(guild);
        let (voice_channel, text_channel, host, slaves, always_on) = match self.existing(guild) {
            Some(gs) => {
                let st = gs.state.lock();
                (
                    st.voice_channel,
                    st.text_channel,
                    st.host,
                    st.slaves.clone(),
                    st.always_on,
                )
            }
            None => (None, None, None, Vec::new(), false),
        };

        GuildSnapshot {
            guild_id: guild,
            connected: status.is_some(),
            voice_channel,
            text_channel,
            host,
            slaves,
            always_on,
            playing: status.as_ref().is_some_and(|s| s.track.is_some()),
            paused: status.as_ref().is_some_and(|s| s.paused),
            position_ms: status.map_or(0, |s| s.position.as_millis() as u64),
            now_playing: self.now_playing(guild),
        }
    }

    /// Leaves every voice channel. Sessions are stopped by the registry.
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.guilds.iter().map(|g| *g.key()).collect();
        let mut left = 0;
        for guild in guilds {
            if self.leave(guild).await {
                left += 1;
            }
        }
        log::info!("[Coordinator] Left {} voice channel(s)", left);
    }
}
