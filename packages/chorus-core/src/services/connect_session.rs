//! One linked user's virtual Spotify Connect device.
//!
//! A [`ConnectSession`] owns the dealer websocket, the handshake, the
//! [`ProtocolStateManager`] and the translation of Spotify commands into
//! shared-player actions. Depending on the role it holds in its guild it
//! either drives the shared player (Host) or mirrors the Host on the user's
//! own Spotify client (Slave).
//!
//! Lifecycle:
//! - `start` opens the connection and spawns the drive loop
//! - the first frame carrying a connection id triggers device registration
//! - a clean disconnect steps down from the role and reconnects after one
//!   second unless the session was stopped
//! - `stop` (or a fatal Spotify error) ends the session for good

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

use super::guild_coordinator::{GuildCoordinator, LinkedSession};
use super::idle_timer::IdleTimer;
use super::session_registry::SessionRegistry;
use crate::config::Config;
use crate::error::{SessionError, SessionResult};
use crate::events::{EventEmitter, SessionEvent};
use crate::ports::{ResolvedTrack, TokenPair, TokenStore, TrackResolver};
use crate::protocol_constants::{
    INACTIVITY_TIMEOUT_SECS, KEEPALIVE_INTERVAL_SECS, MAX_DEVICE_VOLUME, PONG_TIMEOUT_SECS,
    RESTART_DELAY_MS, TRACK_RESOLVE_ATTEMPTS,
};
use crate::spotify::dealer::{DealerConnection, DealerConnector, DealerEvent, DisconnectKind};
use crate::spotify::http::SpotifyResult;
use crate::spotify::protocol::{
    Command, DealerMessage, DeviceRegistration, ReplaceState, TrackMetadata, PING_FRAME,
};
use crate::spotify::{ProtocolStateManager, SpotifyApi, UserAuth};
use crate::timebase::TimeBase;
use crate::types::{
    ChannelId, GuildId, PlayerTrackInfo, Role, SpotifyTrackInfo, TrackMetadataPair, UserId,
};
use crate::utils::{build_track_query, generate_device_id, now_millis, validate_device_name};

/// Collaborators every session needs. Cheap to clone.
#[derive(Clone)]
pub struct SessionDeps {
    pub api: Arc<dyn SpotifyApi>,
    pub connector: Arc<dyn DealerConnector>,
    pub store: Arc<dyn TokenStore>,
    pub resolver: Arc<dyn TrackResolver>,
    pub coordinator: Arc<GuildCoordinator>,
    pub emitter: Arc<dyn EventEmitter>,
    pub config: Arc<Config>,
}

struct SessionFlags {
    guild: Option<GuildId>,
    voice_channel: Option<ChannelId>,
    /// Connection open and handlers running.
    initialized: bool,
    /// An open is in flight.
    connecting: bool,
    /// Bumped on every open; events from older connections are dropped.
    generation: u64,
    should_restart: bool,
    needs_connection_id: bool,
    role: Role,
    paused: bool,
    /// Swallows the next track-finished report.
    prevent_next_track: bool,
    device_name: String,
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            guild: None,
            voice_channel: None,
            initialized: false,
            connecting: false,
            generation: 0,
            should_restart: false,
            needs_connection_id: false,
            role: Role::Unassigned,
            paused: false,
            prevent_next_track: false,
            device_name: String::new(),
        }
    }
}

#[derive(Clone)]
struct LoadedTrack {
    uri: String,
    timebase: TimeBase,
}

pub struct ConnectSession {
    user: UserId,
    device_id: String,
    deps: SessionDeps,
    registry: Weak<SessionRegistry>,
    weak_self: Weak<Self>,
    auth: Arc<UserAuth>,
    flags: Mutex<SessionFlags>,
    metadata: Mutex<Option<TrackMetadataPair>>,
    loaded: Mutex<Option<LoadedTrack>>,
    /// Present between registration and the next disconnect.
    protocol: AsyncMutex<Option<ProtocolStateManager>>,
    dealer: Mutex<Option<DealerConnection>>,
    silence: IdleTimer,
    pong: Arc<Notify>,
}

impl ConnectSession {
    pub fn new(
        user: UserId,
        tokens: TokenPair,
        deps: SessionDeps,
        registry: Weak<SessionRegistry>,
    ) -> Arc<Self> {
        let auth = Arc::new(UserAuth::new(
            user,
            tokens,
            Arc::clone(&deps.api),
            Arc::clone(&deps.store),
        ));
        Arc::new_cyclic(|weak_self| Self {
            user,
            device_id: generate_device_id(),
            deps,
            registry,
            weak_self: weak_self.clone(),
            auth,
            flags: Mutex::new(SessionFlags::default()),
            metadata: Mutex::new(None),
            loaded: Mutex::new(None),
            protocol: AsyncMutex::new(None),
            dealer: Mutex::new(None),
            silence: IdleTimer::new(),
            pong: Arc::new(Notify::new()),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn user(&self) -> UserId {
        self.user
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn role(&self) -> Role {
        self.flags.lock().role
    }

    pub fn is_initialized(&self) -> bool {
        self.flags.lock().initialized
    }

    pub fn guild(&self) -> Option<GuildId> {
        self.flags.lock().guild
    }

    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.flags.lock().voice_channel
    }

    /// Display name registered with Spotify on the last open.
    pub fn device_name(&self) -> String {
        self.flags.lock().device_name.clone()
    }

    fn timebase(&self) -> TimeBase {
        self.loaded
            .lock()
            .as_ref()
            .map(|l| l.timebase)
            .unwrap_or_default()
    }

    /// Runs a Spotify call through the refresh-and-retry wrapper.
    async fn spotify<T, F, Fut>(&self, label: &str, op: F) -> SessionResult<T>
    where
        F: Fn(Arc<dyn SpotifyApi>, String) -> Fut,
        Fut: Future<Output = SpotifyResult<T>>,
    {
        let api = self.auth.api();
        self.auth
            .call(label, |token| op(Arc::clone(api), token))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Starts the session for `guild`. Returns false if it was already running.
    ///
    /// # Errors
    ///
    /// - [`SessionError::RefreshFailed`] when the stored token is unusable
    /// - [`SessionError::MissingScope`] when the account cannot web-play
    /// - [`SessionError::Dealer`] when the websocket cannot be opened
    pub async fn start(self: &Arc<Self>, guild: GuildId, voice_channel: ChannelId) -> SessionResult<bool> {
        {
            let mut flags = self.flags.lock();
            flags.guild = Some(guild);
            flags.voice_channel = Some(voice_channel);
        }
        if !self.begin_connect() {
            return Ok(false);
        }
        self.flags.lock().should_restart = true;

        let (events, generation) = self.open().await?;
        tokio::spawn(Arc::clone(self).drive(events, generation));
        Ok(true)
    }

    /// Reserves the right to open a connection.
    fn begin_connect(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.initialized || flags.connecting {
            return false;
        }
        flags.connecting = true;
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.flags.lock().generation == generation
    }

    async fn open(&self) -> SessionResult<(mpsc::UnboundedReceiver<DealerEvent>, u64)> {
        let result = self.try_open().await;
        self.flags.lock().connecting = false;
        result
    }

    async fn try_open(&self) -> SessionResult<(mpsc::UnboundedReceiver<DealerEvent>, u64)> {
        match self
            .spotify("check_scope", |api, token| async move { api.check_scope(&token).await })
            .await
        {
            Ok(()) => {}
            Err(e @ SessionError::RefreshFailed(_)) => return Err(e),
            Err(e) => {
                log::warn!("[ConnectSession] Scope check failed for {}: {}", self.user, e);
                return Err(SessionError::MissingScope);
            }
        }

        let device_name = self.resolve_device_name().await;
        let url = format!(
            "{}?access_token={}",
            self.deps.config.dealer_url,
            self.auth.access_token()
        );
        let (conn, events) = self.deps.connector.connect(&url).await?;

        *self.protocol.lock().await = None;
        let generation = {
            let mut flags = self.flags.lock();
            if !flags.should_restart {
                conn.dispose();
                return Err(SessionError::Stopped);
            }
            flags.generation += 1;
            flags.initialized = true;
            flags.needs_connection_id = true;
            flags.role = Role::Unassigned;
            flags.paused = false;
            flags.device_name = device_name;
            flags.generation
        };
        *self.dealer.lock() = Some(conn.clone());
        self.spawn_keepalive(conn);

        log::info!("[ConnectSession] Dealer connected for {}", self.user);
        Ok((events, generation))
    }

    /// Stored device name if valid, otherwise the configured default.
    async fn resolve_device_name(&self) -> String {
        let config = &self.deps.config;
        let stored = match self.deps.store.device_name(self.user).await {
            Ok(name) => name,
            Err(e) => {
                log::warn!("[ConnectSession] Could not load device name for {}: {}", self.user, e);
                None
            }
        };

        let name = match stored {
            Some(name) => match validate_device_name(&name) {
                Ok(()) => name.trim().to_string(),
                Err(e) => {
                    log::warn!(
                        "[ConnectSession] Ignoring device name of {}: {}",
                        self.user,
                        e
                    );
                    config.default_device_name.clone()
                }
            },
            None => config.default_device_name.clone(),
        };
        config.device_display_name(&name)
    }

    fn spawn_keepalive(&self, conn: DealerConnection) {
        let pong = Arc::clone(&self.pong);
        let user = self.user;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = conn.closed() => break,
                    _ = ticker.tick() => {}
                }
                if conn.send_text(PING_FRAME).is_err() {
                    break;
                }
                let timeout = Duration::from_secs(PONG_TIMEOUT_SECS);
                if tokio::time::timeout(timeout, pong.notified()).await.is_err() {
                    log::warn!("[ConnectSession] No pong for {}, closing dealer", user);
                    conn.dispose();
                    break;
                }
            }
        });
    }

    /// Processes dealer events until the session stops for good.
    async fn drive(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<DealerEvent>,
        mut generation: u64,
    ) {
        loop {
            let event = events.recv().await;
            if !self.is_current(generation) {
                break;
            }
            let Some(event) = event else {
                self.connection_lost().await;
                break;
            };

            match event {
                DealerEvent::Frame(text) => {
                    if let Err(e) = self.handle_frame(&text).await {
                        self.fail(e).await;
                    }
                }
                DealerEvent::Closed(DisconnectKind::Error) => {
                    log::debug!("[ConnectSession] Transport error for {}, ignoring", self.user);
                }
                DealerEvent::Closed(DisconnectKind::Clean) => {
                    if !self.on_clean_close().await {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(RESTART_DELAY_MS)).await;
                    if !self.flags.lock().should_restart || !self.begin_connect() {
                        break;
                    }
                    log::info!("[ConnectSession] Restarting session for {}", self.user);
                    match self.open().await {
                        Ok((next, next_generation)) => {
                            events = next;
                            generation = next_generation;
                        }
                        Err(e) => {
                            self.fail(e).await;
                            break;
                        }
                    }
                }
            }
        }
        log::debug!("[ConnectSession] Drive loop for {} ended", self.user);
    }

    /// Steps down after a clean close. Returns true if a restart is due.
    async fn on_clean_close(&self) -> bool {
        self.reset_connection_state().await;
        self.flags.lock().should_restart
    }

    /// The event channel ended without a clean close.
    async fn connection_lost(&self) {
        if self.is_initialized() {
            log::info!("[ConnectSession] Dealer connection lost for {}", self.user);
        }
        self.reset_connection_state().await;
    }

    async fn reset_connection_state(&self) {
        self.silence.signal();
        let guild = {
            let mut flags = self.flags.lock();
            flags.initialized = false;
            flags.guild
        };
        if let Some(guild) = guild {
            self.step_down(guild).await;
        }
        *self.protocol.lock().await = None;
        *self.dealer.lock() = None;
    }

    /// Gives up whatever role the coordinator holds for this user.
    async fn step_down(&self, guild: GuildId) {
        self.flags.lock().role = Role::Unassigned;
        let coordinator = &self.deps.coordinator;

        if coordinator.host(guild) == Some(self.user) {
            self.flags.lock().prevent_next_track = true;
            coordinator.retract_host(guild, self.user);
            if let Err(e) = coordinator.stop(guild).await {
                log::warn!("[ConnectSession] Failed to stop player in guild {}: {}", guild, e);
            }
            coordinator.release_slaves(guild);
        } else if coordinator.remove_slave(guild, self.user) {
            self.flags.lock().prevent_next_track = true;
        }
    }

    /// Closes the dealer connection. A restart follows unless stopped.
    fn dispose_connection(&self) {
        if let Some(conn) = self.dealer.lock().as_ref() {
            conn.dispose();
        }
    }

    /// Stops the session for good.
    pub async fn stop(&self) {
        self.terminate("stopped").await;
    }

    /// Stops the session for good, reporting `reason`.
    pub async fn terminate(&self, reason: &'static str) {
        let (was_active, guild) = {
            let mut flags = self.flags.lock();
            let was_active = flags.should_restart || flags.initialized;
            let guild = if flags.initialized { flags.guild } else { None };
            flags.should_restart = false;
            flags.initialized = false;
            (was_active, guild)
        };

        if let Some(guild) = guild {
            self.step_down(guild).await;
        }
        self.silence.signal();
        self.dispose_connection();

        if was_active {
            log::info!("[ConnectSession] Session for {} ended ({})", self.user, reason);
            self.deps.emitter.emit_session(SessionEvent::Terminated {
                user_id: self.user,
                reason,
                timestamp: now_millis(),
            });
        }
    }

    /// Handles an error that ends this session.
    async fn fail(&self, err: SessionError) {
        match err {
            SessionError::Stopped => {}
            SessionError::RefreshFailed(ref cause) => {
                log::error!(
                    "[ConnectSession] Token refresh failed for {}, unlinking: {}",
                    self.user,
                    cause
                );
                self.unlink().await;
            }
            other => {
                let reason = if other.is_device_evicted() {
                    "evicted"
                } else {
                    "failed"
                };
                log::warn!("[ConnectSession] Session for {} failed: {}", self.user, other);
                self.terminate(reason).await;
            }
        }
    }

    async fn unlink(&self) {
        match self.registry.upgrade() {
            Some(registry) => registry.unlink(self.user).await,
            None => {
                self.terminate("unlinked").await;
                if let Err(e) = self.deps.store.delete_token(self.user).await {
                    log::warn!("[ConnectSession] Failed to delete token of {}: {}", self.user, e);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Frames
    // ─────────────────────────────────────────────────────────────────────────

    async fn handle_frame(&self, text: &str) -> SessionResult<()> {
        let message = match DealerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("[ConnectSession] Unparseable frame: {}", e);
                return Ok(());
            }
        };

        match message {
            DealerMessage::Pong => self.pong.notify_one(),
            DealerMessage::Ping => {}
            DealerMessage::ConnectionId(id) => self.handshake(&id).await?,
            DealerMessage::Commands(commands) => {
                for command in commands {
                    self.handle_command(command).await?;
                }
            }
            DealerMessage::Other => {}
        }
        Ok(())
    }

    /// Registers the device. Runs once per connection.
    async fn handshake(&self, connection_id: &str) -> SessionResult<()> {
        let device_name = {
            let mut flags = self.flags.lock();
            if !flags.needs_connection_id {
                return Ok(());
            }
            flags.needs_connection_id = false;
            flags.device_name.clone()
        };

        self.spotify("notifications", |api, token| async move {
            api.subscribe_notifications(&token, connection_id).await
        })
        .await?;
        self.spotify("feature_flags", |api, token| async move {
            api.probe_feature_flags(&token).await
        })
        .await?;

        let registration = DeviceRegistration::new(connection_id, &self.device_id, &device_name);
        let registration = &registration;
        let seq_num = self
            .spotify("register_device", |api, token| async move {
                api.register_device(&token, registration).await
            })
            .await?;
        *self.protocol.lock().await = Some(ProtocolStateManager::new(
            self.device_id.clone(),
            seq_num,
            Arc::clone(&self.auth),
        ));

        let device_id = self.device_id.as_str();
        self.spotify("device_volume", |api, token| async move {
            api.set_device_volume(&token, device_id, MAX_DEVICE_VOLUME).await
        })
        .await?;

        log::info!(
            "[ConnectSession] Registered device \"{}\" for {}",
            device_name,
            self.user
        );
        self.deps.emitter.emit_session(SessionEvent::DeviceRegistered {
            user_id: self.user,
            device_id: self.device_id.clone(),
            timestamp: now_millis(),
        });
        Ok(())
    }

    async fn handle_command(&self, command: Command) -> SessionResult<()> {
        match command {
            Command::ReplaceState(state) => self.replace_state(*state).await,
            Command::SetVolume { volume } => self.set_volume(volume).await,
            Command::Unknown(payload) => {
                log::debug!("[ConnectSession] Ignoring command {}", payload);
                Ok(())
            }
        }
    }

    async fn set_volume(&self, volume: f64) -> SessionResult<()> {
        let volume = volume.clamp(0.0, f64::from(MAX_DEVICE_VOLUME)) as u16;
        let device_id = self.device_id.as_str();
        self.spotify("device_volume", |api, token| async move {
            api.set_device_volume(&token, device_id, volume).await
        })
        .await?;

        let (role, guild) = {
            let flags = self.flags.lock();
            (flags.role, flags.guild)
        };
        if let (Role::Host, Some(guild)) = (role, guild) {
            let player_volume = self.deps.config.player_volume(volume);
            if let Err(e) = self.deps.coordinator.set_volume(guild, player_volume).await {
                log::warn!("[ConnectSession] Failed to set player volume: {}", e);
            }
        }
        Ok(())
    }

    async fn replace_state(&self, state: ReplaceState) -> SessionResult<()> {
        let mut guard = self.protocol.lock().await;
        let Some(psm) = guard.as_mut() else {
            log::debug!("[ConnectSession] replace_state before registration, ignoring");
            return Ok(());
        };
        psm.replace_state(state);

        let Some(guild) = self.guild() else {
            return Ok(());
        };

        if !psm.is_playing_device() {
            psm.reset_stored_state_id();
            drop(guard);
            self.relinquish(guild).await;
            return Ok(());
        }

        let role = self.deps.coordinator.claim_role(guild, self.user).await.role();
        self.flags.lock().role = role;

        if psm.states_match() {
            self.apply_transport_delta(psm, guild, role).await
        } else {
            self.load_state(psm, guild, role).await
        }
    }

    /// Spotify moved playback to another device.
    async fn relinquish(&self, guild: GuildId) {
        let coordinator = &self.deps.coordinator;
        let had_role =
            coordinator.host(guild) == Some(self.user) || coordinator.has_slave(guild, self.user);
        if !had_role {
            return;
        }
        log::info!("[ConnectSession] {} moved playback elsewhere", self.user);
        self.step_down(guild).await;
        self.dispose_connection();
    }

    /// Same state: apply only pause and seek changes.
    async fn apply_transport_delta(
        &self,
        psm: &mut ProtocolStateManager,
        guild: GuildId,
        role: Role,
    ) -> SessionResult<()> {
        let coordinator = &self.deps.coordinator;
        if !coordinator.is_playing(guild) {
            return Ok(());
        }

        let timebase = self.timebase();
        let position = coordinator
            .player_status(guild)
            .map(|s| s.position)
            .unwrap_or_default();
        let position_ms = timebase.to_spotify(position);
        let mut acknowledged = false;

        let paused = psm.paused();
        let was_paused = std::mem::replace(&mut self.flags.lock().paused, paused);
        if paused != was_paused {
            if role == Role::Host {
                let result = if paused {
                    coordinator.pause(guild).await
                } else {
                    coordinator.resume(guild).await
                };
                if let Err(e) = result {
                    log::warn!("[ConnectSession] Player transport failed: {}", e);
                }
            }
            if role == Role::Host {
                if paused {
                    self.arm_silence(guild);
                } else {
                    self.silence.signal();
                }
            }
            psm.emit_paused(position_ms, paused).await?;
            acknowledged = true;
        }

        if let Some(seek) = psm.seek_to() {
            if role == Role::Host {
                if let Err(e) = coordinator.seek_to(guild, timebase.to_player(seek)).await {
                    log::warn!("[ConnectSession] Player seek failed: {}", e);
                }
            }
            psm.emit_position_changed(seek, position_ms).await?;
            acknowledged = true;
        }

        if !acknowledged {
            psm.emit_modify(position_ms).await?;
        }
        Ok(())
    }

    /// New state: load the track it points at.
    async fn load_state(
        &self,
        psm: &mut ProtocolStateManager,
        guild: GuildId,
        role: Role,
    ) -> SessionResult<()> {
        psm.apply_current_state_id();
        let paused = psm.paused();
        self.flags.lock().paused = paused;
        psm.emit_before_track_load().await?;

        let seek = psm.seek_to().unwrap_or(0);
        if role == Role::Host {
            let Some(track) = psm.current_track().cloned() else {
                return Ok(());
            };
            if !self.host_play(guild, &track).await {
                return Ok(());
            }
            if seek > 0 {
                let offset = self.timebase().to_player(seek);
                if let Err(e) = self.deps.coordinator.seek_to(guild, offset).await {
                    log::warn!("[ConnectSession] Initial seek failed: {}", e);
                }
            }
        }

        psm.emit_position_changed(seek, 0).await?;
        self.honour_start_state(psm, guild, role, seek).await
    }

    /// Pauses a track that starts paused, otherwise clears the silence watch.
    async fn honour_start_state(
        &self,
        psm: &mut ProtocolStateManager,
        guild: GuildId,
        role: Role,
        position_ms: u64,
    ) -> SessionResult<()> {
        if !psm.paused() {
            self.silence.signal();
            return Ok(());
        }

        if role == Role::Host {
            if let Err(e) = self.deps.coordinator.pause(guild).await {
                log::warn!("[ConnectSession] Player pause failed: {}", e);
            }
        }
        psm.emit_paused(position_ms, true).await?;
        if role == Role::Host {
            self.arm_silence(guild);
        }
        Ok(())
    }

    /// Resolves and starts `track` on the shared player. Returns false on failure.
    async fn host_play(&self, guild: GuildId, track: &TrackMetadata) -> bool {
        let authors = track.author_names();
        let query = build_track_query(&authors, &track.name);
        let Some(resolved) = self.resolve(&query).await else {
            log::warn!(
                "[ConnectSession] No audio found for \"{}\" after {} attempts",
                query,
                TRACK_RESOLVE_ATTEMPTS
            );
            return false;
        };

        let web_url = match self
            .auth
            .api()
            .track_web_url(&self.auth.access_token(), &track.uri)
            .await
        {
            Ok(url) => Some(url),
            Err(e) => {
                log::debug!("[ConnectSession] No web URL for {}: {}", track.uri, e);
                None
            }
        };

        let timebase = TimeBase::new(track.duration, resolved.duration);
        *self.metadata.lock() = Some(TrackMetadataPair {
            spotify: SpotifyTrackInfo {
                uri: track.uri.clone(),
                name: track.name.clone(),
                authors,
                duration_ms: track.duration,
                web_url,
            },
            player: PlayerTrackInfo {
                title: resolved.title.clone(),
                url: resolved.url.clone(),
                uploader: resolved.author.clone(),
                duration: resolved.duration,
            },
        });
        *self.loaded.lock() = Some(LoadedTrack {
            uri: track.uri.clone(),
            timebase,
        });

        let coordinator = &self.deps.coordinator;
        if coordinator.is_playing(guild) {
            self.flags.lock().prevent_next_track = true;
        }
        if let Err(e) = coordinator.play(guild, &resolved, &track.uri, timebase).await {
            log::warn!("[ConnectSession] Failed to start \"{}\": {}", resolved.title, e);
            return false;
        }
        true
    }

    async fn resolve(&self, query: &str) -> Option<ResolvedTrack> {
        for attempt in 1..=TRACK_RESOLVE_ATTEMPTS {
            match self.deps.resolver.search(query).await {
                Ok(Some(track)) => return Some(track),
                Ok(None) => {
                    log::debug!("[ConnectSession] Attempt {} found nothing for \"{}\"", attempt, query)
                }
                Err(e) => log::debug!("[ConnectSession] Attempt {} failed: {}", attempt, e),
            }
        }
        None
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Silence Watcher
    // ─────────────────────────────────────────────────────────────────────────

    /// Disconnects after a long pause unless the guild is exempt.
    fn arm_silence(&self, guild: GuildId) {
        if self.deps.coordinator.silence_exempt(guild) {
            return;
        }
        let weak = self.weak_self.clone();
        self.silence.arm(
            Duration::from_secs(INACTIVITY_TIMEOUT_SECS),
            async move {
                if let Some(session) = weak.upgrade() {
                    session.silence_elapsed(guild);
                }
            },
        );
    }

    fn silence_elapsed(&self, guild: GuildId) {
        if self.deps.coordinator.silence_exempt(guild) {
            return;
        }
        log::info!("[ConnectSession] {} paused too long, disconnecting", self.user);
        self.dispose_connection();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Track End
    // ─────────────────────────────────────────────────────────────────────────

    async fn advance(&self, guild: GuildId, finished_ms: u64) -> SessionResult<()> {
        let mut guard = self.protocol.lock().await;
        let Some(psm) = guard.as_mut() else {
            return Ok(());
        };

        psm.track_data_finalized(finished_ms).await?;
        if !psm.advance_track() {
            log::debug!("[ConnectSession] Context exhausted for {}", self.user);
            return Ok(());
        }

        psm.apply_current_state_id();
        self.flags.lock().paused = psm.paused();
        psm.emit_before_track_load().await?;

        let Some(track) = psm.current_track().cloned() else {
            return Ok(());
        };
        if !self.host_play(guild, &track).await {
            return Ok(());
        }
        psm.emit_position_changed(0, 0).await?;
        self.honour_start_state(psm, guild, Role::Host, 0).await
    }
}

#[async_trait]
impl LinkedSession for ConnectSession {
    fn user_id(&self) -> UserId {
        self.user
    }

    async fn play_track(&self, uri: &str, timebase: TimeBase, offset: Duration) {
        *self.loaded.lock() = Some(LoadedTrack {
            uri: uri.to_string(),
            timebase,
        });
        if !self.is_initialized() {
            return;
        }

        let position_ms = timebase.to_spotify(offset);
        if let Err(e) = self
            .spotify("play", |api, token| async move {
                api.play(&token, uri, position_ms).await
            })
            .await
        {
            self.fail(e).await;
        }
    }

    async fn seek_to(&self, position: Duration) {
        if !self.is_initialized() {
            return;
        }
        let position_ms = self.timebase().to_spotify(position);
        if let Err(e) = self
            .spotify("seek", |api, token| async move { api.seek(&token, position_ms).await })
            .await
        {
            self.fail(e).await;
        }
    }

    async fn pause_playback(&self) {
        if !self.is_initialized() {
            return;
        }
        if let Err(e) = self
            .spotify("pause", |api, token| async move { api.pause(&token).await })
            .await
        {
            self.fail(e).await;
        }
    }

    async fn resume_playback(&self) {
        if !self.is_initialized() {
            return;
        }
        if let Err(e) = self
            .spotify("resume", |api, token| async move { api.resume(&token).await })
            .await
        {
            self.fail(e).await;
        }
    }

    fn close_connection(&self) {
        self.dispose_connection();
    }

    async fn stop(&self) {
        ConnectSession::stop(self).await;
    }

    fn on_disabled_247(&self) {
        let (eligible, guild) = {
            let flags = self.flags.lock();
            (flags.initialized && flags.paused, flags.guild)
        };
        if let (true, Some(guild)) = (eligible, guild) {
            self.arm_silence(guild);
        }
    }

    async fn on_track_finished(&self, track: ResolvedTrack) {
        let prevented = {
            let mut flags = self.flags.lock();
            if !flags.initialized {
                flags.prevent_next_track = false;
                return;
            }
            std::mem::take(&mut flags.prevent_next_track)
        };
        if prevented {
            log::debug!("[ConnectSession] Suppressed end of \"{}\"", track.title);
            return;
        }

        let Some(guild) = self.guild() else {
            return;
        };
        if self.deps.coordinator.host(guild) != Some(self.user) {
            return;
        }

        self.arm_silence(guild);
        let finished_ms = self.timebase().spotify_duration_ms;
        *self.metadata.lock() = None;

        if let Err(e) = self.advance(guild, finished_ms).await {
            self.fail(e).await;
        }
    }

    fn now_playing(&self) -> Option<TrackMetadataPair> {
        self.metadata.lock().clone()
    }

    fn loaded_track(&self) -> Option<(String, TimeBase)> {
        self.loaded
            .lock()
            .as_ref()
            .map(|l| (l.uri.clone(), l.timebase))
    }
}
