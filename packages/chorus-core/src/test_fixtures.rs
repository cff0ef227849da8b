//! In-memory collaborators for service tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::events::{EventEmitter, PlaybackEvent, SessionEvent};
use crate::ports::{
    AudioBackend, AudioPlayer, GuildSurface, PlayerStatus, PortError, PortResult, ResolvedTrack,
    TokenPair, TokenStore, TrackResolver,
};
use crate::services::{LinkedSession, SessionDirectory};
use crate::spotify::http::{SpotifyError, SpotifyResult};
use crate::spotify::protocol::{DeviceRegistration, DeviceStateUpdate};
use crate::spotify::SpotifyApi;
use crate::timebase::TimeBase;
use crate::types::{ChannelId, GuildId, TrackMetadataPair, UserId};
use crate::utils::track_id_from_uri;

/// A resolved track with a 100 second duration.
pub fn resolved_track(title: &str) -> ResolvedTrack {
    ResolvedTrack {
        title: title.to_string(),
        url: format!("https://media.example/{}", title.to_lowercase()),
        author: "Uploader".to_string(),
        duration: Duration::from_secs(100),
        encoded: format!("enc-{}", title.to_lowercase()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spotify
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockSpotifyState {
    calls: Vec<String>,
    fail_next: HashMap<&'static str, u16>,
    fail_always: HashMap<&'static str, u16>,
    state_updates: Vec<DeviceStateUpdate>,
    refresh_count: usize,
    refresh_fails: bool,
}

/// Scriptable [`SpotifyApi`] that records every call.
#[derive(Default)]
pub struct MockSpotifyApi {
    state: Mutex<MockSpotifyState>,
}

impl MockSpotifyApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next call of `op` with `status`.
    pub fn fail_next(&self, op: &'static str, status: u16) {
        self.state.lock().fail_next.insert(op, status);
    }

    /// Fails every call of `op` with `status`.
    pub fn fail_always(&self, op: &'static str, status: u16) {
        self.state.lock().fail_always.insert(op, status);
    }

    pub fn set_refresh_fails(&self, fails: bool) {
        self.state.lock().refresh_fails = fails;
    }

    pub fn refresh_count(&self) -> usize {
        self.state.lock().refresh_count
    }

    pub fn state_updates(&self) -> Vec<DeviceStateUpdate> {
        self.state.lock().state_updates.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Calls whose label starts with `prefix`.
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, op: &'static str, call: String) -> SpotifyResult<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        let status = state
            .fail_next
            .remove(op)
            .or_else(|| state.fail_always.get(op).copied());
        match status {
            Some(status) => Err(SpotifyError::Status {
                status,
                body: format!("{} failed", op),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SpotifyApi for MockSpotifyApi {
    async fn check_scope(&self, _token: &str) -> SpotifyResult<()> {
        self.record("check_scope", "check_scope".into())
    }

    async fn subscribe_notifications(&self, _token: &str, connection_id: &str) -> SpotifyResult<()> {
        self.record("notifications", format!("notifications {}", connection_id))
    }

    async fn probe_feature_flags(&self, _token: &str) -> SpotifyResult<()> {
        self.record("feature_flags", "feature_flags".into())
    }

    async fn register_device(
        &self,
        _token: &str,
        registration: &DeviceRegistration,
    ) -> SpotifyResult<u64> {
        self.record(
            "register_device",
            format!("register_device {}", registration.device.name),
        )?;
        Ok(10)
    }

    async fn set_device_volume(&self, _token: &str, _device_id: &str, volume: u16) -> SpotifyResult<()> {
        self.record("device_volume", format!("device_volume {}", volume))
    }

    async fn put_device_state(
        &self,
        _token: &str,
        _device_id: &str,
        update: &DeviceStateUpdate,
    ) -> SpotifyResult<()> {
        self.record("device_state", format!("device_state {}", update.seq_num))?;
        self.state.lock().state_updates.push(update.clone());
        Ok(())
    }

    async fn play(&self, _token: &str, uri: &str, position_ms: u64) -> SpotifyResult<()> {
        self.record("play", format!("play {} {}", uri, position_ms))
    }

    async fn resume(&self, _token: &str) -> SpotifyResult<()> {
        self.record("resume", "resume".into())
    }

    async fn pause(&self, _token: &str) -> SpotifyResult<()> {
        self.record("pause", "pause".into())
    }

    async fn seek(&self, _token: &str, position_ms: u64) -> SpotifyResult<()> {
        self.record("seek", format!("seek {}", position_ms))
    }

    async fn track_web_url(&self, _token: &str, uri: &str) -> SpotifyResult<String> {
        self.record("track", format!("track {}", uri))?;
        Ok(format!(
            "https://open.spotify.com/track/{}",
            track_id_from_uri(uri)
        ))
    }

    async fn refresh_access_token(&self, _refresh_token: &str) -> SpotifyResult<String> {
        let mut state = self.state.lock();
        if state.refresh_fails {
            return Err(SpotifyError::Status {
                status: 400,
                body: "invalid_grant".into(),
            });
        }
        state.refresh_count += 1;
        Ok(format!("fresh-{}", state.refresh_count))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audio
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MockPlayerState {
    status: PlayerStatus,
    ops: Vec<String>,
    volume: Option<u16>,
    left: bool,
}

/// [`AudioPlayer`] that tracks status and records operations.
#[derive(Default)]
pub struct MockPlayer {
    state: Mutex<MockPlayerState>,
}

impl MockPlayer {
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    pub fn set_position(&self, position: Duration) {
        self.state.lock().status.position = position;
    }

    /// Unloads the track as if it had ended.
    pub fn finish(&self) -> Option<ResolvedTrack> {
        let mut state = self.state.lock();
        state.status.position = Duration::ZERO;
        state.status.track.take()
    }

    pub fn volume(&self) -> Option<u16> {
        self.state.lock().volume
    }

    pub fn has_left(&self) -> bool {
        self.state.lock().left
    }
}

#[async_trait]
impl AudioPlayer for MockPlayer {
    async fn play(&self, track: &ResolvedTrack, offset: Duration) -> PortResult<()> {
        let mut state = self.state.lock();
        state
            .ops
            .push(format!("play {} {}", track.title, offset.as_millis()));
        state.status = PlayerStatus {
            track: Some(track.clone()),
            position: offset,
            paused: false,
        };
        Ok(())
    }

    async fn stop(&self) -> PortResult<()> {
        let mut state = self.state.lock();
        state.ops.push("stop".into());
        state.status.track = None;
        state.status.position = Duration::ZERO;
        Ok(())
    }

    async fn pause(&self) -> PortResult<()> {
        let mut state = self.state.lock();
        state.ops.push("pause".into());
        state.status.paused = true;
        Ok(())
    }

    async fn resume(&self) -> PortResult<()> {
        let mut state = self.state.lock();
        state.ops.push("resume".into());
        state.status.paused = false;
        Ok(())
    }

    async fn seek(&self, position: Duration) -> PortResult<()> {
        let mut state = self.state.lock();
        state.ops.push(format!("seek {}", position.as_millis()));
        state.status.position = position;
        Ok(())
    }

    async fn set_volume(&self, volume: u16) -> PortResult<()> {
        let mut state = self.state.lock();
        state.ops.push(format!("volume {}", volume));
        state.volume = Some(volume);
        Ok(())
    }

    fn status(&self) -> PlayerStatus {
        self.state.lock().status.clone()
    }

    async fn leave(&self) -> PortResult<()> {
        let mut state = self.state.lock();
        state.ops.push("leave".into());
        state.left = true;
        Ok(())
    }
}

/// [`AudioBackend`] handing out [`MockPlayer`]s.
#[derive(Default)]
pub struct MockBackend {
    players: Mutex<Vec<Arc<MockPlayer>>>,
    connects: Mutex<Vec<(GuildId, ChannelId)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_player(&self) -> Option<Arc<MockPlayer>> {
        self.players.lock().last().cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().len()
    }

    pub fn connects(&self) -> Vec<(GuildId, ChannelId)> {
        self.connects.lock().clone()
    }
}

#[async_trait]
impl AudioBackend for MockBackend {
    async fn connect(
        &self,
        guild: GuildId,
        voice_channel: ChannelId,
        _text_channel: ChannelId,
    ) -> PortResult<Arc<dyn AudioPlayer>> {
        self.connects.lock().push((guild, voice_channel));
        let player = Arc::new(MockPlayer::default());
        self.players.lock().push(Arc::clone(&player));
        Ok(player)
    }
}

/// [`TrackResolver`] that misses a configurable number of times.
#[derive(Default)]
pub struct MockResolver {
    misses: Mutex<usize>,
    queries: Mutex<Vec<String>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns nothing for the next `count` searches.
    pub fn miss(&self, count: usize) {
        *self.misses.lock() = count;
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl TrackResolver for MockResolver {
    async fn search(&self, query: &str) -> PortResult<Option<ResolvedTrack>> {
        self.queries.lock().push(query.to_string());
        let mut misses = self.misses.lock();
        if *misses > 0 {
            *misses -= 1;
            return Ok(None);
        }
        let title = query.rsplit(" - ").next().unwrap_or(query);
        Ok(Some(resolved_track(title)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Accounts
// ─────────────────────────────────────────────────────────────────────────────

/// [`TokenStore`] held in memory.
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<UserId, TokenPair>,
    names: DashMap<UserId, String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserId, access_token: &str, refresh_token: &str) {
        self.tokens.insert(
            user,
            TokenPair {
                access_token: access_token.to_string(),
                refresh_token: refresh_token.to_string(),
            },
        );
    }

    pub fn set_device_name(&self, user: UserId, name: &str) {
        self.names.insert(user, name.to_string());
    }

    pub fn access_token(&self, user: UserId) -> Option<String> {
        self.tokens.get(&user).map(|t| t.access_token.clone())
    }

    pub fn contains(&self, user: UserId) -> bool {
        self.tokens.contains_key(&user)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get_token(&self, user: UserId) -> PortResult<Option<TokenPair>> {
        Ok(self.tokens.get(&user).map(|t| t.clone()))
    }

    async fn update_access_token(&self, user: UserId, access_token: &str) -> PortResult<()> {
        match self.tokens.get_mut(&user) {
            Some(mut pair) => {
                pair.access_token = access_token.to_string();
                Ok(())
            }
            None => Err(PortError::Storage(format!("no token for {}", user))),
        }
    }

    async fn delete_token(&self, user: UserId) -> PortResult<()> {
        self.tokens.remove(&user);
        self.names.remove(&user);
        Ok(())
    }

    async fn device_name(&self, user: UserId) -> PortResult<Option<String>> {
        Ok(self.names.get(&user).map(|n| n.clone()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chat Surface
// ─────────────────────────────────────────────────────────────────────────────

/// [`GuildSurface`] with a fixed member count that records notices.
pub struct MockSurface {
    members: Mutex<usize>,
    notices: Mutex<Vec<(GuildId, ChannelId, String)>>,
}

impl MockSurface {
    pub fn new() -> Self {
        Self {
            members: Mutex::new(3),
            notices: Mutex::new(Vec::new()),
        }
    }

    pub fn set_member_count(&self, count: usize) {
        *self.members.lock() = count;
    }

    pub fn notices(&self) -> Vec<(GuildId, ChannelId, String)> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl GuildSurface for MockSurface {
    async fn notify(&self, guild: GuildId, channel: ChannelId, message: &str) -> PortResult<()> {
        self.notices
            .lock()
            .push((guild, channel, message.to_string()));
        Ok(())
    }

    fn voice_member_count(&self, _guild: GuildId) -> usize {
        *self.members.lock()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// [`EventEmitter`] that keeps every event.
#[derive(Default)]
pub struct RecordingEmitter {
    playback: Mutex<Vec<PlaybackEvent>>,
    session: Mutex<Vec<SessionEvent>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_events(&self) -> Vec<SessionEvent> {
        self.session.lock().clone()
    }

    pub fn host_assignments(&self) -> usize {
        self.playback
            .lock()
            .iter()
            .filter(|e| matches!(e, PlaybackEvent::HostAssigned { .. }))
            .count()
    }

    pub fn voice_joins(&self) -> usize {
        self.playback
            .lock()
            .iter()
            .filter(|e| matches!(e, PlaybackEvent::VoiceJoined { .. }))
            .count()
    }

    pub fn tracks_played(&self) -> Vec<String> {
        self.playback
            .lock()
            .iter()
            .filter_map(|e| match e {
                PlaybackEvent::TrackPlayed { uri, .. } => Some(uri.clone()),
                _ => None,
            })
            .collect()
    }

    /// Reasons of every `Terminated` event, in order.
    pub fn terminations(&self) -> Vec<&'static str> {
        self.session
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Terminated { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit_playback(&self, event: PlaybackEvent) {
        self.playback.lock().push(event);
    }

    fn emit_session(&self, event: SessionEvent) {
        self.session.lock().push(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────────────────────

/// [`LinkedSession`] that records what the coordinator asks of it.
pub struct RecordingSession {
    user: UserId,
    ops: Mutex<Vec<String>>,
    loaded: Mutex<Option<(String, TimeBase)>>,
}

impl RecordingSession {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            ops: Mutex::new(Vec::new()),
            loaded: Mutex::new(None),
        }
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn set_loaded(&self, uri: &str, timebase: TimeBase) {
        *self.loaded.lock() = Some((uri.to_string(), timebase));
    }

    pub fn timebase(&self) -> Option<TimeBase> {
        self.loaded.lock().as_ref().map(|(_, tb)| *tb)
    }

    fn push(&self, op: impl Into<String>) {
        self.ops.lock().push(op.into());
    }
}

#[async_trait]
impl LinkedSession for RecordingSession {
    fn user_id(&self) -> UserId {
        self.user
    }

    async fn play_track(&self, uri: &str, timebase: TimeBase, offset: Duration) {
        self.push(format!("play {} {}", uri, offset.as_millis()));
        *self.loaded.lock() = Some((uri.to_string(), timebase));
    }

    async fn seek_to(&self, position: Duration) {
        self.push(format!("seek {}", position.as_millis()));
    }

    async fn pause_playback(&self) {
        self.push("pause");
    }

    async fn resume_playback(&self) {
        self.push("resume");
    }

    fn close_connection(&self) {
        self.push("close");
    }

    async fn stop(&self) {
        self.push("stop");
    }

    fn on_disabled_247(&self) {
        self.push("disabled_247");
    }

    async fn on_track_finished(&self, track: ResolvedTrack) {
        self.push(format!("finished {}", track.title));
    }

    fn now_playing(&self) -> Option<TrackMetadataPair> {
        None
    }

    fn loaded_track(&self) -> Option<(String, TimeBase)> {
        self.loaded.lock().clone()
    }
}

/// [`SessionDirectory`] over a fixed set of [`RecordingSession`]s.
#[derive(Default)]
pub struct StaticDirectory {
    sessions: DashMap<UserId, Arc<RecordingSession>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user: UserId) -> Arc<RecordingSession> {
        let session = Arc::new(RecordingSession::new(user));
        self.sessions.insert(user, Arc::clone(&session));
        session
    }
}

impl SessionDirectory for StaticDirectory {
    fn linked_session(&self, user: UserId) -> Option<Arc<dyn LinkedSession>> {
        self.sessions
            .get(&user)
            .map(|s| Arc::clone(&s) as Arc<dyn LinkedSession>)
    }
}
