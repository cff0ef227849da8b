//! Clock-driven stand-in for a voice audio backend.
//!
//! No audio leaves the process: each player only tracks what it would be
//! playing and where, and reports a track end once the track's remaining
//! time has elapsed. This keeps the shared player's position honest for the
//! sync logic when the server runs without a voice transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chorus_core::{
    AudioBackend, AudioPlayer, ChannelId, GuildId, PlayerStatus, PortError, PortResult,
    ResolvedTrack,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Track ends reported by headless players.
pub type TrackEnds = mpsc::UnboundedReceiver<(GuildId, ResolvedTrack)>;

pub struct HeadlessBackend {
    ended_tx: mpsc::UnboundedSender<(GuildId, ResolvedTrack)>,
}

impl HeadlessBackend {
    pub fn new() -> (Self, TrackEnds) {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        (Self { ended_tx }, ended_rx)
    }
}

#[async_trait]
impl AudioBackend for HeadlessBackend {
    async fn connect(
        &self,
        guild: GuildId,
        voice_channel: ChannelId,
        _text_channel: ChannelId,
    ) -> PortResult<Arc<dyn AudioPlayer>> {
        log::info!("[Headless] Player for {} joined {}", guild, voice_channel);
        Ok(Arc::new(HeadlessPlayer::new(guild, self.ended_tx.clone())))
    }
}

struct PlayerState {
    track: Option<ResolvedTrack>,
    /// Position when `resumed_at` was taken.
    offset: Duration,
    resumed_at: Instant,
    paused: bool,
    volume: u16,
    left: bool,
    /// Bumped on every change so stale end timers can tell they lost.
    generation: u64,
}

impl PlayerState {
    fn position(&self) -> Duration {
        let Some(track) = &self.track else {
            return Duration::ZERO;
        };
        let position = if self.paused {
            self.offset
        } else {
            self.offset + self.resumed_at.elapsed()
        };
        position.min(track.duration)
    }

    fn set_position(&mut self, position: Duration) {
        self.offset = position;
        self.resumed_at = Instant::now();
    }
}

pub struct HeadlessPlayer {
    guild: GuildId,
    state: Arc<Mutex<PlayerState>>,
    ended_tx: mpsc::UnboundedSender<(GuildId, ResolvedTrack)>,
}

impl HeadlessPlayer {
    fn new(guild: GuildId, ended_tx: mpsc::UnboundedSender<(GuildId, ResolvedTrack)>) -> Self {
        Self {
            guild,
            state: Arc::new(Mutex::new(PlayerState {
                track: None,
                offset: Duration::ZERO,
                resumed_at: Instant::now(),
                paused: false,
                volume: 100,
                left: false,
                generation: 0,
            })),
            ended_tx,
        }
    }

    /// Applies `change` to a connected player and re-arms the end timer.
    fn update(&self, change: impl FnOnce(&mut PlayerState)) -> PortResult<()> {
        let mut state = self.state.lock();
        if state.left {
            return Err(PortError::NotConnected);
        }
        change(&mut state);
        state.generation += 1;
        self.arm_end_timer(&state);
        Ok(())
    }

    fn arm_end_timer(&self, state: &PlayerState) {
        let Some(track) = &state.track else {
            return;
        };
        if state.paused || track.duration.is_zero() {
            return;
        }

        let remaining = track.duration.saturating_sub(state.position());
        let generation = state.generation;
        let shared = Arc::clone(&self.state);
        let ended_tx = self.ended_tx.clone();
        let guild = self.guild;

        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let finished = {
                let mut state = shared.lock();
                if state.generation != generation || state.paused || state.left {
                    return;
                }
                state.generation += 1;
                state.offset = Duration::ZERO;
                state.track.take()
            };
            if let Some(track) = finished {
                log::debug!("[Headless] {} finished \"{}\"", guild, track.title);
                let _ = ended_tx.send((guild, track));
            }
        });
    }
}

#[async_trait]
impl AudioPlayer for HeadlessPlayer {
    async fn play(&self, track: &ResolvedTrack, offset: Duration) -> PortResult<()> {
        log::info!(
            "[Headless] {} playing \"{}\" from {}ms",
            self.guild,
            track.title,
            offset.as_millis()
        );
        self.update(|state| {
            state.track = Some(track.clone());
            state.paused = false;
            state.set_position(offset);
        })
    }

    async fn stop(&self) -> PortResult<()> {
        self.update(|state| {
            state.track = None;
            state.paused = false;
            state.set_position(Duration::ZERO);
        })
    }

    async fn pause(&self) -> PortResult<()> {
        self.update(|state| {
            if !state.paused {
                let position = state.position();
                state.set_position(position);
                state.paused = true;
            }
        })
    }

    async fn resume(&self) -> PortResult<()> {
        self.update(|state| {
            if state.paused {
                state.resumed_at = Instant::now();
                state.paused = false;
            }
        })
    }

    async fn seek(&self, position: Duration) -> PortResult<()> {
        self.update(|state| state.set_position(position))
    }

    async fn set_volume(&self, volume: u16) -> PortResult<()> {
        let mut state = self.state.lock();
        if state.left {
            return Err(PortError::NotConnected);
        }
        state.volume = volume.min(150);
        log::debug!("[Headless] {} volume {}", self.guild, state.volume);
        Ok(())
    }

    fn status(&self) -> PlayerStatus {
        let state = self.state.lock();
        PlayerStatus {
            track: state.track.clone(),
            position: state.position(),
            paused: state.paused,
        }
    }

    async fn leave(&self) -> PortResult<()> {
        let mut state = self.state.lock();
        state.left = true;
        state.track = None;
        state.generation += 1;
        log::info!("[Headless] Player for {} left", self.guild);
        Ok(())
    }
}
