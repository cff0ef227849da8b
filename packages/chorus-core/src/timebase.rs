//! Position translation between Spotify time and player time.
//!
//! The audio the shared player renders is resolved from an external source,
//! so its duration rarely matches the Spotify track exactly. Positions are
//! scaled linearly by the ratio of the two durations.
//!
//! Spotify time is milliseconds (`u64`); player time is a [`Duration`].

use std::time::Duration;

/// Pair of durations describing the same track on both timelines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeBase {
    /// Duration reported by Spotify, in milliseconds.
    pub spotify_duration_ms: u64,
    /// Duration of the resolved audio track.
    pub player_duration: Duration,
}

impl TimeBase {
    pub fn new(spotify_duration_ms: u64, player_duration: Duration) -> Self {
        Self {
            spotify_duration_ms,
            player_duration,
        }
    }

    /// Returns true when both durations are known.
    pub fn is_known(&self) -> bool {
        self.spotify_duration_ms > 0 && !self.player_duration.is_zero()
    }

    /// Maps a Spotify position onto the player timeline.
    ///
    /// Returns zero when either duration is unknown.
    pub fn to_player(&self, spotify_position_ms: u64) -> Duration {
        if !self.is_known() {
            return Duration::ZERO;
        }
        let player_nanos = self.player_duration.as_nanos();
        let scaled =
            u128::from(spotify_position_ms) * player_nanos / u128::from(self.spotify_duration_ms);
        duration_from_nanos(scaled)
    }

    /// Maps a player position onto the Spotify timeline (rounded to the nearest millisecond).
    ///
    /// Returns zero when either duration is unknown.
    pub fn to_spotify(&self, player_position: Duration) -> u64 {
        if !self.is_known() {
            return 0;
        }
        let player_nanos = self.player_duration.as_nanos();
        let numerator = player_position.as_nanos() * u128::from(self.spotify_duration_ms);
        let rounded = (numerator + player_nanos / 2) / player_nanos;
        u64::try_from(rounded).unwrap_or(u64::MAX)
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    let sub = (nanos % 1_000_000_000) as u32;
    Duration::new(secs, sub)
}
