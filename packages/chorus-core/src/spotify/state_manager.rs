//! Sequence numbers and authoritative state identity for one virtual device.
//!
//! Spotify drives the device with `replace_state` commands; the device
//! answers each transition with a `PUT .../state` acknowledgement carrying a
//! strictly increasing sequence number. [`ProtocolStateManager`] owns that
//! counter, the latest state machine, and the id of the state the device has
//! actually applied, which is what distinguishes "same track, new transport"
//! from "new track".

use std::sync::Arc;

use super::auth::UserAuth;
use super::protocol::{
    DebugSource, DeviceStateUpdate, OutboundStateRef, PlaybackState, PlaybackStats, ReplaceState,
    SubState, TrackMetadata,
};
use crate::error::SessionResult;
use crate::utils::now_millis;

pub struct ProtocolStateManager {
    device_id: String,
    seq_num: u64,
    auth: Arc<UserAuth>,
    current: Option<ReplaceState>,
    applied_state_id: Option<String>,
}

impl ProtocolStateManager {
    /// Creates a manager for a freshly registered device.
    pub fn new(device_id: impl Into<String>, initial_seq_num: u64, auth: Arc<UserAuth>) -> Self {
        Self {
            device_id: device_id.into(),
            seq_num: initial_seq_num,
            auth,
            current: None,
            applied_state_id: None,
        }
    }

    pub fn seq_num(&self) -> u64 {
        self.seq_num
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inbound State
    // ─────────────────────────────────────────────────────────────────────────

    /// Stores the latest `replace_state` command.
    pub fn replace_state(&mut self, state: ReplaceState) {
        self.current = Some(state);
    }

    /// Returns true while Spotify still targets this device.
    pub fn is_playing_device(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|s| s.state_ref.is_some())
    }

    pub fn paused(&self) -> bool {
        self.current
            .as_ref()
            .and_then(|s| s.state_ref.as_ref())
            .is_some_and(|r| r.paused)
    }

    /// Requested seek position in Spotify time, if any.
    pub fn seek_to(&self) -> Option<u64> {
        self.current.as_ref().and_then(|s| s.seek_to)
    }

    fn current_state(&self) -> Option<&PlaybackState> {
        let state = self.current.as_ref()?;
        let index = state.state_ref.as_ref()?.state_index;
        state.state_machine.states.get(index)
    }

    fn current_state_id(&self) -> Option<&str> {
        self.current_state().map(|s| s.state_id.as_str())
    }

    /// Metadata of the track the current state points at.
    pub fn current_track(&self) -> Option<&TrackMetadata> {
        let state = self.current.as_ref()?;
        let track = self.current_state()?.track;
        state.state_machine.tracks.get(track).map(|t| &t.metadata)
    }

    fn current_duration(&self) -> u64 {
        self.current_track().map_or(0, |t| t.duration)
    }

    /// Returns true when the current state is the one already applied.
    pub fn states_match(&self) -> bool {
        match (self.applied_state_id.as_deref(), self.current_state_id()) {
            (Some(applied), Some(current)) => applied == current,
            _ => false,
        }
    }

    /// Marks the current state as applied.
    pub fn apply_current_state_id(&mut self) {
        self.applied_state_id = self.current_state_id().map(str::to_string);
    }

    /// Forgets the applied state so the next `replace_state` is treated as new.
    pub fn reset_stored_state_id(&mut self) {
        self.applied_state_id = None;
    }

    /// Follows the current state's `advance` transition.
    ///
    /// Returns false when there is no next state (end of context).
    pub fn advance_track(&mut self) -> bool {
        let Some(transition) = self
            .current_state()
            .and_then(|s| s.transitions.advance.clone())
        else {
            return false;
        };

        let Some(state) = self.current.as_mut() else {
            return false;
        };
        if transition.state_index >= state.state_machine.states.len() {
            return false;
        }
        let Some(state_ref) = state.state_ref.as_mut() else {
            return false;
        };

        state_ref.state_index = transition.state_index;
        state_ref.paused = transition.paused;
        state.seek_to = None;
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Acknowledgements
    // ─────────────────────────────────────────────────────────────────────────

    /// Builds the next acknowledgement, consuming a sequence number.
    fn next_update(
        &mut self,
        debug_source: DebugSource,
        position: u64,
        previous_position: Option<u64>,
        paused: bool,
        playback_speed: u64,
    ) -> DeviceStateUpdate {
        self.seq_num += 1;

        let (state_machine_id, state_id) = match (self.current.as_ref(), self.current_state_id()) {
            (Some(s), Some(id)) => (s.state_machine.state_machine_id.clone(), id.to_string()),
            (Some(s), None) => (s.state_machine.state_machine_id.clone(), String::new()),
            _ => (String::new(), String::new()),
        };

        DeviceStateUpdate {
            seq_num: self.seq_num,
            previous_position,
            playback_stats: (debug_source == DebugSource::TrackDataFinalized)
                .then(|| PlaybackStats::healthy(now_millis())),
            state_ref: OutboundStateRef {
                paused,
                state_id,
                state_machine_id,
            },
            sub_state: SubState {
                stream_time: position,
                position,
                playback_speed,
                duration: self.current_duration(),
            },
            debug_source,
        }
    }

    async fn send(&self, update: DeviceStateUpdate) -> SessionResult<()> {
        log::debug!(
            "[ProtocolState] {:?} seq={} position={}",
            update.debug_source,
            update.seq_num,
            update.sub_state.position
        );
        let api = Arc::clone(self.auth.api());
        let device_id = self.device_id.as_str();
        let update = &update;
        self.auth
            .call("device_state", |token| {
                let api = Arc::clone(&api);
                async move { api.put_device_state(&token, device_id, update).await }
            })
            .await
    }

    /// Announces that a new track is about to load.
    pub async fn emit_before_track_load(&mut self) -> SessionResult<()> {
        let paused = self.paused();
        let update = self.next_update(DebugSource::BeforeTrackLoad, 0, None, paused, 0);
        self.send(update).await
    }

    /// Reports a position jump (track start or seek).
    pub async fn emit_position_changed(&mut self, position: u64, previous: u64) -> SessionResult<()> {
        let paused = self.paused();
        let speed = u64::from(!paused);
        let update = self.next_update(
            DebugSource::PositionChanged,
            position,
            Some(previous),
            paused,
            speed,
        );
        self.send(update).await
    }

    /// Reports a pause or resume at `position`.
    pub async fn emit_paused(&mut self, position: u64, paused: bool) -> SessionResult<()> {
        let speed = u64::from(!paused);
        let update = self.next_update(
            DebugSource::ModifyCurrentState,
            position,
            Some(position),
            paused,
            speed,
        );
        self.send(update).await
    }

    /// Acknowledges a state change that moved neither pause nor position.
    pub async fn emit_modify(&mut self, position: u64) -> SessionResult<()> {
        let paused = self.paused();
        let speed = u64::from(!paused);
        let update = self.next_update(
            DebugSource::ModifyCurrentState,
            position,
            Some(position),
            paused,
            speed,
        );
        self.send(update).await
    }

    /// Reports that the current track finished at `previous_position`.
    pub async fn track_data_finalized(&mut self, previous_position: u64) -> SessionResult<()> {
        let paused = self.paused();
        let update = self.next_update(
            DebugSource::TrackDataFinalized,
            previous_position,
            Some(previous_position),
            paused,
            0,
        );
        self.send(update).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::TokenPair;
    use crate::spotify::protocol::fixtures::{replace_state, replace_state_inactive};
    use crate::spotify::protocol::{Command, DealerMessage};
    use crate::test_fixtures::{MemoryTokenStore, MockSpotifyApi};
    use crate::types::UserId;

    fn parse_state(frame: &str) -> ReplaceState {
        match DealerMessage::parse(frame).unwrap() {
            DealerMessage::Commands(mut cmds) => match cmds.remove(0) {
                Command::ReplaceState(state) => *state,
                other => panic!("unexpected command {other:?}"),
            },
            other => panic!("unexpected frame {other:?}"),
        }
    }

    fn manager(api: Arc<MockSpotifyApi>) -> ProtocolStateManager {
        let auth = Arc::new(UserAuth::new(
            UserId(1),
            TokenPair {
                access_token: "tok".into(),
                refresh_token: "ref".into(),
            },
            api,
            Arc::new(MemoryTokenStore::new()),
        ));
        ProtocolStateManager::new("device", 10, auth)
    }

    #[tokio::test]
    async fn sequence_numbers_strictly_increase() {
        let api = Arc::new(MockSpotifyApi::new());
        let mut psm = manager(Arc::clone(&api));
        psm.replace_state(parse_state(&replace_state(0, false, None)));

        psm.emit_before_track_load().await.unwrap();
        psm.emit_position_changed(0, 0).await.unwrap();
        psm.emit_paused(1000, true).await.unwrap();
        psm.emit_modify(1000).await.unwrap();
        psm.track_data_finalized(2000).await.unwrap();

        let seqs: Vec<u64> = api.state_updates().iter().map(|u| u.seq_num).collect();
        assert_eq!(seqs, vec![11, 12, 13, 14, 15]);
    }

    #[tokio::test]
    async fn acknowledgements_describe_current_state() {
        let api = Arc::new(MockSpotifyApi::new());
        let mut psm = manager(Arc::clone(&api));
        psm.replace_state(parse_state(&replace_state(0, false, None)));

        psm.emit_position_changed(5000, 1200).await.unwrap();
        psm.emit_paused(5000, true).await.unwrap();

        let updates = api.state_updates();
        let moved = &updates[0];
        assert_eq!(moved.debug_source, DebugSource::PositionChanged);
        assert_eq!(moved.previous_position, Some(1200));
        assert_eq!(moved.state_ref.state_id, "s-0");
        assert_eq!(moved.state_ref.state_machine_id, "sm-1");
        assert_eq!(moved.sub_state.position, 5000);
        assert_eq!(moved.sub_state.stream_time, 5000);
        assert_eq!(moved.sub_state.playback_speed, 1);
        assert_eq!(moved.sub_state.duration, 200_000);

        let paused = &updates[1];
        assert_eq!(paused.debug_source, DebugSource::ModifyCurrentState);
        assert!(paused.state_ref.paused);
        assert_eq!(paused.sub_state.playback_speed, 0);
    }

    #[tokio::test]
    async fn finalized_carries_playback_stats() {
        let api = Arc::new(MockSpotifyApi::new());
        let mut psm = manager(Arc::clone(&api));
        psm.replace_state(parse_state(&replace_state(0, false, None)));

        psm.track_data_finalized(199_000).await.unwrap();

        let update = &api.state_updates()[0];
        let stats = update.playback_stats.as_ref().unwrap();
        assert_eq!(stats.total_bytes, 2_118_720);
        assert_eq!(stats.audiocodec, "mp4");
    }

    #[test]
    fn states_match_only_after_apply() {
        let mut psm = manager(Arc::new(MockSpotifyApi::new()));
        psm.replace_state(parse_state(&replace_state(0, false, None)));
        assert!(!psm.states_match());

        psm.apply_current_state_id();
        assert!(psm.states_match());

        psm.replace_state(parse_state(&replace_state(0, true, Some(3000))));
        assert!(psm.states_match());
        assert!(psm.paused());
        assert_eq!(psm.seek_to(), Some(3000));

        psm.replace_state(parse_state(&replace_state(1, false, None)));
        assert!(!psm.states_match());

        psm.reset_stored_state_id();
        psm.replace_state(parse_state(&replace_state(0, false, None)));
        assert!(!psm.states_match());
    }

    #[test]
    fn advance_follows_transition_until_exhausted() {
        let mut psm = manager(Arc::new(MockSpotifyApi::new()));
        psm.replace_state(parse_state(&replace_state(0, false, Some(9000))));
        assert_eq!(psm.current_track().unwrap().uri, "spotify:track:one");

        assert!(psm.advance_track());
        assert_eq!(psm.current_track().unwrap().uri, "spotify:track:two");
        assert_eq!(psm.seek_to(), None);

        assert!(!psm.advance_track());
        assert_eq!(psm.current_track().unwrap().uri, "spotify:track:two");
    }

    #[test]
    fn inactive_state_is_not_playing_device() {
        let mut psm = manager(Arc::new(MockSpotifyApi::new()));
        assert!(!psm.is_playing_device());
        psm.replace_state(parse_state(&replace_state(0, false, None)));
        assert!(psm.is_playing_device());

        psm.replace_state(parse_state(&replace_state_inactive()));
        assert!(!psm.is_playing_device());
        assert!(psm.current_track().is_none());
        assert!(!psm.advance_track());
    }
}
