//! Wire types for the dealer websocket and the track-playback endpoints.
//!
//! Inbound frames are decoded into [`DealerMessage`]; commands are an
//! exhaustive [`Command`] enum so unknown commands are handled explicitly.
//! Outbound types serialize to the exact JSON the web player sends.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol_constants::{
    CLIENT_VERSION, CONNECTION_ID_HEADER, DEVICE_BRAND, DEVICE_MODEL, DEVICE_TYPE,
    MANIFEST_FORMATS, MAX_DEVICE_VOLUME, STATS_AUDIO_CODEC, STATS_KEY_SYSTEM,
    STATS_MAX_MS_SEEK_REBUFFERING, STATS_MS_INITIAL_BUFFERING, STATS_MS_KEY_LATENCY,
    STATS_MS_LATENCY, STATS_MS_MANIFEST_LATENCY, STATS_MS_SEEK_REBUFFERING, STATS_MS_TOTAL_EST,
    STATS_START_OFFSET_MS, STATS_TOTAL_BYTES, TRACK_PLAYBACK_COMMAND_URI,
};

// ─────────────────────────────────────────────────────────────────────────────
// Inbound Frames
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: Option<String>,
    method: Option<String>,
    headers: Option<HashMap<String, Value>>,
    uri: Option<String>,
    payloads: Option<Vec<Value>>,
}

/// A decoded dealer frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DealerMessage {
    Ping,
    Pong,
    /// First message after connecting; carries the connection id.
    ConnectionId(String),
    /// One or more track-playback commands.
    Commands(Vec<Command>),
    /// Anything else (playlist updates, notifications, ...).
    Other,
}

impl DealerMessage {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let frame: RawFrame = serde_json::from_str(text)?;

        match frame.kind.as_deref() {
            Some("ping") => return Ok(Self::Ping),
            Some("pong") => return Ok(Self::Pong),
            Some("message") if frame.method.as_deref() == Some("PUT") => {
                let id = frame
                    .headers
                    .as_ref()
                    .and_then(|h| h.get(CONNECTION_ID_HEADER))
                    .and_then(Value::as_str);
                if let Some(id) = id {
                    return Ok(Self::ConnectionId(id.to_string()));
                }
            }
            _ => {}
        }

        if frame.uri.as_deref() == Some(TRACK_PLAYBACK_COMMAND_URI) {
            let commands = frame
                .payloads
                .unwrap_or_default()
                .into_iter()
                .map(Command::from_value)
                .collect();
            return Ok(Self::Commands(commands));
        }

        Ok(Self::Other)
    }
}

/// A track-playback command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ReplaceState(Box<ReplaceState>),
    /// Raw Spotify volume (0–65535).
    SetVolume { volume: f64 },
    Unknown(Value),
}

impl Command {
    /// Classifies a payload by its `type` field.
    ///
    /// A payload whose type is known but whose body does not parse is kept
    /// as [`Command::Unknown`].
    pub fn from_value(value: Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("replace_state") => match serde_json::from_value::<ReplaceState>(value.clone()) {
                Ok(state) => Self::ReplaceState(Box::new(state)),
                Err(e) => {
                    log::warn!("[Dealer] Malformed replace_state: {}", e);
                    Self::Unknown(value)
                }
            },
            Some("set_volume") => match value.get("volume").and_then(Value::as_f64) {
                Some(volume) => Self::SetVolume { volume },
                None => Self::Unknown(value),
            },
            _ => Self::Unknown(value),
        }
    }
}

/// The `replace_state` command: a state machine plus a pointer into it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplaceState {
    pub state_machine: StateMachine,
    /// Absent when this device is no longer the active playback target.
    #[serde(default)]
    pub state_ref: Option<StateRef>,
    /// Requested position in Spotify time.
    #[serde(default)]
    pub seek_to: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateMachine {
    pub state_machine_id: String,
    #[serde(default)]
    pub states: Vec<PlaybackState>,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaybackState {
    pub state_id: String,
    /// Index into [`StateMachine::tracks`].
    pub track: usize,
    #[serde(default)]
    pub transitions: Transitions,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Transitions {
    #[serde(default)]
    pub advance: Option<Transition>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transition {
    pub state_index: usize,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StateRef {
    pub state_machine_id: String,
    pub state_index: usize,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Track {
    pub metadata: TrackMetadata,
}

/// Spotify-side description of a track.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackMetadata {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub authors: Vec<Author>,
    /// Milliseconds.
    #[serde(default)]
    pub duration: u64,
}

impl TrackMetadata {
    pub fn author_names(&self) -> Vec<String> {
        self.authors.iter().map(|a| a.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Author {
    pub name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /v1/track-playback/v1/devices`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceRegistration {
    pub client_version: &'static str,
    pub connection_id: String,
    pub device: DeviceDescriptor,
    pub previous_session_state: Option<Value>,
    pub volume: u16,
}

impl DeviceRegistration {
    pub fn new(connection_id: &str, device_id: &str, name: &str) -> Self {
        Self {
            client_version: CLIENT_VERSION,
            connection_id: connection_id.to_string(),
            device: DeviceDescriptor {
                brand: DEVICE_BRAND,
                capabilities: DeviceCapabilities::default(),
                device_id: device_id.to_string(),
                device_type: DEVICE_TYPE,
                metadata: serde_json::Map::new(),
                model: DEVICE_MODEL,
                name: name.to_string(),
            },
            previous_session_state: None,
            volume: MAX_DEVICE_VOLUME,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescriptor {
    pub brand: &'static str,
    pub capabilities: DeviceCapabilities,
    pub device_id: String,
    pub device_type: &'static str,
    pub metadata: serde_json::Map<String, Value>,
    pub model: &'static str,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceCapabilities {
    pub audio_podcasts: bool,
    pub change_volume: bool,
    pub disable_connect: bool,
    pub enable_play_token: bool,
    pub manifest_formats: [&'static str; 4],
    pub play_token_lost_behavior: &'static str,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            audio_podcasts: true,
            change_volume: true,
            disable_connect: false,
            enable_play_token: true,
            manifest_formats: MANIFEST_FORMATS,
            play_token_lost_behavior: "pause",
        }
    }
}

/// Body of `PUT /v1/track-playback/v1/devices/{id}/volume`.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeUpdate {
    pub seq_num: Option<u64>,
    pub command_id: &'static str,
    pub volume: u16,
}

impl VolumeUpdate {
    pub fn new(volume: u16) -> Self {
        Self {
            seq_num: None,
            command_id: "",
            volume,
        }
    }
}

/// Why an acknowledgement is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugSource {
    BeforeTrackLoad,
    PositionChanged,
    ModifyCurrentState,
    TrackDataFinalized,
}

/// Body of `PUT /v1/track-playback/v1/devices/{id}/state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStateUpdate {
    pub seq_num: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_stats: Option<PlaybackStats>,
    pub state_ref: OutboundStateRef,
    pub sub_state: SubState,
    pub debug_source: DebugSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundStateRef {
    pub paused: bool,
    pub state_id: String,
    pub state_machine_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubState {
    pub stream_time: u64,
    pub position: u64,
    pub playback_speed: u64,
    pub duration: u64,
}

/// Playback statistics attached to `track_data_finalized`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackStats {
    pub audiocodec: &'static str,
    pub key_system: &'static str,
    pub local_time_ms: u64,
    pub max_ms_seek_rebuffering: u64,
    pub max_ms_stalled: u64,
    pub ms_initial_buffering: u64,
    pub ms_key_latency: u64,
    pub ms_latency: u64,
    pub ms_manifest_latency: u64,
    pub ms_seek_rebuffering: u64,
    pub ms_stalled: u64,
    pub ms_total_est: u64,
    pub n_stalls: u64,
    pub start_offset_ms: u64,
    pub time_weighted_bitrate: u64,
    pub total_bytes: u64,
}

impl PlaybackStats {
    pub fn healthy(local_time_ms: u64) -> Self {
        Self {
            audiocodec: STATS_AUDIO_CODEC,
            key_system: STATS_KEY_SYSTEM,
            local_time_ms,
            max_ms_seek_rebuffering: STATS_MAX_MS_SEEK_REBUFFERING,
            max_ms_stalled: 0,
            ms_initial_buffering: STATS_MS_INITIAL_BUFFERING,
            ms_key_latency: STATS_MS_KEY_LATENCY,
            ms_latency: STATS_MS_LATENCY,
            ms_manifest_latency: STATS_MS_MANIFEST_LATENCY,
            ms_seek_rebuffering: STATS_MS_SEEK_REBUFFERING,
            ms_stalled: 0,
            ms_total_est: STATS_MS_TOTAL_EST,
            n_stalls: 0,
            start_offset_ms: STATS_START_OFFSET_MS,
            time_weighted_bitrate: 0,
            total_bytes: STATS_TOTAL_BYTES,
        }
    }
}

/// Outbound keepalive frame.
pub const PING_FRAME: &str = r#"{"type":"ping"}"#;

#[cfg(test)]
pub(crate) mod fixtures {
    //! Dealer frames shared by protocol and session tests.

    use serde_json::json;

    pub const CONNECTION_FRAME: &str = r#"{"type":"message","method":"PUT","uri":"hm://pusher/v1/connections/abc","headers":{"Spotify-Connection-Id":"conn-123"}}"#;

    /// A two-track state machine. `state_index` selects the current state.
    pub fn replace_state(state_index: usize, paused: bool, seek_to: Option<u64>) -> String {
        let mut payload = json!({
            "type": "replace_state",
            "state_machine": {
                "state_machine_id": "sm-1",
                "states": [
                    { "state_id": "s-0", "track": 0, "transitions": { "advance": { "state_index": 1, "paused": false } } },
                    { "state_id": "s-1", "track": 1, "transitions": {} }
                ],
                "tracks": [
                    { "metadata": { "uri": "spotify:track:one", "name": "One", "authors": [{ "name": "Alpha" }], "duration": 200000 } },
                    { "metadata": { "uri": "spotify:track:two", "name": "Two", "authors": [{ "name": "Beta" }, { "name": "Gamma" }], "duration": 100000 } }
                ]
            },
            "state_ref": { "state_machine_id": "sm-1", "state_index": state_index, "paused": paused }
        });
        if let Some(pos) = seek_to {
            payload["seek_to"] = json!(pos);
        }
        command_frame(payload)
    }

    /// A `replace_state` without a state ref (this device lost playback).
    pub fn replace_state_inactive() -> String {
        command_frame(json!({
            "type": "replace_state",
            "state_machine": { "state_machine_id": "sm-1", "states": [], "tracks": [] }
        }))
    }

    pub fn set_volume(volume: u32) -> String {
        command_frame(json!({ "type": "set_volume", "volume": volume }))
    }

    fn command_frame(payload: serde_json::Value) -> String {
        json!({ "uri": "hm://track-playback/v1/command", "payloads": [payload] }).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn parses_keepalive_frames() {
        assert_eq!(
            DealerMessage::parse(r#"{"type":"pong"}"#).unwrap(),
            DealerMessage::Pong
        );
        assert_eq!(
            DealerMessage::parse(PING_FRAME).unwrap(),
            DealerMessage::Ping
        );
    }

    #[test]
    fn parses_connection_id() {
        assert_eq!(
            DealerMessage::parse(CONNECTION_FRAME).unwrap(),
            DealerMessage::ConnectionId("conn-123".into())
        );
    }

    #[test]
    fn parses_replace_state() {
        let DealerMessage::Commands(cmds) =
            DealerMessage::parse(&replace_state(1, true, Some(5000))).unwrap()
        else {
            panic!("expected commands");
        };
        let Command::ReplaceState(state) = &cmds[0] else {
            panic!("expected replace_state");
        };
        let state_ref = state.state_ref.as_ref().unwrap();
        assert_eq!(state_ref.state_index, 1);
        assert!(state_ref.paused);
        assert_eq!(state.seek_to, Some(5000));
        assert_eq!(
            state.state_machine.tracks[1].metadata.author_names(),
            vec!["Beta".to_string(), "Gamma".to_string()]
        );
    }

    #[test]
    fn inactive_replace_state_has_no_state_ref() {
        let DealerMessage::Commands(cmds) = DealerMessage::parse(&replace_state_inactive()).unwrap()
        else {
            panic!("expected commands");
        };
        assert!(matches!(&cmds[0], Command::ReplaceState(s) if s.state_ref.is_none()));
    }

    #[test]
    fn unknown_commands_are_preserved() {
        let frame = r#"{"uri":"hm://track-playback/v1/command","payloads":[{"type":"add_to_queue"}]}"#;
        let DealerMessage::Commands(cmds) = DealerMessage::parse(frame).unwrap() else {
            panic!("expected commands");
        };
        assert!(matches!(cmds[0], Command::Unknown(_)));
    }

    #[test]
    fn other_uris_are_ignored() {
        let frame = r#"{"type":"message","uri":"hm://playlist/v2/user/x","payloads":[]}"#;
        assert_eq!(DealerMessage::parse(frame).unwrap(), DealerMessage::Other);
    }

    #[test]
    fn registration_body_matches_web_player() {
        let body = serde_json::to_value(DeviceRegistration::new("conn", "dev", "Den")).unwrap();
        assert_eq!(body["client_version"], "harmony:3.19.1-441cc8f");
        assert_eq!(body["device"]["brand"], "public_js-sdk");
        assert_eq!(body["device"]["capabilities"]["manifest_formats"][3], "file_ids_mp4_dual");
        assert_eq!(body["device"]["name"], "Den");
        assert!(body["previous_session_state"].is_null());
        assert_eq!(body["volume"], 65535);
    }

    #[test]
    fn state_update_omits_absent_fields() {
        let update = DeviceStateUpdate {
            seq_num: 3,
            previous_position: None,
            playback_stats: None,
            state_ref: OutboundStateRef {
                paused: false,
                state_id: "s".into(),
                state_machine_id: "m".into(),
            },
            sub_state: SubState {
                stream_time: 0,
                position: 0,
                playback_speed: 1,
                duration: 10,
            },
            debug_source: DebugSource::BeforeTrackLoad,
        };
        let body = serde_json::to_value(update).unwrap();
        assert!(body.get("previous_position").is_none());
        assert!(body.get("playback_stats").is_none());
        assert_eq!(body["debug_source"], "before_track_load");
    }
}
