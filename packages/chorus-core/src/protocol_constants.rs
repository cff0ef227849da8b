//! Fixed protocol constants that should NOT be changed.
//!
//! These values are dictated by the Spotify web-player protocol (the device
//! descriptor the dealer and track-playback endpoints accept) or by the
//! observable timing of the official client. Changing them breaks playback
//! registration or makes sessions behave differently from a real device.

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "chorus";

// ─────────────────────────────────────────────────────────────────────────────
// Endpoints
// ─────────────────────────────────────────────────────────────────────────────

/// Base URL of the Spotify Web API.
pub const SPOTIFY_API_BASE_URL: &str = "https://api.spotify.com";

/// Base URL of the Spotify accounts service (OAuth token refresh).
pub const SPOTIFY_ACCOUNTS_URL: &str = "https://accounts.spotify.com";

/// Dealer websocket endpoint. The access token is appended as a query parameter.
pub const SPOTIFY_DEALER_URL: &str = "wss://gew-dealer.spotify.com/";

/// URI carried by dealer frames that hold track-playback commands.
pub const TRACK_PLAYBACK_COMMAND_URI: &str = "hm://track-playback/v1/command";

/// Header carrying the connection id on the first dealer message.
pub const CONNECTION_ID_HEADER: &str = "Spotify-Connection-Id";

/// Scope that grants web playback.
pub const WEB_PLAYBACK_SCOPE: &str = "web-playback";

/// Feature-flag probe the web player sends after subscribing.
pub const FEATURE_FLAG_PROBE: &str = "tps_send_all_state_updates";

// ─────────────────────────────────────────────────────────────────────────────
// Device Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Client version reported at device registration.
pub const CLIENT_VERSION: &str = "harmony:3.19.1-441cc8f";

/// Device brand reported at device registration.
pub const DEVICE_BRAND: &str = "public_js-sdk";

/// Device model reported at device registration.
pub const DEVICE_MODEL: &str = "harmony-chrome.86-windows";

/// Device type reported at device registration.
pub const DEVICE_TYPE: &str = "speaker";

/// Manifest formats the device claims to support.
pub const MANIFEST_FORMATS: [&str; 4] = [
    "file_urls_mp3",
    "file_urls_external",
    "file_ids_mp4",
    "file_ids_mp4_dual",
];

/// Length of the random device id.
pub const DEVICE_ID_LENGTH: usize = 40;

/// Maximum Spotify device volume (also the registration volume).
pub const MAX_DEVICE_VOLUME: u16 = 65535;

// ─────────────────────────────────────────────────────────────────────────────
// Device Names
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix prepended to device names in the livedev environment.
pub const LIVEDEV_NAME_PREFIX: &str = "[Livedev] ";

/// Maximum length of a user-chosen device name.
pub const MAX_DEVICE_NAME_LEN: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Timing
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between dealer keepalive pings (seconds).
pub const KEEPALIVE_INTERVAL_SECS: u64 = 30;

/// How long to wait for a pong before closing the dealer connection (seconds).
pub const PONG_TIMEOUT_SECS: u64 = 5;

/// Delay before restarting a session after a clean disconnect (milliseconds).
pub const RESTART_DELAY_MS: u64 = 1000;

/// Idle budget before leaving a voice channel or disposing a paused Host (seconds).
pub const INACTIVITY_TIMEOUT_SECS: u64 = 150;

/// Backoff after an HTTP 429 before retrying (milliseconds).
pub const RATE_LIMIT_BACKOFF_MS: u64 = 1000;

/// Attempts made to resolve an audio track for a Spotify track.
pub const TRACK_RESOLVE_ATTEMPTS: usize = 3;

/// Timeout for Spotify HTTP requests (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Player
// ─────────────────────────────────────────────────────────────────────────────

/// Highest volume the shared player accepts.
pub const PLAYER_VOLUME_MAX: u16 = 150;

/// Default ceiling that a full Spotify volume maps onto.
pub const DEFAULT_PLAYER_VOLUME_CEILING: u16 = 20;

/// Volume applied to a freshly connected player.
pub const DEFAULT_INITIAL_PLAYER_VOLUME: u16 = 20;

/// Inactivity notice posted to the text channel before leaving.
pub const INACTIVITY_NOTICE: &str = "I left the voice channel because of inactivity";

// ─────────────────────────────────────────────────────────────────────────────
// Playback Stats
// ─────────────────────────────────────────────────────────────────────────────
//
// `track_data_finalized` acknowledgements carry a playback-stats blob. The
// values below are what the web player reports for a healthy stream.

pub const STATS_AUDIO_CODEC: &str = "mp4";
pub const STATS_KEY_SYSTEM: &str = "widevine";
pub const STATS_MAX_MS_SEEK_REBUFFERING: u64 = 3820;
pub const STATS_MS_INITIAL_BUFFERING: u64 = 6372;
pub const STATS_MS_KEY_LATENCY: u64 = 615;
pub const STATS_MS_LATENCY: u64 = 6372;
pub const STATS_MS_MANIFEST_LATENCY: u64 = 151;
pub const STATS_MS_SEEK_REBUFFERING: u64 = 3938;
pub const STATS_MS_TOTAL_EST: u64 = 155_082;
pub const STATS_START_OFFSET_MS: u64 = 149_333;
pub const STATS_TOTAL_BYTES: u64 = 2_118_720;
