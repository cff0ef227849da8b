//! Typed Spotify endpoints used by Connect sessions.
//!
//! [`SpotifyApi`] is the seam services depend on; [`SpotifyClientImpl`] is
//! the reqwest-backed implementation. Every call takes the access token
//! explicitly so token refresh stays the caller's concern.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::http::{send_with_backoff, SpotifyError, SpotifyResult};
use super::protocol::{DeviceRegistration, DeviceStateUpdate, VolumeUpdate};
use crate::config::SpotifyCredentials;
use crate::protocol_constants::{FEATURE_FLAG_PROBE, RATE_LIMIT_BACKOFF_MS, WEB_PLAYBACK_SCOPE};
use crate::utils::track_id_from_uri;

/// Spotify operations needed to emulate a Connect device.
#[async_trait]
pub trait SpotifyApi: Send + Sync {
    /// Verifies the token carries the web-playback scope.
    async fn check_scope(&self, token: &str) -> SpotifyResult<()>;

    /// Subscribes the dealer connection to user notifications.
    async fn subscribe_notifications(&self, token: &str, connection_id: &str)
        -> SpotifyResult<()>;

    /// Probes the feature flag the web player checks after subscribing.
    async fn probe_feature_flags(&self, token: &str) -> SpotifyResult<()>;

    /// Registers the virtual device. Returns the initial sequence number.
    async fn register_device(
        &self,
        token: &str,
        registration: &DeviceRegistration,
    ) -> SpotifyResult<u64>;

    /// Reports the device volume (0–65535).
    async fn set_device_volume(&self, token: &str, device_id: &str, volume: u16)
        -> SpotifyResult<()>;

    /// Acknowledges a playback state transition.
    async fn put_device_state(
        &self,
        token: &str,
        device_id: &str,
        update: &DeviceStateUpdate,
    ) -> SpotifyResult<()>;

    /// Starts `uri` at `position_ms` on the user's active device.
    async fn play(&self, token: &str, uri: &str, position_ms: u64) -> SpotifyResult<()>;

    /// Resumes the user's playback.
    async fn resume(&self, token: &str) -> SpotifyResult<()>;

    /// Pauses the user's playback.
    async fn pause(&self, token: &str) -> SpotifyResult<()>;

    /// Seeks the user's playback.
    async fn seek(&self, token: &str, position_ms: u64) -> SpotifyResult<()>;

    /// Returns the public web URL of a track.
    async fn track_web_url(&self, token: &str, uri: &str) -> SpotifyResult<String>;

    /// Exchanges a refresh token for a new access token.
    async fn refresh_access_token(&self, refresh_token: &str) -> SpotifyResult<String>;
}

#[derive(Deserialize)]
struct RegistrationResponse {
    initial_seq_num: Option<u64>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Deserialize)]
struct TrackResponse {
    external_urls: Option<ExternalUrls>,
}

#[derive(Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

/// Reqwest-backed [`SpotifyApi`].
#[derive(Clone)]
pub struct SpotifyClientImpl {
    client: Client,
    api_base: String,
    accounts_base: String,
    credentials: SpotifyCredentials,
    rate_limit_backoff: Duration,
}

impl SpotifyClientImpl {
    /// Creates a client against the given base URLs.
    pub fn new(
        client: Client,
        api_base: impl Into<String>,
        accounts_base: impl Into<String>,
        credentials: SpotifyCredentials,
    ) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            accounts_base: accounts_base.into().trim_end_matches('/').to_string(),
            credentials,
            rate_limit_backoff: Duration::from_millis(RATE_LIMIT_BACKOFF_MS),
        }
    }

    /// Overrides the 429 backoff.
    #[must_use]
    pub fn with_rate_limit_backoff(mut self, backoff: Duration) -> Self {
        self.rate_limit_backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn device_url(&self, device_id: &str, leaf: &str) -> String {
        self.url(&format!(
            "/v1/track-playback/v1/devices/{}/{}",
            device_id, leaf
        ))
    }

    async fn get(&self, label: &str, token: &str, url: &str) -> SpotifyResult<String> {
        send_with_backoff(label, true, self.rate_limit_backoff, || {
            self.client.get(url).bearer_auth(token)
        })
        .await
    }

    async fn put_json<T: serde::Serialize + Sync>(
        &self,
        label: &str,
        token: &str,
        url: &str,
        body: &T,
    ) -> SpotifyResult<String> {
        send_with_backoff(label, true, self.rate_limit_backoff, || {
            self.client.put(url).bearer_auth(token).json(body)
        })
        .await
    }

    async fn put_empty(&self, label: &str, token: &str, url: &str) -> SpotifyResult<String> {
        send_with_backoff(label, true, self.rate_limit_backoff, || {
            self.client
                .put(url)
                .bearer_auth(token)
                .header(reqwest::header::CONTENT_LENGTH, 0)
        })
        .await
    }
}

#[async_trait]
impl SpotifyApi for SpotifyClientImpl {
    async fn check_scope(&self, token: &str) -> SpotifyResult<()> {
        let url = self.url(&format!(
            "/v1/melody/v1/check_scope?scope={}",
            WEB_PLAYBACK_SCOPE
        ));
        self.get("check_scope", token, &url).await.map(|_| ())
    }

    async fn subscribe_notifications(
        &self,
        token: &str,
        connection_id: &str,
    ) -> SpotifyResult<()> {
        let url = self.url("/v1/me/notifications/user");
        send_with_backoff("notifications", true, self.rate_limit_backoff, || {
            self.client
                .put(&url)
                .bearer_auth(token)
                .query(&[("connection_id", connection_id)])
                .header(reqwest::header::CONTENT_LENGTH, 0)
        })
        .await
        .map(|_| ())
    }

    async fn probe_feature_flags(&self, token: &str) -> SpotifyResult<()> {
        let url = self.url(&format!("/v1/me/feature-flags?tests={}", FEATURE_FLAG_PROBE));
        self.get("feature_flags", token, &url).await.map(|_| ())
    }

    async fn register_device(
        &self,
        token: &str,
        registration: &DeviceRegistration,
    ) -> SpotifyResult<u64> {
        let url = self.url("/v1/track-playback/v1/devices");
        let body = send_with_backoff("register_device", false, self.rate_limit_backoff, || {
            self.client.post(&url).bearer_auth(token).json(registration)
        })
        .await?;

        let parsed: RegistrationResponse = serde_json::from_str(&body)?;
        parsed
            .initial_seq_num
            .ok_or(SpotifyError::MissingField("initial_seq_num"))
    }

    async fn set_device_volume(
        &self,
        token: &str,
        device_id: &str,
        volume: u16,
    ) -> SpotifyResult<()> {
        let url = self.device_url(device_id, "volume");
        self.put_json("device_volume", token, &url, &VolumeUpdate::new(volume))
            .await
            .map(|_| ())
    }

    async fn put_device_state(
        &self,
        token: &str,
        device_id: &str,
        update: &DeviceStateUpdate,
    ) -> SpotifyResult<()> {
        let url = self.device_url(device_id, "state");
        self.put_json("device_state", token, &url, update)
            .await
            .map(|_| ())
    }

    async fn play(&self, token: &str, uri: &str, position_ms: u64) -> SpotifyResult<()> {
        let url = self.url("/v1/me/player/play");
        let body = json!({ "uris": [uri], "position_ms": position_ms });
        self.put_json("play", token, &url, &body).await.map(|_| ())
    }

    async fn resume(&self, token: &str) -> SpotifyResult<()> {
        let url = self.url("/v1/me/player/play");
        self.put_empty("resume", token, &url).await.map(|_| ())
    }

    async fn pause(&self, token: &str) -> SpotifyResult<()> {
        let url = self.url("/v1/me/player/pause");
        self.put_empty("pause", token, &url).await.map(|_| ())
    }

    async fn seek(&self, token: &str, position_ms: u64) -> SpotifyResult<()> {
        let url = self.url(&format!("/v1/me/player/seek?position_ms={}", position_ms));
        self.put_empty("seek", token, &url).await.map(|_| ())
    }

    async fn track_web_url(&self, token: &str, uri: &str) -> SpotifyResult<String> {
        let url = self.url(&format!("/v1/tracks/{}", track_id_from_uri(uri)));
        let body = self.get("track", token, &url).await?;
        let parsed: TrackResponse = serde_json::from_str(&body)?;
        parsed
            .external_urls
            .and_then(|u| u.spotify)
            .ok_or(SpotifyError::MissingField("external_urls.spotify"))
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> SpotifyResult<String> {
        let url = format!("{}/api/token", self.accounts_base);
        let body = send_with_backoff("refresh_token", false, self.rate_limit_backoff, || {
            self.client
                .post(&url)
                .basic_auth(
                    &self.credentials.client_id,
                    Some(&self.credentials.client_secret),
                )
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ])
        })
        .await?;

        let parsed: TokenResponse = serde_json::from_str(&body)?;
        parsed
            .access_token
            .ok_or(SpotifyError::MissingField("access_token"))
    }
}
