//! Low-level HTTP transport for the Spotify Web API.
//!
//! This module owns the error type and the send loop shared by every
//! Spotify call. For the typed endpoints, see `client.rs`.

use std::time::{Duration, Instant};

use reqwest::{RequestBuilder, StatusCode};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur when talking to Spotify.
#[derive(Debug, Error)]
pub enum SpotifyError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Spotify returned a non-success status.
    #[error("HTTP error {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the JSON we expected.
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Response JSON lacked a required field.
    #[error("Response missing field: {0}")]
    MissingField(&'static str),
}

/// Convenient Result alias for Spotify operations.
pub type SpotifyResult<T> = Result<T, SpotifyError>;

impl SpotifyError {
    /// Returns the HTTP status if Spotify answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true when Spotify no longer knows the device (404).
    #[must_use]
    pub fn is_device_evicted(&self) -> bool {
        self.status() == Some(StatusCode::NOT_FOUND.as_u16())
    }

    /// Returns true for 429 Too Many Requests.
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(StatusCode::TOO_MANY_REQUESTS.as_u16())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Send Loop
// ─────────────────────────────────────────────────────────────────────────────

/// Sends a request built by `build`, returning the response body on success.
///
/// Idempotent requests (GET/PUT) that hit 429 are retried after `backoff`
/// for as long as Spotify keeps rate limiting. Non-idempotent requests
/// surface the 429 to the caller.
///
/// # Arguments
/// * `label` - Endpoint name for logging
/// * `idempotent` - Whether a 429 may be retried
/// * `backoff` - Delay before each 429 retry
/// * `build` - Closure producing a fresh request for every attempt
pub(crate) async fn send_with_backoff<F>(
    label: &str,
    idempotent: bool,
    backoff: Duration,
    build: F,
) -> SpotifyResult<String>
where
    F: Fn() -> RequestBuilder,
{
    loop {
        let start = Instant::now();
        let res = build().send().await?;
        let status = res.status();

        log::debug!(
            "[Spotify] {} completed in {:?}: {}",
            label,
            start.elapsed(),
            status
        );

        if status == StatusCode::TOO_MANY_REQUESTS && idempotent {
            log::warn!("[Spotify] {} rate limited, retrying in {:?}", label, backoff);
            tokio::time::sleep(backoff).await;
            continue;
        }

        let body = res.text().await?;
        if !status.is_success() {
            return Err(SpotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }
        return Ok(body);
    }
}
