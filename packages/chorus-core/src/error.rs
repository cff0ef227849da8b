//! Centralized error types for the Chorus core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::ports::PortError;
use crate::spotify::dealer::DealerError;
use crate::spotify::http::SpotifyError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for SpotifyError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::Status { .. } => "spotify_error_status",
            Self::Parse(_) => "spotify_parse_error",
            Self::MissingField(_) => "spotify_missing_field",
        }
    }
}

impl ErrorCode for DealerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connect(_) => "dealer_connect_failed",
            Self::Closed => "dealer_closed",
            Self::Serialize(_) => "dealer_serialize_failed",
        }
    }
}

impl ErrorCode for PortError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "player_not_connected",
            Self::Backend(_) => "backend_error",
            Self::Storage(_) => "storage_error",
        }
    }
}

/// Failures that terminate a single Connect session.
///
/// None of these escape the session: the session logs the error and disposes
/// itself, leaving every other session untouched.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Spotify no longer knows this device (HTTP 404).
    #[error("device evicted by Spotify")]
    DeviceEvicted,

    /// Access token could not be refreshed.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// The account lacks the web-playback scope even after a refresh.
    #[error("missing web-playback scope")]
    MissingScope,

    /// No token is stored for the user.
    #[error("user is not linked")]
    NotLinked,

    /// A Spotify call failed after the single refresh-and-retry.
    #[error("spotify request failed: {0}")]
    Spotify(#[from] SpotifyError),

    /// Dealer websocket failure.
    #[error("dealer connection failed: {0}")]
    Dealer(#[from] DealerError),

    /// A call was made before the device finished registering.
    #[error("device not registered")]
    NotRegistered,

    /// The session was stopped while the operation was in flight.
    #[error("session stopped")]
    Stopped,
}

impl SessionError {
    /// Returns true when the failure means Spotify dropped this device.
    pub fn is_device_evicted(&self) -> bool {
        match self {
            Self::DeviceEvicted => true,
            Self::Spotify(e) => e.is_device_evicted(),
            _ => false,
        }
    }
}

/// Convenient Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Application-wide error type for Chorus.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum ChorusError {
    /// Spotify API call failed.
    #[error("Spotify request failed: {0}")]
    Spotify(String),

    /// No linked session exists for the user.
    #[error("User not linked: {0}")]
    UserNotLinked(String),

    /// The guild has no connected player.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The caller may not perform the action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Audio backend or other adapter failed.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ChorusError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spotify(_) => "spotify_error",
            Self::UserNotLinked(_) => "user_not_linked",
            Self::NotConnected(_) => "not_connected",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Backend(_) => "backend_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UserNotLinked(_) | Self::NotConnected(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Spotify(_) | Self::Backend(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

// Re-export Result type aliases from their defining modules
pub use crate::ports::PortResult;
pub use crate::spotify::http::SpotifyResult;

/// Convenient Result alias for application-wide operations.
pub type ChorusResult<T> = Result<T, ChorusError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for ChorusError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<SpotifyError> for ChorusError {
    fn from(err: SpotifyError) -> Self {
        Self::Spotify(err.to_string())
    }
}

impl From<PortError> for ChorusError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotConnected => Self::NotConnected(err.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<SessionError> for ChorusError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotLinked | SessionError::RefreshFailed(_) => {
                Self::UserNotLinked(err.to_string())
            }
            SessionError::MissingScope => Self::Forbidden(err.to_string()),
            SessionError::Spotify(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}
