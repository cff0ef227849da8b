//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::protocol_constants::{DEVICE_ID_LENGTH, MAX_DEVICE_NAME_LEN};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Device Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Generates a random alphanumeric device id.
///
/// A fresh id is drawn for every Connect session so Spotify sees a new
/// device each time a listener is activated.
#[must_use]
pub fn generate_device_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DEVICE_ID_LENGTH)
        .map(char::from)
        .collect()
}

/// Error returned when a user-chosen device name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceNameError {
    #[error("device name is empty")]
    Empty,
    #[error("device name is longer than {MAX_DEVICE_NAME_LEN} characters")]
    TooLong,
    #[error("device name uses the reserved [livedev] prefix")]
    ReservedPrefix,
}

/// Validates a user-chosen device name.
///
/// Names must be non-empty, at most [`MAX_DEVICE_NAME_LEN`] characters, and
/// must not impersonate the livedev prefix (case-insensitive).
pub fn validate_device_name(name: &str) -> Result<(), DeviceNameError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DeviceNameError::Empty);
    }
    if trimmed.chars().count() > MAX_DEVICE_NAME_LEN {
        return Err(DeviceNameError::TooLong);
    }
    if trimmed.to_lowercase().starts_with("[livedev]") {
        return Err(DeviceNameError::ReservedPrefix);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Track Lookup
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the search query used to find an audio track: `"A, B - Title"`.
#[must_use]
pub fn build_track_query(authors: &[String], title: &str) -> String {
    format!("{} - {}", authors.join(", "), title)
}

/// Extracts the bare track id from a `spotify:track:<id>` URI.
#[must_use]
pub fn track_id_from_uri(uri: &str) -> &str {
    uri.rsplit(':').next().unwrap_or(uri)
}
