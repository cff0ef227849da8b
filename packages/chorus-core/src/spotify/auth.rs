//! Per-user token handling with a single refresh-and-retry.
//!
//! Every Spotify call a session makes goes through [`UserAuth::call`]: on a
//! failure other than 404 the access token is refreshed once and the call is
//! retried once. A 404 means Spotify dropped the device and is never retried.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;

use super::client::SpotifyApi;
use super::http::{SpotifyError, SpotifyResult};
use crate::error::{SessionError, SessionResult};
use crate::ports::{TokenPair, TokenStore};
use crate::types::UserId;

/// OAuth state for one linked user.
pub struct UserAuth {
    user: UserId,
    tokens: RwLock<TokenPair>,
    api: Arc<dyn SpotifyApi>,
    store: Arc<dyn TokenStore>,
}

impl UserAuth {
    pub fn new(
        user: UserId,
        tokens: TokenPair,
        api: Arc<dyn SpotifyApi>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            user,
            tokens: RwLock::new(tokens),
            api,
            store,
        }
    }

    /// The Spotify API this auth context calls through.
    pub fn api(&self) -> &Arc<dyn SpotifyApi> {
        &self.api
    }

    /// Current access token.
    pub fn access_token(&self) -> String {
        self.tokens.read().access_token.clone()
    }

    /// Exchanges the refresh token for a new access token and persists it.
    pub async fn refresh(&self) -> SessionResult<()> {
        let refresh_token = self.tokens.read().refresh_token.clone();
        let access_token = self
            .api
            .refresh_access_token(&refresh_token)
            .await
            .map_err(|e| SessionError::RefreshFailed(e.to_string()))?;

        if let Err(e) = self
            .store
            .update_access_token(self.user, &access_token)
            .await
        {
            log::warn!(
                "[Auth] Failed to persist refreshed token for {}: {}",
                self.user,
                e
            );
        }

        self.tokens.write().access_token = access_token;
        log::debug!("[Auth] Refreshed access token for {}", self.user);
        Ok(())
    }

    /// Runs `op` with the current token, refreshing and retrying once on failure.
    ///
    /// # Errors
    ///
    /// - [`SessionError::DeviceEvicted`] on a 404 from either attempt
    /// - [`SessionError::RefreshFailed`] if the refresh itself fails
    /// - [`SessionError::Spotify`] if the retry fails
    pub async fn call<T, F, Fut>(&self, label: &str, op: F) -> SessionResult<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = SpotifyResult<T>>,
    {
        match op(self.access_token()).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_device_evicted() => Err(SessionError::DeviceEvicted),
            Err(e) => {
                log::info!(
                    "[Auth] {} failed for {} ({}), refreshing token",
                    label,
                    self.user,
                    e
                );
                self.refresh().await?;
                op(self.access_token()).await.map_err(classify)
            }
        }
    }
}

fn classify(err: SpotifyError) -> SessionError {
    if err.is_device_evicted() {
        SessionError::DeviceEvicted
    } else {
        SessionError::Spotify(err)
    }
}
