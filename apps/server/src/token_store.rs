//! Linked accounts persisted in a JSON file.
//!
//! The file maps user ids to their OAuth tokens and chosen device name:
//!
//! ```json
//! { "users": { "1234": { "accessToken": "...", "refreshToken": "...", "deviceName": "Den" } } }
//! ```
//!
//! The whole file is rewritten on every change, through a temporary file and
//! a rename so a crash never leaves it half written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chorus_core::{PortError, PortResult, TokenPair, TokenStore, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAccount {
    access_token: String,
    refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_name: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    users: HashMap<UserId, StoredAccount>,
}

pub struct JsonTokenStore {
    path: PathBuf,
    file: Mutex<TokenFile>,
}

impl JsonTokenStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse token file: {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TokenFile::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read token file: {}", path.display()))
            }
        };

        log::info!(
            "[TokenStore] Loaded {} linked account(s) from {}",
            file.users.len(),
            path.display()
        );
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    async fn persist(path: &Path, file: &TokenFile) -> PortResult<()> {
        let json = serde_json::to_string_pretty(file).map_err(storage_error)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(storage_error)?;
        tokio::fs::rename(&tmp, path).await.map_err(storage_error)
    }
}

fn storage_error(e: impl std::fmt::Display) -> PortError {
    PortError::Storage(e.to_string())
}

#[async_trait]
impl TokenStore for JsonTokenStore {
    async fn get_token(&self, user: UserId) -> PortResult<Option<TokenPair>> {
        let file = self.file.lock().await;
        Ok(file.users.get(&user).map(|account| TokenPair {
            access_token: account.access_token.clone(),
            refresh_token: account.refresh_token.clone(),
        }))
    }

    async fn update_access_token(&self, user: UserId, access_token: &str) -> PortResult<()> {
        let mut file = self.file.lock().await;
        let Some(account) = file.users.get_mut(&user) else {
            return Err(PortError::Storage(format!("no account stored for {}", user)));
        };
        account.access_token = access_token.to_string();
        Self::persist(&self.path, &file).await
    }

    async fn delete_token(&self, user: UserId) -> PortResult<()> {
        let mut file = self.file.lock().await;
        if file.users.remove(&user).is_none() {
            return Ok(());
        }
        log::info!("[TokenStore] Removed account {}", user);
        Self::persist(&self.path, &file).await
    }

    async fn device_name(&self, user: UserId) -> PortResult<Option<String>> {
        let file = self.file.lock().await;
        Ok(file.users.get(&user).and_then(|a| a.device_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: UserId = UserId(100);

    fn write_fixture(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("tokens.json");
        std::fs::write(
            &path,
            r#"{"users":{"100":{"accessToken":"a1","refreshToken":"r1","deviceName":"Den"}}}"#,
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTokenStore::open(dir.path().join("tokens.json"))
            .await
            .unwrap();

        assert_eq!(store.get_token(ALICE).await.unwrap(), None);
        store.delete_token(ALICE).await.unwrap();
    }

    #[tokio::test]
    async fn reads_tokens_and_device_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTokenStore::open(write_fixture(&dir)).await.unwrap();

        let tokens = store.get_token(ALICE).await.unwrap().unwrap();
        assert_eq!(tokens.access_token, "a1");
        assert_eq!(tokens.refresh_token, "r1");
        assert_eq!(store.device_name(ALICE).await.unwrap().as_deref(), Some("Den"));
    }

    #[tokio::test]
    async fn refreshed_token_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir);
        let store = JsonTokenStore::open(&path).await.unwrap();

        store.update_access_token(ALICE, "a2").await.unwrap();

        let reopened = JsonTokenStore::open(&path).await.unwrap();
        let tokens = reopened.get_token(ALICE).await.unwrap().unwrap();
        assert_eq!(tokens.access_token, "a2");
        assert_eq!(tokens.refresh_token, "r1");
    }

    #[tokio::test]
    async fn deleted_account_is_gone_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(&dir);
        let store = JsonTokenStore::open(&path).await.unwrap();

        store.delete_token(ALICE).await.unwrap();

        let reopened = JsonTokenStore::open(&path).await.unwrap();
        assert_eq!(reopened.get_token(ALICE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn updating_unknown_user_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTokenStore::open(write_fixture(&dir)).await.unwrap();

        let result = store.update_access_token(UserId(7), "x").await;
        assert!(matches!(result, Err(PortError::Storage(_))));
    }

    #[tokio::test]
    async fn corrupt_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(JsonTokenStore::open(&path).await.is_err());
    }
}
