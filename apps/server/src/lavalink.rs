//! [`TrackResolver`] backed by a Lavalink node's REST search.
//!
//! Queries go to `GET /v4/loadtracks?identifier={prefix}:{query}`; the first
//! search result (or the single loaded track) wins.

use std::time::Duration;

use async_trait::async_trait;
use chorus_core::{PortError, PortResult, ResolvedTrack, TrackResolver};
use reqwest::Client;
use serde::de::IgnoredAny;
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
enum LoadResult {
    Track(LavalinkTrack),
    Search(Vec<LavalinkTrack>),
    Playlist(Playlist),
    Empty(IgnoredAny),
    Error(LoadError),
}

#[derive(Deserialize)]
struct LavalinkTrack {
    encoded: String,
    info: TrackInfo,
}

#[derive(Deserialize)]
struct TrackInfo {
    title: String,
    author: String,
    /// Milliseconds.
    length: u64,
    uri: Option<String>,
}

#[derive(Deserialize)]
struct Playlist {
    tracks: Vec<LavalinkTrack>,
}

#[derive(Deserialize)]
struct LoadError {
    message: Option<String>,
}

impl From<LavalinkTrack> for ResolvedTrack {
    fn from(track: LavalinkTrack) -> Self {
        Self {
            title: track.info.title,
            url: track.info.uri.unwrap_or_default(),
            author: track.info.author,
            duration: Duration::from_millis(track.info.length),
            encoded: track.encoded,
        }
    }
}

pub struct LavalinkResolver {
    client: Client,
    base_url: String,
    password: String,
    search_prefix: String,
}

impl LavalinkResolver {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        password: impl Into<String>,
        search_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            password: password.into(),
            search_prefix: search_prefix.into(),
        }
    }
}

#[async_trait]
impl TrackResolver for LavalinkResolver {
    async fn search(&self, query: &str) -> PortResult<Option<ResolvedTrack>> {
        let identifier = format!("{}:{}", self.search_prefix, query);
        let response = self
            .client
            .get(format!("{}/v4/loadtracks", self.base_url))
            .header("Authorization", &self.password)
            .query(&[("identifier", identifier.as_str())])
            .send()
            .await
            .map_err(|e| PortError::Backend(format!("lavalink request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PortError::Backend(format!("lavalink returned {}", status)));
        }

        let result: LoadResult = response
            .json()
            .await
            .map_err(|e| PortError::Backend(format!("unexpected lavalink response: {}", e)))?;

        let track = match result {
            LoadResult::Track(track) => Some(track),
            LoadResult::Search(tracks) => tracks.into_iter().next(),
            LoadResult::Playlist(playlist) => playlist.tracks.into_iter().next(),
            LoadResult::Empty(_) => None,
            LoadResult::Error(e) => {
                return Err(PortError::Backend(
                    e.message.unwrap_or_else(|| "lavalink load failed".into()),
                ))
            }
        };

        log::debug!(
            "[Lavalink] \"{}\" -> {:?}",
            query,
            track.as_ref().map(|t| &t.info.title)
        );
        Ok(track.map(ResolvedTrack::from))
    }
}
