//! [`GuildSurface`] for a chat front end that talks to Chorus over HTTP.
//!
//! The front end reports voice member counts along with its voice-state
//! calls and polls the notices Chorus wants posted.

use std::collections::VecDeque;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::ports::{GuildSurface, PortResult};
use crate::types::{ChannelId, GuildId};
use crate::utils::now_millis;

/// Notices kept per guild until the front end collects them.
const MAX_PENDING_NOTICES: usize = 32;

/// A message waiting to be posted to a text channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub channel_id: ChannelId,
    pub message: String,
    pub timestamp: u64,
}

#[derive(Default)]
pub struct BridgeSurface {
    members: DashMap<GuildId, usize>,
    notices: DashMap<GuildId, VecDeque<Notice>>,
}

impl BridgeSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records how many members (bot included) sit in the bot's channel.
    pub fn set_member_count(&self, guild: GuildId, count: usize) {
        self.members.insert(guild, count);
    }

    /// Takes every pending notice for `guild`, oldest first.
    pub fn drain_notices(&self, guild: GuildId) -> Vec<Notice> {
        self.notices
            .remove(&guild)
            .map(|(_, pending)| pending.into())
            .unwrap_or_default()
    }
}

#[async_trait]
impl GuildSurface for BridgeSurface {
    async fn notify(&self, guild: GuildId, channel: ChannelId, message: &str) -> PortResult<()> {
        log::info!("[Surface] Notice for guild {} in {}: {}", guild, channel, message);

        let mut pending = self.notices.entry(guild).or_default();
        if pending.len() == MAX_PENDING_NOTICES {
            pending.pop_front();
        }
        pending.push_back(Notice {
            channel_id: channel,
            message: message.to_string(),
            timestamp: now_millis(),
        });
        Ok(())
    }

    fn voice_member_count(&self, guild: GuildId) -> usize {
        self.members.get(&guild).map(|c| *c).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notices_are_drained_in_order() {
        let surface = BridgeSurface::new();
        surface.notify(GuildId(1), ChannelId(2), "first").await.unwrap();
        surface.notify(GuildId(1), ChannelId(2), "second").await.unwrap();

        let messages: Vec<_> = surface
            .drain_notices(GuildId(1))
            .into_iter()
            .map(|n| n.message)
            .collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert!(surface.drain_notices(GuildId(1)).is_empty());
    }

    #[tokio::test]
    async fn oldest_notice_is_dropped_when_full() {
        let surface = BridgeSurface::new();
        for i in 0..=MAX_PENDING_NOTICES {
            surface
                .notify(GuildId(1), ChannelId(2), &i.to_string())
                .await
                .unwrap();
        }

        let pending = surface.drain_notices(GuildId(1));
        assert_eq!(pending.len(), MAX_PENDING_NOTICES);
        assert_eq!(pending[0].message, "1");
    }

    #[test]
    fn unknown_guild_has_no_members() {
        let surface = BridgeSurface::new();
        assert_eq!(surface.voice_member_count(GuildId(1)), 0);

        surface.set_member_count(GuildId(1), 3);
        assert_eq!(surface.voice_member_count(GuildId(1)), 3);
    }
}
