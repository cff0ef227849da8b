//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::api::response::{api_ok, api_success};
use crate::api::AppState;
use crate::error::{ChorusError, ChorusResult};
use crate::protocol_constants::SERVICE_ID;
use crate::types::{ChannelId, GuildId, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    voice_channel_id: ChannelId,
    text_channel_id: ChannelId,
    /// Members already in the voice channel; linked ones are activated.
    #[serde(default)]
    members: Vec<UserId>,
    member_count: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaveRequest {
    user_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserVoiceStateRequest {
    user_id: UserId,
    channel_id: Option<ChannelId>,
    member_count: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BotVoiceStateRequest {
    previous_channel_id: Option<ChannelId>,
    channel_id: Option<ChannelId>,
    #[serde(default)]
    members: Vec<UserId>,
    member_count: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivateRequest {
    guild_id: GuildId,
    voice_channel_id: ChannelId,
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/guilds/{id}", get(get_guild))
        .route("/api/guilds/{id}/connect", post(connect_guild))
        .route("/api/guilds/{id}/leave", post(leave_guild))
        .route("/api/guilds/{id}/247", post(toggle_247))
        .route("/api/guilds/{id}/notices", get(take_notices))
        .route("/api/guilds/{id}/voice-states", post(user_voice_state))
        .route("/api/guilds/{id}/bot-voice-state", post(bot_voice_state))
        .route("/api/users/{id}", get(get_user).delete(unlink_user))
        .route("/api/users/{id}/activate", post(activate_user))
        .route("/api/users/{id}/deactivate", post(deactivate_user))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn not_linked(user: UserId) -> ChorusError {
    ChorusError::UserNotLinked(format!("no linked account for user {}", user))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "sessions": state.registry.len(),
    }))
}

async fn get_guild(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    api_success(state.coordinator.snapshot(GuildId(id)))
}

/// POST /api/guilds/{id}/connect
///
/// Joins the voice channel (moving if already elsewhere) and activates the
/// linked members listed in the request.
async fn connect_guild(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<ConnectRequest>,
) -> ChorusResult<impl IntoResponse> {
    let guild = GuildId(id);
    if let Some(count) = payload.member_count {
        state.surface.set_member_count(guild, count);
    }

    state
        .coordinator
        .connect(guild, payload.voice_channel_id, payload.text_channel_id)
        .await?;

    let mut activated = 0;
    for user in payload.members {
        match state
            .registry
            .activate(user, guild, payload.voice_channel_id)
            .await
        {
            Ok(true) => activated += 1,
            Ok(false) => {}
            Err(e) => log::warn!("[API] Could not activate {}: {}", user, e),
        }
    }

    Ok(api_success(json!({ "success": true, "activated": activated })))
}

/// POST /api/guilds/{id}/leave
///
/// Only the Host may make the bot leave while a Host exists.
async fn leave_guild(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<LeaveRequest>,
) -> ChorusResult<impl IntoResponse> {
    let guild = GuildId(id);
    let Some(channel) = state.coordinator.voice_channel(guild) else {
        return Err(ChorusError::NotConnected(format!(
            "no voice connection in guild {}",
            guild
        )));
    };

    if let Some(host) = state.coordinator.host(guild) {
        if host != payload.user_id {
            return Err(ChorusError::Forbidden(
                "only the current host can make the bot leave".into(),
            ));
        }
    }

    state
        .registry
        .handle_bot_voice_state(guild, Some(channel), None, &[])
        .await;
    Ok(api_ok())
}

async fn toggle_247(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    let enabled = state.coordinator.toggle_247(GuildId(id));
    api_success(json!({ "twentyFourSeven": enabled }))
}

async fn take_notices(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    api_success(json!({ "notices": state.surface.drain_notices(GuildId(id)) }))
}

/// POST /api/guilds/{id}/voice-states
///
/// A member joined, left or switched voice channels.
async fn user_voice_state(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<UserVoiceStateRequest>,
) -> impl IntoResponse {
    let guild = GuildId(id);
    if let Some(count) = payload.member_count {
        state.surface.set_member_count(guild, count);
    }
    state
        .registry
        .handle_user_voice_state(guild, payload.user_id, payload.channel_id)
        .await;
    api_ok()
}

/// POST /api/guilds/{id}/bot-voice-state
///
/// The bot was moved or disconnected by someone else. Joining is done
/// through `/connect`.
async fn bot_voice_state(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<BotVoiceStateRequest>,
) -> impl IntoResponse {
    let guild = GuildId(id);
    if let Some(count) = payload.member_count {
        state.surface.set_member_count(guild, count);
    }
    state
        .registry
        .handle_bot_voice_state(
            guild,
            payload.previous_channel_id,
            payload.channel_id,
            &payload.members,
        )
        .await;
    api_ok()
}

async fn get_user(State(state): State<AppState>, Path(id): Path<u64>) -> ChorusResult<Response> {
    let user = UserId(id);
    if !state.registry.has_instance(user).await? {
        return Err(not_linked(user));
    }
    let status = state.registry.status(user).ok_or_else(|| not_linked(user))?;
    Ok(api_success(status).into_response())
}

async fn activate_user(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<ActivateRequest>,
) -> ChorusResult<impl IntoResponse> {
    let user = UserId(id);
    if !state
        .registry
        .activate(user, payload.guild_id, payload.voice_channel_id)
        .await?
    {
        return Err(not_linked(user));
    }
    Ok(api_ok())
}

async fn deactivate_user(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ChorusResult<impl IntoResponse> {
    let user = UserId(id);
    if !state.registry.deactivate(user).await {
        return Err(not_linked(user));
    }
    Ok(api_ok())
}

/// DELETE /api/users/{id}
///
/// Stops the user's session and deletes their stored token.
async fn unlink_user(State(state): State<AppState>, Path(id): Path<u64>) -> impl IntoResponse {
    state.registry.unlink(UserId(id)).await;
    api_ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::events::NoopEventEmitter;
    use crate::ports::{AudioBackend, GuildSurface};
    use crate::services::{GuildCoordinator, SessionDeps, SessionRegistry};
    use crate::spotify::dealer::testing::LoopbackConnector;
    use crate::surface::BridgeSurface;
    use crate::test_fixtures::{MemoryTokenStore, MockBackend, MockResolver, MockSpotifyApi};

    const GUILD: u64 = 1;
    const VOICE: ChannelId = ChannelId(10);
    const TEXT: ChannelId = ChannelId(11);
    const ALICE: UserId = UserId(100);
    const BOB: UserId = UserId(200);

    struct Harness {
        state: AppState,
        store: Arc<MemoryTokenStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryTokenStore::new());
        let surface = Arc::new(BridgeSurface::new());
        let coordinator = GuildCoordinator::new(
            Arc::new(MockBackend::new()) as Arc<dyn AudioBackend>,
            Arc::clone(&surface) as Arc<dyn GuildSurface>,
            Arc::new(NoopEventEmitter),
            20,
        );
        let config = Arc::new(Config::default());
        let registry = SessionRegistry::new(SessionDeps {
            api: Arc::new(MockSpotifyApi::new()),
            connector: Arc::new(LoopbackConnector::default()),
            store: Arc::clone(&store) as _,
            resolver: Arc::new(MockResolver::new()),
            coordinator: Arc::clone(&coordinator),
            emitter: Arc::new(NoopEventEmitter),
            config: Arc::clone(&config),
        });

        Harness {
            state: AppState {
                coordinator,
                registry,
                surface,
                config,
            },
            store,
        }
    }

    fn connect_request(members: Vec<UserId>) -> Json<ConnectRequest> {
        Json(ConnectRequest {
            voice_channel_id: VOICE,
            text_channel_id: TEXT,
            members,
            member_count: Some(3),
        })
    }

    #[tokio::test]
    async fn router_builds() {
        let _router = create_router(harness().state);
    }

    #[tokio::test]
    async fn connect_activates_linked_members() {
        let h = harness();
        h.store.insert(ALICE, "access", "refresh");

        let result = connect_guild(
            State(h.state.clone()),
            Path(GUILD),
            connect_request(vec![ALICE, BOB]),
        )
        .await;

        assert!(result.is_ok());
        assert!(h.state.coordinator.is_connected(GuildId(GUILD)));
        assert_eq!(h.state.surface.voice_member_count(GuildId(GUILD)), 3);
        assert!(h.state.registry.get(ALICE).unwrap().is_initialized());
        assert!(h.state.registry.get(BOB).is_none());
    }

    #[tokio::test]
    async fn leave_requires_a_connection() {
        let h = harness();
        let result = leave_guild(
            State(h.state.clone()),
            Path(GUILD),
            Json(LeaveRequest { user_id: ALICE }),
        )
        .await;

        assert!(matches!(result.err(), Some(ChorusError::NotConnected(_))));
    }

    #[tokio::test]
    async fn only_the_host_may_leave() {
        let h = harness();
        let guild = GuildId(GUILD);
        let connected =
            connect_guild(State(h.state.clone()), Path(GUILD), connect_request(vec![])).await;
        assert!(connected.is_ok());
        h.state.coordinator.set_host(guild, ALICE);

        let denied = leave_guild(
            State(h.state.clone()),
            Path(GUILD),
            Json(LeaveRequest { user_id: BOB }),
        )
        .await;
        assert!(matches!(denied.err(), Some(ChorusError::Forbidden(_))));
        assert!(h.state.coordinator.is_connected(guild));

        let allowed = leave_guild(
            State(h.state.clone()),
            Path(GUILD),
            Json(LeaveRequest { user_id: ALICE }),
        )
        .await;
        assert!(allowed.is_ok());
        assert!(!h.state.coordinator.is_connected(guild));
        assert_eq!(h.state.coordinator.host(guild), None);
    }

    #[tokio::test]
    async fn anyone_may_leave_without_a_host() {
        let h = harness();
        let connected =
            connect_guild(State(h.state.clone()), Path(GUILD), connect_request(vec![])).await;
        assert!(connected.is_ok());

        let result = leave_guild(
            State(h.state.clone()),
            Path(GUILD),
            Json(LeaveRequest { user_id: BOB }),
        )
        .await;

        assert!(result.is_ok());
        assert!(!h.state.coordinator.is_connected(GuildId(GUILD)));
    }

    #[tokio::test]
    async fn toggling_247_flips_the_flag() {
        let h = harness();
        toggle_247(State(h.state.clone()), Path(GUILD)).await;
        assert!(h.state.coordinator.is_247(GuildId(GUILD)));

        toggle_247(State(h.state.clone()), Path(GUILD)).await;
        assert!(!h.state.coordinator.is_247(GuildId(GUILD)));
    }

    #[tokio::test]
    async fn unknown_users_are_reported_as_not_linked() {
        let h = harness();

        let activate = activate_user(
            State(h.state.clone()),
            Path(ALICE.0),
            Json(ActivateRequest {
                guild_id: GuildId(GUILD),
                voice_channel_id: VOICE,
            }),
        )
        .await;
        assert!(matches!(activate.err(), Some(ChorusError::UserNotLinked(_))));

        let deactivate = deactivate_user(State(h.state.clone()), Path(ALICE.0)).await;
        assert!(matches!(deactivate.err(), Some(ChorusError::UserNotLinked(_))));

        let status = get_user(State(h.state.clone()), Path(ALICE.0)).await;
        assert!(matches!(status.err(), Some(ChorusError::UserNotLinked(_))));
    }

    #[tokio::test]
    async fn unlink_deletes_the_token() {
        let h = harness();
        h.store.insert(ALICE, "access", "refresh");
        assert!(get_user(State(h.state.clone()), Path(ALICE.0)).await.is_ok());

        unlink_user(State(h.state.clone()), Path(ALICE.0)).await;

        assert!(!h.store.contains(ALICE));
        assert!(h.state.registry.get(ALICE).is_none());
    }
}
