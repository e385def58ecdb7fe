//! REST surface.
//!
//! History is served here rather than replayed over the socket. Reactions
//! posted here go through the same [`ChatService::react`] as the socket
//! event and are broadcast the same way.

use crate::error::GatewayError;
use crate::protocol::ServerEvent;
use crate::server::{bearer_token, GatewayState};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::request::Parts,
    routing::{get, post},
    Json, Router,
};
use parley_core::{GroupId, Identity, MessageId, MessageView, UserId, UserStatus};
use serde::Deserialize;
use std::sync::Arc;

type ApiResult<T> = std::result::Result<Json<T>, GatewayError>;

/// Identity resolved from the request's bearer credential.
pub struct Authenticated(pub Identity);

#[async_trait]
impl FromRequestParts<Arc<GatewayState>> for Authenticated {
    type Rejection = GatewayError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| GatewayError::Unauthenticated("missing bearer credential".into()))?;
        let identity = state.verifier.verify(token).await?;
        Ok(Self(identity))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<MessageId>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub kind: String,
}

pub fn routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/api/presence", get(presence))
        .route("/api/conversations/:peer_id/messages", get(direct_history))
        .route("/api/groups/:group_id/messages", get(group_history))
        .route("/api/messages/:message_id/reactions", post(react))
}

async fn presence(
    State(state): State<Arc<GatewayState>>,
    Authenticated(actor): Authenticated,
) -> ApiResult<Vec<UserStatus>> {
    Ok(Json(state.chat.user_directory(&actor).await?))
}

async fn direct_history(
    State(state): State<Arc<GatewayState>>,
    Authenticated(actor): Authenticated,
    Path(peer_id): Path<UserId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<MessageView>> {
    let messages = state
        .chat
        .direct_history(&actor, peer_id, query.before, query.limit)
        .await?;
    Ok(Json(messages))
}

async fn group_history(
    State(state): State<Arc<GatewayState>>,
    Authenticated(actor): Authenticated,
    Path(group_id): Path<GroupId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<MessageView>> {
    let messages = state
        .chat
        .group_history(&actor, group_id, query.before, query.limit)
        .await?;
    Ok(Json(messages))
}

async fn react(
    State(state): State<Arc<GatewayState>>,
    Authenticated(actor): Authenticated,
    Path(message_id): Path<MessageId>,
    Json(request): Json<ReactRequest>,
) -> ApiResult<ServerEvent> {
    let summary = state.chat.react(&actor, message_id, &request.kind).await?;
    Ok(Json(summary.event))
}
