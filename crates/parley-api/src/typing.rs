use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{Claims, TypingRequest};
use parley_types::events::GatewayEvent;
use parley_types::models::{ChatRef, User};

use crate::error::ApiError;
use crate::helpers::{current_user, now_ms, parse_uuid, require_user, user_from_row, with_db};
use crate::state::AppState;

/// A typing row older than this is treated as expired without any
/// explicit clear: the freshness window, not a stop event, is the
/// correctness mechanism. Clients re-assert while keys are pressed.
pub const STALE_AFTER_MS: i64 = 3_000;

pub async fn set_conversation_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TypingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    set_typing(state, ChatRef::dm(conversation_id), claims, req).await
}

pub async fn set_group_typing(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<TypingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    set_typing(state, ChatRef::group(group_id), claims, req).await
}

pub async fn get_conversation_typing(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    get_typing(state, ChatRef::dm(conversation_id), claims).await
}

pub async fn get_group_typing(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    get_typing(state, ChatRef::group(group_id), claims).await
}

/// Upsert the caller's single typing row for this chat and let subscribed
/// clients know to re-poll.
async fn set_typing(
    state: AppState,
    chat: ChatRef,
    claims: Claims,
    req: TypingRequest,
) -> Result<Json<serde_json::Value>, ApiError> {
    let me = require_user(&state, &claims).await?;
    let user_id = parse_uuid(&me.id, "user id");

    let cid = chat.id.to_string();
    let now = now_ms();
    with_db(&state, move |db| {
        db.set_typing(chat.kind.as_str(), &cid, &me.id, req.is_typing, now)
    })
    .await?;

    state.dispatcher.broadcast(GatewayEvent::TypingUpdate {
        chat,
        user_id,
        is_typing: req.is_typing,
    });

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Who is typing in this chat right now, excluding the caller. Only rows
/// asserted within the staleness window count; nothing is ever cleared
/// server-side.
async fn get_typing(
    state: AppState,
    chat: ChatRef,
    claims: Claims,
) -> Result<Json<Vec<User>>, ApiError> {
    let Some(me) = current_user(&state, &claims).await? else {
        return Ok(Json(vec![]));
    };

    let cid = chat.id.to_string();
    let newer_than = now_ms() - STALE_AFTER_MS;
    let rows = with_db(&state, move |db| {
        db.typing_users(chat.kind.as_str(), &cid, &me.id, newer_than)
    })
    .await?;

    Ok(Json(rows.into_iter().map(user_from_row).collect()))
}
