use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{
    Claims, ConversationDetail, ConversationSummary, CreateConversationRequest,
    CreateConversationResponse,
};

use crate::error::ApiError;
use crate::helpers::{current_user, now_ms, parse_uuid, require_user, user_from_row, with_db};
use crate::messages::enrich_messages;
use crate::state::AppState;

/// Get or create the two-party conversation with another user. Identified
/// solely by the unordered member pair, so repeated calls (in either
/// argument order) return the same conversation.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let me = require_user(&state, &claims).await?;

    if me.id == req.other_user_id.to_string() {
        return Err(ApiError::BadRequest("cannot open a conversation with yourself"));
    }

    let other = req.other_user_id.to_string();
    let now = now_ms();
    let (conversation_id, created) = with_db(&state, move |db| {
        if db.get_user_by_id(&other)?.is_none() {
            return Ok(None);
        }
        db.get_or_create_conversation(&me.id, &other, now).map(Some)
    })
    .await?
    .ok_or(ApiError::NotFound("user not found"))?;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(CreateConversationResponse {
            conversation_id: parse_uuid(&conversation_id, "conversation id"),
        }),
    ))
}

/// The caller's conversation list, each entry enriched with the other
/// participant, the last message, and the unread count, sorted by last
/// message time descending with never-messaged conversations last. All of
/// this is recomputed per read; nothing incremental is kept.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(me) = current_user(&state, &claims).await? else {
        return Ok(Json(Vec::<ConversationSummary>::new()));
    };

    let mut summaries = with_db(&state, move |db| {
        let conversations = db.list_conversations_for(&me.id)?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conv in conversations {
            let other_id = if conv.user_a == me.id { &conv.user_b } else { &conv.user_a };
            let other_user = db.get_user_by_id(other_id)?.map(user_from_row);

            let last_message = match &conv.last_message_id {
                Some(mid) => {
                    let row = db.get_message(mid)?;
                    enrich_messages(db, row.into_iter().collect())?.pop()
                }
                None => None,
            };

            let unread_count = db.unread_count("dm", &conv.id, &me.id)?;

            summaries.push(ConversationSummary {
                id: parse_uuid(&conv.id, "conversation id"),
                other_user,
                last_message,
                last_message_at: conv.last_message_at,
                unread_count,
            });
        }
        Ok(summaries)
    })
    .await?;

    crate::helpers::sort_newest_first(&mut summaries, |s| s.last_message_at);

    Ok(Json(summaries))
}

/// A single conversation with the other participant hydrated. Returns 404
/// when the caller is not one of the two members.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = current_user(&state, &claims)
        .await?
        .ok_or(ApiError::NotFound("conversation not found"))?;

    let cid = conversation_id.to_string();
    let detail = with_db(&state, move |db| {
        let Some(conv) = db.get_conversation(&cid)? else {
            return Ok(None);
        };
        if conv.user_a != me.id && conv.user_b != me.id {
            return Ok(None);
        }

        let other_id = if conv.user_a == me.id { &conv.user_b } else { &conv.user_a };
        let other_user = db.get_user_by_id(other_id)?.map(user_from_row);

        Ok(Some(ConversationDetail {
            id: parse_uuid(&conv.id, "conversation id"),
            other_user,
            last_message_at: conv.last_message_at,
        }))
    })
    .await?
    .ok_or(ApiError::NotFound("conversation not found"))?;

    Ok(Json(detail))
}
