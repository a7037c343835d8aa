use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::MessageRow;
use parley_types::api::{
    Claims, MessageResponse, ReactionGroup, SendMessageRequest, SendMessageResponse,
    ToggleReactionRequest,
};
use parley_types::events::GatewayEvent;
use parley_types::models::{ChatKind, ChatRef};

use crate::error::ApiError;
use crate::helpers::{now_ms, parse_timestamp, parse_uuid, require_user, user_from_row, with_db};
use crate::state::AppState;

// -- Routes --

pub async fn list_conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    list_chat_messages(state, ChatKind::Dm, conversation_id).await
}

pub async fn list_group_messages(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    list_chat_messages(state, ChatKind::Group, group_id).await
}

pub async fn send_conversation_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    send_message(state, ChatRef::dm(conversation_id), claims, req).await
}

pub async fn send_group_message(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    send_message(state, ChatRef::group(group_id), claims, req).await
}

pub async fn mark_conversation_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    mark_read(state, ChatRef::dm(conversation_id), claims).await
}

pub async fn mark_group_read(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    mark_read(state, ChatRef::group(group_id), claims).await
}

/// Soft delete: only the sender may delete, the content is cleared, and
/// the flag never resets.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = require_user(&state, &claims).await?;

    let mid = message_id.to_string();
    let message = with_db(&state, move |db| db.get_message(&mid))
        .await?
        .ok_or(ApiError::NotFound("message not found"))?;

    if message.sender_id != me.id {
        return Err(ApiError::Forbidden("only the sender can delete a message"));
    }

    let chat = chat_ref_of(&message)?;
    let mid = message_id.to_string();
    with_db(&state, move |db| db.soft_delete_message(&mid)).await?;

    state.dispatcher.broadcast(GatewayEvent::MessageDelete { chat, message_id });

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Toggle the caller's (emoji) reaction on a message: removed when
/// present, added when absent. The find-and-write runs as one db critical
/// section, so the pair can never duplicate.
pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let me = require_user(&state, &claims).await?;
    let user_id = parse_uuid(&me.id, "user id");

    let mid = message_id.to_string();
    let message = with_db(&state, move |db| db.get_message(&mid))
        .await?
        .ok_or(ApiError::NotFound("message not found"))?;
    let chat = chat_ref_of(&message)?;

    let reaction_id = Uuid::new_v4().to_string();
    let mid = message_id.to_string();
    let emoji = req.emoji.clone();
    let added = with_db(&state, move |db| {
        db.toggle_reaction(&reaction_id, &mid, &me.id, &emoji)
    })
    .await?;

    let event = if added {
        GatewayEvent::ReactionAdd { chat, message_id, user_id, emoji: req.emoji }
    } else {
        GatewayEvent::ReactionRemove { chat, message_id, user_id, emoji: req.emoji }
    };
    state.dispatcher.broadcast(event);

    Ok(Json(serde_json::json!({ "added": added })))
}

// -- Shared handlers --

async fn list_chat_messages(
    state: AppState,
    kind: ChatKind,
    chat_id: Uuid,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let cid = chat_id.to_string();
    let messages = with_db(&state, move |db| {
        let rows = db.list_messages(kind.as_str(), &cid)?;
        enrich_messages(db, rows)
    })
    .await?;
    Ok(Json(messages))
}

async fn send_message(
    state: AppState,
    chat: ChatRef,
    claims: Claims,
    req: SendMessageRequest,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let me = require_user(&state, &claims).await?;
    let sender_id = parse_uuid(&me.id, "user id");

    check_membership(&state, chat, &me.id).await?;

    let content = req.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::BadRequest("message content is empty"));
    }

    let message_id = Uuid::new_v4();
    let mid = message_id.to_string();
    let cid = chat.id.to_string();
    let now = now_ms();
    with_db(&state, move |db| {
        db.insert_message(&mid, chat.kind.as_str(), &cid, &me.id, &content, now)
    })
    .await?;

    state.dispatcher.broadcast(GatewayEvent::MessageCreate { chat, message_id, sender_id });

    Ok(Json(SendMessageResponse { message_id }))
}

async fn mark_read(
    state: AppState,
    chat: ChatRef,
    claims: Claims,
) -> Result<Json<serde_json::Value>, ApiError> {
    let me = require_user(&state, &claims).await?;
    let user_id = parse_uuid(&me.id, "user id");

    let cid = chat.id.to_string();
    let newly_read = with_db(&state, move |db| {
        db.mark_chat_read(chat.kind.as_str(), &cid, &me.id)
    })
    .await?;

    // Only tell other clients when something actually changed
    if newly_read > 0 {
        state.dispatcher.broadcast(GatewayEvent::ReadUpdate { chat, user_id });
    }

    Ok(Json(serde_json::json!({ "newly_read": newly_read })))
}

/// Senders must belong to the chat they post into.
async fn check_membership(state: &AppState, chat: ChatRef, user_id: &str) -> Result<(), ApiError> {
    let cid = chat.id.to_string();
    let uid = user_id.to_string();
    match chat.kind {
        ChatKind::Dm => {
            let conv = with_db(state, move |db| db.get_conversation(&cid))
                .await?
                .ok_or(ApiError::NotFound("conversation not found"))?;
            if conv.user_a != user_id && conv.user_b != user_id {
                return Err(ApiError::Forbidden("not a participant in this conversation"));
            }
        }
        ChatKind::Group => {
            let is_member = with_db(state, move |db| {
                match db.get_group(&cid)? {
                    Some(_) => db.is_group_member(&cid, &uid).map(Some),
                    None => Ok(None),
                }
            })
            .await?
            .ok_or(ApiError::NotFound("group not found"))?;
            if !is_member {
                return Err(ApiError::Forbidden("not a member of this group"));
            }
        }
    }
    Ok(())
}

fn chat_ref_of(message: &MessageRow) -> Result<ChatRef, ApiError> {
    let kind: ChatKind = message
        .chat_kind
        .parse()
        .map_err(anyhow::Error::msg)?;
    Ok(ChatRef { kind, id: parse_uuid(&message.chat_id, "chat id") })
}

/// Attach sender profiles, reader sets, and per-emoji reaction groups to a
/// page of message rows. Reaction aggregation is derived here at read
/// time; nothing aggregated is stored.
pub(crate) fn enrich_messages(
    db: &Database,
    rows: Vec<MessageRow>,
) -> anyhow::Result<Vec<MessageResponse>> {
    let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();

    let read_rows = db.get_reads_for_messages(&message_ids)?;
    let reaction_rows = db.get_reactions_for_messages(&message_ids)?;

    let mut sender_ids: Vec<String> = rows.iter().map(|r| r.sender_id.clone()).collect();
    sender_ids.sort();
    sender_ids.dedup();
    let senders: HashMap<String, parley_types::models::User> = db
        .get_users_by_ids(&sender_ids)?
        .into_iter()
        .map(|row| (row.id.clone(), user_from_row(row)))
        .collect();

    let mut reads: HashMap<String, Vec<Uuid>> = HashMap::new();
    for r in read_rows {
        reads.entry(r.message_id).or_default().push(parse_uuid(&r.user_id, "reader id"));
    }

    // Group by message, then by emoji in first-seen order
    let mut reactions: HashMap<String, Vec<ReactionGroup>> = HashMap::new();
    for r in reaction_rows {
        let groups = reactions.entry(r.message_id).or_default();
        let user_id = parse_uuid(&r.user_id, "reactor id");
        match groups.iter_mut().find(|g| g.emoji == r.emoji) {
            Some(group) => {
                group.count += 1;
                group.user_ids.push(user_id);
            }
            None => groups.push(ReactionGroup {
                emoji: r.emoji,
                count: 1,
                user_ids: vec![user_id],
            }),
        }
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let created_at = parse_timestamp(&row.created_at, "message");
            MessageResponse {
                id: parse_uuid(&row.id, "message id"),
                chat_id: parse_uuid(&row.chat_id, "chat id"),
                sender_id: parse_uuid(&row.sender_id, "sender id"),
                sender: senders.get(&row.sender_id).cloned(),
                content: row.content,
                is_deleted: row.is_deleted,
                read_by: reads.remove(&row.id).unwrap_or_default(),
                reactions: reactions.remove(&row.id).unwrap_or_default(),
                created_at,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::state::AppStateInner;
    use parley_db::Database;
    use parley_gateway::dispatcher::Dispatcher;

    fn seed_user(db: &Database, name: &str) -> String {
        db.upsert_user(
            &format!("ext_{name}"),
            name,
            &format!("{name}@example.com"),
            "",
            0,
        )
        .unwrap()
    }

    fn test_state(db: Database) -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            jwt_secret: "test-secret".into(),
            webhook_secret: "whsec_dGVzdA==".into(),
        })
    }

    fn claims_for(name: &str) -> Claims {
        Claims { sub: format!("ext_{name}"), exp: 0 }
    }

    #[test]
    fn test_enrichment_groups_reactions_per_emoji() {
        let db = Database::open_in_memory().unwrap();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 0).unwrap();

        let mid = Uuid::new_v4().to_string();
        db.insert_message(&mid, "dm", &conv, &ada, "hi", 100).unwrap();

        db.toggle_reaction(&Uuid::new_v4().to_string(), &mid, &ada, "👍").unwrap();
        db.toggle_reaction(&Uuid::new_v4().to_string(), &mid, &bob, "👍").unwrap();
        db.toggle_reaction(&Uuid::new_v4().to_string(), &mid, &bob, "🎉").unwrap();

        let rows = db.list_messages("dm", &conv).unwrap();
        let enriched = enrich_messages(&db, rows).unwrap();
        assert_eq!(enriched.len(), 1);

        let msg = &enriched[0];
        assert_eq!(msg.sender.as_ref().unwrap().name, "ada");
        assert_eq!(msg.read_by.len(), 1);
        assert_eq!(msg.reactions.len(), 2);

        let thumbs = msg.reactions.iter().find(|g| g.emoji == "👍").unwrap();
        assert_eq!(thumbs.count, 2);
        let party = msg.reactions.iter().find(|g| g.emoji == "🎉").unwrap();
        assert_eq!(party.count, 1);
    }

    #[test]
    fn test_enrichment_of_empty_page() {
        let db = Database::open_in_memory().unwrap();
        let enriched = enrich_messages(&db, vec![]).unwrap();
        assert!(enriched.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_non_sender_rejected_and_content_intact() {
        let db = Database::open_in_memory().unwrap();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 0).unwrap();

        let mid = Uuid::new_v4().to_string();
        db.insert_message(&mid, "dm", &conv, &ada, "keep me", 100).unwrap();

        let state = test_state(db);
        let result = delete_message(
            State(state.clone()),
            Path(mid.parse().unwrap()),
            Extension(claims_for("bob")),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));

        let row = state.db.get_message(&mid).unwrap().unwrap();
        assert_eq!(row.content, "keep me");
        assert!(!row.is_deleted);

        // the sender's own delete still goes through
        let result = delete_message(
            State(state.clone()),
            Path(mid.parse().unwrap()),
            Extension(claims_for("ada")),
        )
        .await;
        assert!(result.is_ok());
        assert!(state.db.get_message(&mid).unwrap().unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_group_send_by_non_member_rejected_without_write() {
        let db = Database::open_in_memory().unwrap();
        let ada = seed_user(&db, "ada");
        seed_user(&db, "eve");

        let gid = Uuid::new_v4().to_string();
        db.create_group(&gid, "core", &ada, &[ada.clone()], 0).unwrap();

        let state = test_state(db);
        let result = send_group_message(
            State(state.clone()),
            Path(gid.parse().unwrap()),
            Extension(claims_for("eve")),
            Json(SendMessageRequest { content: "let me in".into() }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
        assert!(state.db.list_messages("group", &gid).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dm_send_by_outsider_rejected_without_write() {
        let db = Database::open_in_memory().unwrap();
        let ada = seed_user(&db, "ada");
        let bob = seed_user(&db, "bob");
        seed_user(&db, "eve");
        let (conv, _) = db.get_or_create_conversation(&ada, &bob, 0).unwrap();

        let state = test_state(db);
        let result = send_conversation_message(
            State(state.clone()),
            Path(conv.parse().unwrap()),
            Extension(claims_for("eve")),
            Json(SendMessageRequest { content: "hi".into() }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
        assert!(state.db.list_messages("dm", &conv).unwrap().is_empty());
    }
}
