use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::User;

// -- JWT Claims --

/// Bearer-token claims shared across parley-api (REST middleware) and
/// parley-gateway (WebSocket identify). `sub` carries the identity
/// provider's opaque user id, not our internal record id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresenceRequest {
    pub is_online: bool,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

// -- Identity webhook --

#[derive(Debug, Deserialize)]
pub struct IdentityEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: IdentityProfile,
}

#[derive(Debug, Deserialize)]
pub struct IdentityProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar_url: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub other_user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub conversation_id: Uuid,
}

/// One entry in the caller's conversation list, enriched with the other
/// participant, the last message, and the unread count.
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub other_user: Option<User>,
    pub last_message: Option<MessageResponse>,
    pub last_message_at: Option<i64>,
    pub unread_count: u64,
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    pub id: Uuid,
    pub other_user: Option<User>,
    pub last_message_at: Option<i64>,
}

// -- Groups --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CreateGroupResponse {
    pub group_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct GroupSummary {
    pub id: Uuid,
    pub name: String,
    pub created_by: Uuid,
    pub last_message: Option<MessageResponse>,
    pub last_message_at: Option<i64>,
    pub unread_count: u64,
    pub member_count: usize,
}

#[derive(Debug, Serialize)]
pub struct GroupDetail {
    pub id: Uuid,
    pub name: String,
    pub created_by: Uuid,
    pub last_message_at: Option<i64>,
    pub members: Vec<User>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub sender: Option<User>,
    pub content: String,
    pub is_deleted: bool,
    pub read_by: Vec<Uuid>,
    pub reactions: Vec<ReactionGroup>,
    pub created_at: DateTime<Utc>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

/// Per-emoji aggregation for display. Derived at read time, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

// -- Typing --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypingRequest {
    pub is_typing: bool,
}
