/// Database row types — these map directly to SQLite rows.
/// Distinct from parley-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub external_id: String,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub is_online: bool,
    pub last_seen: i64,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub user_a: String,
    pub user_b: String,
    pub last_message_id: Option<String>,
    pub last_message_at: Option<i64>,
}

pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub last_message_id: Option<String>,
    pub last_message_at: Option<i64>,
}

pub struct MessageRow {
    pub id: String,
    pub chat_kind: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub is_deleted: bool,
    pub created_at: String,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

pub struct ReadRow {
    pub message_id: String,
    pub user_id: String,
}
