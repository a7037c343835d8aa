use tracing::warn;
use uuid::Uuid;

use parley_db::Database;
use parley_db::models::UserRow;
use parley_types::api::Claims;
use parley_types::models::User;

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {e}")))?
        .map_err(ApiError::from)
}

/// Resolve the token's external identity to a synced user record. `None`
/// when the identity provider has not delivered this user yet; read
/// handlers degrade to empty results in that case.
pub(crate) async fn current_user(
    state: &AppState,
    claims: &Claims,
) -> Result<Option<UserRow>, ApiError> {
    let sub = claims.sub.clone();
    with_db(state, move |db| db.get_user_by_external_id(&sub)).await
}

/// Like `current_user`, but for mutations: an unresolved identity is a
/// fatal authentication error and performs no write.
pub(crate) async fn require_user(state: &AppState, claims: &Claims) -> Result<UserRow, ApiError> {
    current_user(state, claims).await?.ok_or(ApiError::NotAuthenticated)
}

pub(crate) fn parse_uuid(raw: &str, context: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", context, raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(raw: &str, context: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt timestamp '{}' on {}: {}", raw, context, e);
        chrono::DateTime::default()
    })
}

/// Order chat summaries newest-first. `Option<i64>` compares with `None`
/// smallest, so reversing the operands pushes never-messaged chats last.
pub(crate) fn sort_newest_first<T>(items: &mut [T], last_at: impl Fn(&T) -> Option<i64>) {
    items.sort_by(|a, b| last_at(b).cmp(&last_at(a)));
}

pub(crate) fn user_from_row(row: UserRow) -> User {
    let created_at = parse_timestamp(&row.created_at, "user");
    User {
        id: parse_uuid(&row.id, "user id"),
        external_id: row.external_id,
        name: row.name,
        email: row.email,
        avatar_url: row.avatar_url,
        is_online: row.is_online,
        last_seen: row.last_seen,
        created_at,
    }
}
