use axum::{
    Extension, Json,
    extract::{Query, State},
    response::IntoResponse,
};

use parley_types::api::{Claims, PresenceRequest, SearchQuery};
use parley_types::events::GatewayEvent;
use parley_types::models::User;

use crate::error::ApiError;
use crate::helpers::{current_user, now_ms, require_user, user_from_row, with_db};
use crate::state::AppState;

/// All users except the caller.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(me) = current_user(&state, &claims).await? else {
        return Ok(Json(Vec::<User>::new()));
    };

    let rows = with_db(&state, move |db| db.list_users_except(&me.id)).await?;
    Ok(Json(rows.into_iter().map(user_from_row).collect()))
}

/// The caller's own profile, or null when their identity has not been
/// synced from the provider yet.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = current_user(&state, &claims).await?;
    Ok(Json(user.map(user_from_row)))
}

/// Case-insensitive substring search on display name.
pub async fn search_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(me) = current_user(&state, &claims).await? else {
        return Ok(Json(Vec::<User>::new()));
    };

    let rows = with_db(&state, move |db| db.search_users(&me.id, &query.q)).await?;
    Ok(Json(rows.into_iter().map(user_from_row).collect()))
}

/// Flip the caller's online flag and refresh last_seen.
pub async fn set_presence(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<PresenceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let me = require_user(&state, &claims).await?;
    let user_id = crate::helpers::parse_uuid(&me.id, "user id");

    let now = now_ms();
    with_db(&state, move |db| db.set_presence(&me.id, req.is_online, now)).await?;

    state.dispatcher.broadcast(GatewayEvent::PresenceUpdate {
        user_id,
        is_online: req.is_online,
    });

    Ok(Json(serde_json::json!({ "ok": true })))
}
