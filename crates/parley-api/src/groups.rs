use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{
    Claims, CreateGroupRequest, CreateGroupResponse, GroupDetail, GroupSummary,
};

use crate::error::ApiError;
use crate::helpers::{current_user, now_ms, parse_uuid, require_user, user_from_row, with_db};
use crate::messages::enrich_messages;
use crate::state::AppState;

/// Create a named multi-member conversation. The creator is always a
/// member, listed or not; duplicate member ids collapse.
pub async fn create_group(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let me = require_user(&state, &claims).await?;

    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("group name is empty"));
    }

    let mut member_ids: Vec<String> = vec![me.id.clone()];
    member_ids.extend(req.member_ids.iter().map(|id| id.to_string()));

    let group_id = Uuid::new_v4();
    let gid = group_id.to_string();
    let now = now_ms();
    with_db(&state, move |db| {
        db.create_group(&gid, &name, &me.id, &member_ids, now)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(CreateGroupResponse { group_id })))
}

/// All groups the caller belongs to, enriched with last message, unread
/// count, and member count; ordered like the conversation list.
pub async fn list_groups(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(me) = current_user(&state, &claims).await? else {
        return Ok(Json(Vec::<GroupSummary>::new()));
    };

    let mut summaries = with_db(&state, move |db| {
        let groups = db.list_groups_for(&me.id)?;

        let mut summaries = Vec::with_capacity(groups.len());
        for group in groups {
            let last_message = match &group.last_message_id {
                Some(mid) => {
                    let row = db.get_message(mid)?;
                    enrich_messages(db, row.into_iter().collect())?.pop()
                }
                None => None,
            };

            let unread_count = db.unread_count("group", &group.id, &me.id)?;
            let member_count = db.group_member_count(&group.id)?;

            summaries.push(GroupSummary {
                id: parse_uuid(&group.id, "group id"),
                name: group.name,
                created_by: parse_uuid(&group.created_by, "creator id"),
                last_message,
                last_message_at: group.last_message_at,
                unread_count,
                member_count,
            });
        }
        Ok(summaries)
    })
    .await?;

    crate::helpers::sort_newest_first(&mut summaries, |s| s.last_message_at);

    Ok(Json(summaries))
}

/// A single group with hydrated member profiles. 404 for non-members.
pub async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = current_user(&state, &claims)
        .await?
        .ok_or(ApiError::NotFound("group not found"))?;

    let gid = group_id.to_string();
    let detail = with_db(&state, move |db| {
        let Some(group) = db.get_group(&gid)? else {
            return Ok(None);
        };
        if !db.is_group_member(&gid, &me.id)? {
            return Ok(None);
        }

        let members = db
            .get_group_members(&gid)?
            .into_iter()
            .map(user_from_row)
            .collect();

        Ok(Some(GroupDetail {
            id: parse_uuid(&group.id, "group id"),
            name: group.name,
            created_by: parse_uuid(&group.created_by, "creator id"),
            last_message_at: group.last_message_at,
            members,
        }))
    })
    .await?
    .ok_or(ApiError::NotFound("group not found"))?;

    Ok(Json(detail))
}
