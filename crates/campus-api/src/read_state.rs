use axum::response::IntoResponse;
use axum::{Extension, Json, extract::Query, extract::State};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use campus_types::api::{
    Claims, MarkReadRequest, MessageView, ReadStateQuery, ReadStateView, UnreadBadge,
};
use campus_types::events::GatewayEvent;
use campus_types::models::ReadState;

use crate::error::{ApiError, ApiResult, optional_uuid, require, require_uuid, run_blocking, run_blocking_api};
use crate::state::AppState;

/// Where the "unread" divider goes in a chronologically ascending message
/// list: the first message past the cursor. No cursor means everything is
/// unread, so the divider sits on the first message. A cursor at or past
/// the newest message yields no divider.
pub fn unread_divider_boundary<'a, I>(
    messages: I,
    last_read_at: Option<DateTime<Utc>>,
) -> Option<Uuid>
where
    I: IntoIterator<Item = &'a MessageView>,
{
    messages
        .into_iter()
        .find(|m| match last_read_at {
            Some(cursor) => m.created_at > cursor,
            None => true,
        })
        .map(|m| m.id)
}

/// All of the caller's read-state rows in the org, plus the per-channel
/// unread badges derived from the channel-level cursors.
pub async fn get_read_states(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ReadStateQuery>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(query.org_id, "org_id")?;

    let db_state = state.clone();
    let account = claims.sub.clone();
    let rows = run_blocking(move || db_state.db.get_read_states(&account, &org_id)).await?;

    let states = rows
        .into_iter()
        .map(|row| row.into_read_state())
        .collect::<anyhow::Result<Vec<ReadState>>>()?;

    let badges: Vec<UnreadBadge> = states
        .iter()
        .filter(|s| s.thread_id.is_none())
        .map(|s| UnreadBadge {
            channel_id: s.channel_id,
            unread_count: s.unread_count,
        })
        .collect();

    let views: Vec<ReadStateView> = states.into_iter().map(read_state_view).collect();

    Ok(Json(serde_json::json!({
        "success": true,
        "read_states": views,
        "badges": badges,
    })))
}

/// Advance the caller's cursor. Stale marks are no-ops; the response always
/// carries the current cursor.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(req.org_id, "org_id")?;
    let channel_id = require_uuid(req.channel_id, "channel_id")?;
    let message_id = require_uuid(req.message_id, "message_id")?;
    let thread_id = optional_uuid(req.thread_id, "thread_id")?;

    let db_state = state.clone();
    let account = claims.sub.clone();
    let row = run_blocking_api(move || {
        let cid = channel_id.to_string();
        if db_state.db.get_channel(&org_id, &cid)?.is_none() {
            return Err(ApiError::NotFound("channel"));
        }

        db_state
            .db
            .mark_read(
                &account,
                &cid,
                thread_id.map(|t| t.to_string()).as_deref(),
                &message_id.to_string(),
            )?
            .ok_or(ApiError::NotFound("message"))
    })
    .await?;

    let read_state = row.into_read_state()?;

    state.dispatcher.broadcast(
        Some(read_state.channel_id),
        GatewayEvent::ReadStateUpdated {
            channel_id: read_state.channel_id,
            thread_id: read_state.thread_id,
            account_id: claims.sub.clone(),
            unread_count: read_state.unread_count,
        },
    );

    let view = read_state_view(read_state);
    Ok(Json(serde_json::json!({ "success": true, "read_state": view })))
}

fn read_state_view(state: ReadState) -> ReadStateView {
    ReadStateView {
        channel_id: state.channel_id,
        thread_id: state.thread_id,
        last_read_message_id: state.last_read_message_id,
        last_read_at: state.last_read_at,
        unread_count: state.unread_count,
    }
}
