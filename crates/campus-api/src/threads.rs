use std::collections::HashMap;

use axum::response::IntoResponse;
use axum::{Extension, Json, extract::Query, extract::State};

use campus_types::api::{Claims, ThreadDetailRequest, ThreadListQuery, ThreadView};
use campus_types::models::Thread;

use crate::error::{ApiError, ApiResult, require, require_uuid, run_blocking};
use crate::state::AppState;

pub async fn list_threads(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Query(query): Query<ThreadListQuery>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(query.org_id, "org_id")?;
    let channel_id = require_uuid(query.channel_id, "channel_id")?;

    let db_state = state.clone();
    let rows = run_blocking(move || {
        let cid = channel_id.to_string();
        if db_state.db.get_channel(&org_id, &cid)?.is_none() {
            return Ok(None);
        }

        let threads = db_state.db.list_threads(&cid)?;
        let thread_ids: Vec<String> = threads.iter().map(|t| t.id.clone()).collect();
        let participants = db_state.db.get_participants_for_threads(&thread_ids)?;
        Ok(Some((threads, participants)))
    })
    .await?;

    let Some((thread_rows, participant_rows)) = rows else {
        return Err(ApiError::NotFound("channel"));
    };

    let mut participants_by_thread: HashMap<String, Vec<String>> = HashMap::new();
    for (thread_id, profile_id) in participant_rows {
        participants_by_thread.entry(thread_id).or_default().push(profile_id);
    }

    let threads = thread_rows
        .into_iter()
        .map(|row| {
            let participants = participants_by_thread.remove(&row.id).unwrap_or_default();
            Ok(thread_view(row.into_thread()?, participants))
        })
        .collect::<anyhow::Result<Vec<ThreadView>>>()?;

    Ok(Json(serde_json::json!({ "success": true, "threads": threads })))
}

pub async fn thread_detail(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<ThreadDetailRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(req.org_id, "org_id")?;
    let thread_id = require_uuid(req.thread_id, "thread_id")?;

    let db_state = state.clone();
    let found = run_blocking(move || {
        let tid = thread_id.to_string();
        let Some(row) = db_state.db.get_thread(&org_id, &tid)? else {
            return Ok(None);
        };
        let participants = db_state.db.thread_participants(&tid)?;
        Ok(Some((row, participants)))
    })
    .await?;

    let Some((row, participants)) = found else {
        return Err(ApiError::NotFound("thread"));
    };

    let view = thread_view(row.into_thread()?, participants);
    Ok(Json(serde_json::json!({ "success": true, "thread": view })))
}

fn thread_view(thread: Thread, participants: Vec<String>) -> ThreadView {
    ThreadView {
        id: thread.id,
        channel_id: thread.channel_id,
        parent_message_id: thread.parent_message_id,
        message_count: thread.message_count,
        last_reply_at: thread.last_reply_at,
        created_at: thread.created_at,
        participants,
    }
}
