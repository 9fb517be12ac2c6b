use std::collections::HashMap;

use anyhow::anyhow;
use axum::response::IntoResponse;
use axum::{Extension, Json, extract::Query, extract::State};
use uuid::Uuid;

use campus_db::models::{parse_timestamp, to_storage_timestamp};
use campus_types::api::{
    Claims, MessageListQuery, MessageView, ReactionGroup, SendMessageRequest,
    ToggleReactionRequest,
};
use campus_types::events::GatewayEvent;
use campus_types::models::{Message, MessageKind};

use crate::channels::channel_can_post;
use crate::error::{ApiError, ApiResult, optional_uuid, require, require_uuid, run_blocking, run_blocking_api};
use crate::read_state::unread_divider_boundary;
use crate::state::AppState;

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(req.org_id, "org_id")?;
    let channel_id = require_uuid(req.channel_id, "channel_id")?;
    let body = require(req.body, "body")?;
    let thread_id = optional_uuid(req.thread_id, "thread_id")?;
    let parent_message_id = optional_uuid(req.parent_message_id, "parent_message_id")?;
    let kind = req.kind.unwrap_or(MessageKind::Text);

    let db_state = state.clone();
    let org = org_id.clone();
    let author = claims.sub.clone();
    let payload = req.payload.map(|v| v.to_string());

    let (message, thread_stats) = run_blocking_api(move || {
        let cid = channel_id.to_string();

        let channel = db_state
            .db
            .get_channel(&org, &cid)?
            .ok_or(ApiError::NotFound("channel"))?
            .into_channel()?;
        let is_member = db_state.db.is_channel_member(&cid, &author)?;
        if !channel_can_post(&channel, is_member) {
            return Err(ApiError::Forbidden);
        }

        let thread = match (thread_id, parent_message_id) {
            (Some(tid), _) => {
                let row = db_state
                    .db
                    .get_thread(&org, &tid.to_string())?
                    .ok_or(ApiError::NotFound("thread"))?;
                if row.channel_id != cid {
                    return Err(ApiError::NotFound("thread"));
                }
                Some(row.id)
            }
            (None, Some(pid)) => Some(
                db_state
                    .db
                    .ensure_thread(&cid, &pid.to_string())?
                    .ok_or(ApiError::NotFound("message"))?,
            ),
            (None, None) => None,
        };

        let message_id = Uuid::new_v4().to_string();
        let thread_stats = match &thread {
            Some(tid) => Some(db_state.db.insert_thread_reply(
                &message_id,
                &cid,
                tid,
                &author,
                kind.as_str(),
                &body,
                payload.as_deref(),
            )?),
            None => {
                db_state.db.insert_message(
                    &message_id,
                    &cid,
                    None,
                    &author,
                    kind.as_str(),
                    &body,
                    payload.as_deref(),
                )?;
                None
            }
        };

        let message = db_state
            .db
            .get_message(&message_id)?
            .ok_or_else(|| ApiError::Internal(anyhow!("message vanished after insert")))?
            .into_message()?;

        Ok((message, thread_stats))
    })
    .await?;

    state.dispatcher.broadcast(
        Some(message.channel_id),
        GatewayEvent::MessageCreated {
            id: message.id,
            channel_id: message.channel_id,
            thread_id: message.thread_id,
            author_id: message.author_id.clone(),
            kind: message.kind.as_str().to_string(),
            body: message.body.clone(),
            created_at: message.created_at,
        },
    );

    if let (Some(thread_id), Some((message_count, last_reply_at))) =
        (message.thread_id, thread_stats)
    {
        let last_reply_at = last_reply_at.as_deref().map(parse_timestamp).transpose()?;
        state.dispatcher.broadcast(
            Some(message.channel_id),
            GatewayEvent::ThreadReplied {
                channel_id: message.channel_id,
                thread_id,
                message_count,
                last_reply_at,
            },
        );
    }

    let view = message_view(message, vec![]);
    Ok(Json(serde_json::json!({ "success": true, "message": view })))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<MessageListQuery>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(query.org_id, "org_id")?;
    let channel_id = require_uuid(query.channel_id, "channel_id")?;
    let limit = query.limit.min(200);

    // Cursors arrive as whatever timestamp format the client echoed back;
    // normalize before comparing against stored values.
    let before = query
        .before
        .map(|raw| {
            parse_timestamp(&raw)
                .map(to_storage_timestamp)
                .map_err(|_| ApiError::InvalidField("before"))
        })
        .transpose()?;

    let db_state = state.clone();
    let org = org_id.clone();
    let cid = channel_id.to_string();
    if run_blocking(move || db_state.db.get_channel(&org, &cid)).await?.is_none() {
        return Err(ApiError::NotFound("channel"));
    }

    // Page + reactions and the requester's cursor are independent; fan out
    // and join in memory.
    let page_state = state.clone();
    let page_channel = channel_id.to_string();
    let cursor_state = state.clone();
    let cursor_channel = channel_id.to_string();
    let account = claims.sub.clone();

    let (page, cursor) = tokio::join!(
        run_blocking(move || {
            let rows = page_state.db.get_messages(&page_channel, limit, before.as_deref())?;
            let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let reactions = page_state.db.get_reactions_for_messages(&message_ids)?;
            Ok((rows, reactions))
        }),
        run_blocking(move || cursor_state.db.get_read_state(&account, &cursor_channel, None)),
    );

    let (rows, reaction_rows) = page?;
    let cursor = cursor?
        .map(|row| row.into_read_state())
        .transpose()?;

    // Group reactions by message_id -> emoji -> profile_ids
    let mut reaction_map: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
    for r in &reaction_rows {
        let emoji_map = reaction_map.entry(r.message_id.clone()).or_default();
        emoji_map.entry(r.emoji.clone()).or_default().push(r.profile_id.clone());
    }

    // Newest-first page for rendering; boundary selection wants ascending.
    let messages = rows
        .into_iter()
        .map(|row| {
            let reactions = reaction_map
                .remove(&row.id)
                .map(|emoji_map| {
                    let mut groups: Vec<ReactionGroup> = emoji_map
                        .into_iter()
                        .map(|(emoji, profile_ids)| ReactionGroup {
                            emoji,
                            count: profile_ids.len(),
                            profile_ids,
                        })
                        .collect();
                    groups.sort_by(|a, b| a.emoji.cmp(&b.emoji));
                    groups
                })
                .unwrap_or_default();

            Ok(message_view(row.into_message()?, reactions))
        })
        .collect::<anyhow::Result<Vec<MessageView>>>()?;

    let unread_boundary = unread_divider_boundary(
        messages.iter().rev(),
        cursor.as_ref().and_then(|c| c.last_read_at),
    );

    Ok(Json(serde_json::json!({
        "success": true,
        "messages": messages,
        "unread_boundary": unread_boundary,
    })))
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(req.org_id, "org_id")?;
    let message_id = require_uuid(req.message_id, "message_id")?;
    let emoji = require(req.emoji, "emoji")?;

    let db_state = state.clone();
    let profile = claims.sub.clone();
    let emoji_db = emoji.clone();
    let (toggle, channel_id) = run_blocking_api(move || {
        let message = db_state
            .db
            .get_message(&message_id.to_string())?
            .ok_or(ApiError::NotFound("message"))?
            .into_message()?;

        // Org scoping runs through the channel.
        if db_state
            .db
            .get_channel(&org_id, &message.channel_id.to_string())?
            .is_none()
        {
            return Err(ApiError::NotFound("message"));
        }

        let toggle = db_state.db.toggle_reaction(
            &Uuid::new_v4().to_string(),
            &message_id.to_string(),
            &profile,
            &emoji_db,
        )?;

        Ok((toggle, message.channel_id))
    })
    .await?;

    let added = toggle == campus_db::queries::ReactionToggle::Added;
    let event = if added {
        GatewayEvent::ReactionAdded {
            channel_id,
            message_id,
            profile_id: claims.sub.clone(),
            emoji,
        }
    } else {
        GatewayEvent::ReactionRemoved {
            channel_id,
            message_id,
            profile_id: claims.sub.clone(),
            emoji,
        }
    };
    state.dispatcher.broadcast(Some(channel_id), event);

    Ok(Json(serde_json::json!({ "success": true, "added": added })))
}

fn message_view(message: Message, reactions: Vec<ReactionGroup>) -> MessageView {
    MessageView {
        id: message.id,
        channel_id: message.channel_id,
        thread_id: message.thread_id,
        author_id: message.author_id,
        kind: message.kind,
        body: message.body,
        payload: message.payload,
        created_at: message.created_at,
        reactions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{claims_for, test_state};

    fn send_req(org: &str, channel: &str, body: &str) -> SendMessageRequest {
        SendMessageRequest {
            org_id: Some(org.into()),
            channel_id: Some(channel.into()),
            thread_id: None,
            parent_message_id: None,
            kind: None,
            body: Some(body.into()),
            payload: None,
        }
    }

    async fn body_json(resp: impl IntoResponse) -> serde_json::Value {
        let resp = resp.into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn posting_requires_body_before_store_access() {
        let state = test_state();
        let mut req = send_req("org-1", &Uuid::new_v4().to_string(), "x");
        req.body = None;

        let err = send_message(State(state), Extension(claims_for("profile-1")), Json(req))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::MissingField("body")));
    }

    #[tokio::test]
    async fn non_members_cannot_post_into_a_dm() {
        let state = test_state();
        let dm = state.db.resolve_dm_channel("org-1", "profile-1", "profile-2").unwrap();

        let err = send_message(
            State(state),
            Extension(claims_for("profile-9")),
            Json(send_req("org-1", &dm.channel_id.to_string(), "hi")),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::Forbidden));
    }

    #[tokio::test]
    async fn reply_by_parent_creates_thread_and_updates_stats() {
        let state = test_state();
        let dm = state.db.resolve_dm_channel("org-1", "profile-1", "profile-2").unwrap();
        let channel = dm.channel_id.to_string();

        let first = send_message(
            State(state.clone()),
            Extension(claims_for("profile-1")),
            Json(send_req("org-1", &channel, "anyone around?")),
        )
        .await
        .unwrap();
        let first = body_json(first).await;
        let parent_id = first["message"]["id"].as_str().unwrap().to_string();

        let mut reply = send_req("org-1", &channel, "right here");
        reply.parent_message_id = Some(parent_id.clone());
        let reply = send_message(State(state.clone()), Extension(claims_for("profile-2")), Json(reply))
            .await
            .unwrap();
        let reply = body_json(reply).await;
        assert_eq!(reply["success"], true);
        let thread_id = reply["message"]["thread_id"].as_str().unwrap().to_string();

        let thread = state.db.get_thread("org-1", &thread_id).unwrap().unwrap();
        assert_eq!(thread.message_count, 1);
        assert_eq!(thread.parent_message_id, parent_id);
    }

    #[tokio::test]
    async fn listing_groups_reactions_and_marks_unread_boundary() {
        let state = test_state();
        let dm = state.db.resolve_dm_channel("org-1", "profile-1", "profile-2").unwrap();
        let channel = dm.channel_id.to_string();

        let mut ids = vec![];
        for body in ["one", "two", "three"] {
            let resp = send_message(
                State(state.clone()),
                Extension(claims_for("profile-1")),
                Json(send_req("org-1", &channel, body)),
            )
            .await
            .unwrap();
            ids.push(body_json(resp).await["message"]["id"].as_str().unwrap().to_string());
        }

        state
            .db
            .toggle_reaction(&Uuid::new_v4().to_string(), &ids[0], "profile-2", "✅")
            .unwrap();
        state.db.mark_read("profile-2", &channel, None, &ids[0]).unwrap();

        let resp = list_messages(
            State(state),
            Extension(claims_for("profile-2")),
            Query(MessageListQuery {
                org_id: Some("org-1".into()),
                channel_id: Some(channel),
                limit: 50,
                before: None,
            }),
        )
        .await
        .unwrap();
        let json = body_json(resp).await;

        let messages = json["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        // Newest first.
        assert_eq!(messages[0]["body"], "three");
        // The reacted message carries its group.
        let reacted = messages.iter().find(|m| m["id"] == ids[0].as_str()).unwrap();
        assert_eq!(reacted["reactions"][0]["emoji"], "✅");
        assert_eq!(reacted["reactions"][0]["count"], 1);
        // Divider sits on the first message after the cursor.
        assert_eq!(json["unread_boundary"], ids[1].as_str());
    }

    #[tokio::test]
    async fn reaction_toggle_round_trip() {
        let state = test_state();
        let dm = state.db.resolve_dm_channel("org-1", "profile-1", "profile-2").unwrap();
        let channel = dm.channel_id.to_string();

        let resp = send_message(
            State(state.clone()),
            Extension(claims_for("profile-1")),
            Json(send_req("org-1", &channel, "rate this")),
        )
        .await
        .unwrap();
        let message_id = body_json(resp).await["message"]["id"].as_str().unwrap().to_string();

        let react = |state: AppState, emoji: &str| {
            let req = ToggleReactionRequest {
                org_id: Some("org-1".into()),
                message_id: Some(message_id.clone()),
                emoji: Some(emoji.into()),
            };
            toggle_reaction(State(state), Extension(claims_for("profile-2")), Json(req))
        };

        let first = body_json(react(state.clone(), "🎉").await.unwrap()).await;
        assert_eq!(first["added"], true);
        let second = body_json(react(state.clone(), "🎉").await.unwrap()).await;
        assert_eq!(second["added"], false);

        // Wrong org resolves to not-found.
        let err = toggle_reaction(
            State(state),
            Extension(claims_for("profile-2")),
            Json(ToggleReactionRequest {
                org_id: Some("org-2".into()),
                message_id: Some(message_id),
                emoji: Some("🎉".into()),
            }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::NotFound("message")));
    }
}
