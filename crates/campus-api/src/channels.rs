use axum::response::IntoResponse;
use axum::{Extension, Json, extract::Query, extract::State};
use uuid::Uuid;

use campus_types::api::{
    AdminDmQuery, AdminDmRow, ChannelCapabilities, ChannelIdRequest, ChannelListQuery,
    ChannelLookupQuery, ChannelView, Claims, CreateChannelRequest, ParticipantView,
};
use campus_types::events::GatewayEvent;
use campus_types::models::{
    Channel, ChannelKind, ChannelMember, ChannelStatus, MemberRole, PostingPolicy, Visibility,
    filter_direct_message_channels, group_dm_key,
};

use crate::error::{ApiError, ApiResult, require, require_uuid, run_blocking};
use crate::state::AppState;

/// How a caller addresses a channel: directly by id, or by derived key for
/// DM/group-DM kinds.
enum ChannelSelector {
    ById(Uuid),
    ByKey(String),
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChannelRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(req.org_id, "org_id")?;
    let kind = req.kind.unwrap_or(ChannelKind::Channel);

    // DM channels are only ever born from the resolver.
    if kind == ChannelKind::Dm {
        return Err(ApiError::InvalidField("kind"));
    }

    let (topic, members, channel_key) = match kind {
        ChannelKind::Channel => (require(req.topic, "topic")?, req.members.unwrap_or_default(), None),
        ChannelKind::GroupDm => {
            let members = require(req.members, "members")?;
            if members.is_empty() {
                return Err(ApiError::MissingField("members"));
            }
            let mut participants = members.clone();
            participants.push(claims.sub.clone());
            let key = group_dm_key(&participants);
            (req.topic.unwrap_or_default(), members, Some(key))
        }
        ChannelKind::Dm => unreachable!(),
    };

    let visibility = req.visibility.unwrap_or(match kind {
        ChannelKind::GroupDm => Visibility::Private,
        _ => Visibility::Public,
    });
    let posting_policy = req.posting_policy.unwrap_or(match kind {
        ChannelKind::GroupDm => PostingPolicy::MembersOnly,
        _ => PostingPolicy::Open,
    });

    let channel_id = Uuid::new_v4();

    let db_state = state.clone();
    let org = org_id.clone();
    let creator = claims.sub.clone();
    run_blocking(move || {
        db_state.db.create_channel(
            &channel_id.to_string(),
            &org,
            kind,
            &topic,
            visibility.as_str(),
            posting_policy.as_str(),
            channel_key.as_deref(),
            &creator,
            &members,
        )
    })
    .await?;

    state.dispatcher.broadcast(
        None,
        GatewayEvent::ChannelCreated {
            channel_id,
            org_id,
            kind: kind.as_str().to_string(),
        },
    );

    Ok(Json(serde_json::json!({ "success": true, "channel_id": channel_id })))
}

pub async fn channel_detail(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ChannelIdRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(req.org_id, "org_id")?;
    let channel_id = require_uuid(req.channel_id, "channel_id")?;

    let view = load_channel_view(&state, &org_id, ChannelSelector::ById(channel_id), &claims.sub)
        .await?
        .ok_or(ApiError::NotFound("channel"))?;

    Ok(Json(serde_json::json!({ "success": true, "channel": view })))
}

/// GET lookup by id or derived key; DM and group-DM kinds are addressable
/// by key.
pub async fn lookup_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ChannelLookupQuery>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(query.org_id, "org_id")?;

    let selector = match (query.channel_id, query.dm_key) {
        (Some(raw), _) => {
            ChannelSelector::ById(raw.parse().map_err(|_| ApiError::InvalidField("channel_id"))?)
        }
        (None, Some(key)) => ChannelSelector::ByKey(key),
        (None, None) => return Err(ApiError::MissingField("channel_id")),
    };

    let view = load_channel_view(&state, &org_id, selector, &claims.sub)
        .await?
        .ok_or(ApiError::NotFound("channel"))?;

    Ok(Json(serde_json::json!({ "success": true, "channel": view })))
}

pub async fn list_channels(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Query(query): Query<ChannelListQuery>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(query.org_id, "org_id")?;

    let db_state = state.clone();
    let rows = run_blocking(move || db_state.db.list_channels(&org_id)).await?;

    let mut channels = rows
        .into_iter()
        .map(|row| row.into_channel())
        .collect::<anyhow::Result<Vec<Channel>>>()?;

    if query.direct {
        channels = filter_direct_message_channels(channels);
    }

    Ok(Json(serde_json::json!({ "success": true, "channels": channels })))
}

/// GET listing of the org's direct conversations for the admin console.
pub async fn admin_direct_messages(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Query(query): Query<AdminDmQuery>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(query.org_id, "org_id")?;

    let db_state = state.clone();
    let rows = run_blocking(move || db_state.db.admin_direct_message_rows(&org_id)).await?;

    let rows = rows
        .into_iter()
        .map(|(row, member_ids)| {
            let channel = row.into_channel()?;
            Ok(AdminDmRow {
                channel_id: channel.id,
                kind: channel.kind,
                dm_key: channel.dm_key,
                member_ids,
                created_at: channel.created_at,
            })
        })
        .collect::<anyhow::Result<Vec<AdminDmRow>>>()?;

    Ok(Json(serde_json::json!({ "success": true, "rows": rows })))
}

pub async fn archive_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ChannelIdRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(req.org_id, "org_id")?;
    let channel_id = require_uuid(req.channel_id, "channel_id")?;

    require_manage_rights(&state, &org_id, channel_id, &claims.sub).await?;

    let db_state = state.clone();
    let archived =
        run_blocking(move || db_state.db.archive_channel(&org_id, &channel_id.to_string())).await?;
    if !archived {
        return Err(ApiError::NotFound("channel"));
    }

    state
        .dispatcher
        .broadcast(Some(channel_id), GatewayEvent::ChannelArchived { channel_id });

    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ChannelIdRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(req.org_id, "org_id")?;
    let channel_id = require_uuid(req.channel_id, "channel_id")?;

    require_manage_rights(&state, &org_id, channel_id, &claims.sub).await?;

    let db_state = state.clone();
    let deleted =
        run_blocking(move || db_state.db.delete_channel(&org_id, &channel_id.to_string())).await?;
    if !deleted {
        return Err(ApiError::NotFound("channel"));
    }

    state
        .dispatcher
        .broadcast(Some(channel_id), GatewayEvent::ChannelDeleted { channel_id });

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Compose the full channel view: the row itself, then participants and the
/// requester's membership fanned out concurrently and joined in memory.
async fn load_channel_view(
    state: &AppState,
    org_id: &str,
    selector: ChannelSelector,
    requester: &str,
) -> ApiResult<Option<ChannelView>> {
    let db_state = state.clone();
    let org = org_id.to_string();
    let row = run_blocking(move || match selector {
        ChannelSelector::ById(id) => db_state.db.get_channel(&org, &id.to_string()),
        ChannelSelector::ByKey(key) => db_state.db.get_channel_by_dm_key(&org, &key),
    })
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let channel = row.into_channel()?;

    let members_state = state.clone();
    let members_channel = channel.id.to_string();
    let membership_state = state.clone();
    let membership_channel = channel.id.to_string();
    let membership_requester = requester.to_string();

    let (member_rows, is_member) = tokio::join!(
        run_blocking(move || members_state.db.get_channel_members(&members_channel)),
        run_blocking(move || {
            membership_state.db.is_channel_member(&membership_channel, &membership_requester)
        }),
    );

    let members = member_rows?
        .into_iter()
        .map(|row| row.into_member())
        .collect::<anyhow::Result<Vec<ChannelMember>>>()?;

    Ok(Some(compose_channel_view(channel, members, requester, is_member?)))
}

async fn require_manage_rights(
    state: &AppState,
    org_id: &str,
    channel_id: Uuid,
    requester: &str,
) -> ApiResult<()> {
    let db_state = state.clone();
    let org = org_id.to_string();
    let id = channel_id.to_string();
    let found = run_blocking(move || {
        let Some(row) = db_state.db.get_channel(&org, &id)? else {
            return Ok(None);
        };
        let members = db_state.db.get_channel_members(&id)?;
        Ok(Some((row, members)))
    })
    .await?;

    let Some((row, member_rows)) = found else {
        return Err(ApiError::NotFound("channel"));
    };
    let channel = row.into_channel()?;
    let members = member_rows
        .into_iter()
        .map(|row| row.into_member())
        .collect::<anyhow::Result<Vec<ChannelMember>>>()?;

    let is_member = members.iter().any(|m| m.profile_id == requester);
    if !capabilities_for(&channel, &members, requester, is_member).can_manage {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

fn compose_channel_view(
    channel: Channel,
    members: Vec<ChannelMember>,
    requester: &str,
    is_member: bool,
) -> ChannelView {
    let capabilities = capabilities_for(&channel, &members, requester, is_member);
    let participants = members
        .into_iter()
        .map(|m| ParticipantView {
            profile_id: m.profile_id,
            role: m.role,
            joined_at: m.joined_at,
        })
        .collect();

    ChannelView {
        id: channel.id,
        org_id: channel.org_id,
        kind: channel.kind,
        topic: channel.topic,
        visibility: channel.visibility,
        posting_policy: channel.posting_policy,
        status: channel.status,
        dm_key: channel.dm_key,
        created_at: channel.created_at,
        participants,
        capabilities,
    }
}

fn capabilities_for(
    channel: &Channel,
    members: &[ChannelMember],
    requester: &str,
    is_member: bool,
) -> ChannelCapabilities {
    let active = channel.status == ChannelStatus::Active;
    let can_post = active
        && match channel.posting_policy {
            PostingPolicy::Open => true,
            PostingPolicy::MembersOnly => is_member,
        };

    let owns = members
        .iter()
        .any(|m| m.profile_id == requester && m.role == MemberRole::Owner);
    // Direct conversations have no owner; every participant manages them.
    let can_manage = owns || (channel.kind.is_direct() && is_member);

    ChannelCapabilities { can_post, can_manage }
}

pub(crate) fn channel_can_post(channel: &Channel, is_member: bool) -> bool {
    channel.status == ChannelStatus::Active
        && match channel.posting_policy {
            PostingPolicy::Open => true,
            PostingPolicy::MembersOnly => is_member,
        }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{claims_for, test_state};
    use chrono::Utc;

    fn channel_fixture(kind: ChannelKind, policy: PostingPolicy, status: ChannelStatus) -> Channel {
        Channel {
            id: Uuid::new_v4(),
            org_id: "org-1".into(),
            kind,
            topic: "algebra".into(),
            visibility: Visibility::Private,
            posting_policy: policy,
            status,
            dm_key: None,
            created_at: Utc::now(),
        }
    }

    fn member(channel: &Channel, profile: &str, role: MemberRole) -> ChannelMember {
        ChannelMember {
            channel_id: channel.id,
            profile_id: profile.into(),
            role,
            joined_at: Utc::now(),
        }
    }

    #[test]
    fn open_channels_accept_posts_from_non_members() {
        let channel = channel_fixture(ChannelKind::Channel, PostingPolicy::Open, ChannelStatus::Active);
        let caps = capabilities_for(&channel, &[], "stranger", false);
        assert!(caps.can_post);
        assert!(!caps.can_manage);
    }

    #[test]
    fn members_only_requires_membership() {
        let channel =
            channel_fixture(ChannelKind::Channel, PostingPolicy::MembersOnly, ChannelStatus::Active);
        assert!(!capabilities_for(&channel, &[], "stranger", false).can_post);
        assert!(capabilities_for(&channel, &[], "profile-1", true).can_post);
    }

    #[test]
    fn archived_channels_reject_posts_entirely() {
        let channel =
            channel_fixture(ChannelKind::Channel, PostingPolicy::Open, ChannelStatus::Archived);
        assert!(!capabilities_for(&channel, &[], "profile-1", true).can_post);
    }

    #[test]
    fn owners_and_dm_participants_can_manage() {
        let channel =
            channel_fixture(ChannelKind::Channel, PostingPolicy::Open, ChannelStatus::Active);
        let owner = member(&channel, "teacher-1", MemberRole::Owner);
        assert!(capabilities_for(&channel, &[owner], "teacher-1", true).can_manage);

        let dm = channel_fixture(ChannelKind::Dm, PostingPolicy::MembersOnly, ChannelStatus::Active);
        let m = member(&dm, "profile-1", MemberRole::Member);
        assert!(capabilities_for(&dm, std::slice::from_ref(&m), "profile-1", true).can_manage);
        assert!(!capabilities_for(&dm, &[m], "profile-3", false).can_manage);
    }

    #[tokio::test]
    async fn detail_requires_channel_id_before_store_access() {
        let state = test_state();
        let req = ChannelIdRequest {
            org_id: Some("org-1".into()),
            channel_id: None,
        };

        let err = channel_detail(State(state), Extension(claims_for("profile-1")), Json(req))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::MissingField("channel_id")));
    }

    #[tokio::test]
    async fn archive_then_detail_shows_archived_without_posting() {
        let state = test_state();
        let resolved = state.db.resolve_dm_channel("org-1", "profile-1", "profile-2").unwrap();

        archive_channel(
            State(state.clone()),
            Extension(claims_for("profile-1")),
            Json(ChannelIdRequest {
                org_id: Some("org-1".into()),
                channel_id: Some(resolved.channel_id.to_string()),
            }),
        )
        .await
        .unwrap();

        let view = load_channel_view(
            &state,
            "org-1",
            ChannelSelector::ById(resolved.channel_id),
            "profile-1",
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(view.status, ChannelStatus::Archived);
        assert!(!view.capabilities.can_post);
        assert_eq!(view.participants.len(), 2);
    }

    #[tokio::test]
    async fn lookup_by_dm_key_composes_the_same_channel() {
        let state = test_state();
        let resolved = state.db.resolve_dm_channel("org-1", "profile-1", "profile-2").unwrap();

        let view = load_channel_view(
            &state,
            "org-1",
            ChannelSelector::ByKey(resolved.dm_key.clone()),
            "profile-2",
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(view.id, resolved.channel_id);
        assert_eq!(view.dm_key.as_deref(), Some(resolved.dm_key.as_str()));
        assert!(view.capabilities.can_post);
    }

    #[tokio::test]
    async fn strangers_cannot_archive_a_dm() {
        let state = test_state();
        let resolved = state.db.resolve_dm_channel("org-1", "profile-1", "profile-2").unwrap();

        let err = archive_channel(
            State(state),
            Extension(claims_for("profile-9")),
            Json(ChannelIdRequest {
                org_id: Some("org-1".into()),
                channel_id: Some(resolved.channel_id.to_string()),
            }),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::Forbidden));
    }
}
