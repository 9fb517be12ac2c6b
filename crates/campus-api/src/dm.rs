use axum::response::IntoResponse;
use axum::{Extension, Json, extract::State};

use campus_types::api::{Claims, DmResolution, ResolveDmRequest};
use campus_types::events::GatewayEvent;

use crate::error::{ApiResult, require, run_blocking};
use crate::state::AppState;

/// Resolve the canonical channel for an unordered participant pair,
/// creating it on first contact. Participant order is irrelevant; repeated
/// calls land on the same channel.
pub async fn resolve_dm(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<ResolveDmRequest>,
) -> ApiResult<impl IntoResponse> {
    let org_id = require(req.org_id, "org_id")?;
    let participant_a = require(req.participant_a, "participant_a")?;
    let participant_b = require(req.participant_b, "participant_b")?;

    let db_state = state.clone();
    let org = org_id.clone();
    let resolved = run_blocking(move || {
        db_state.db.resolve_dm_channel(&org, &participant_a, &participant_b)
    })
    .await?;

    if resolved.created {
        state.dispatcher.broadcast(
            None,
            GatewayEvent::ChannelCreated {
                channel_id: resolved.channel_id,
                org_id,
                kind: "dm".to_string(),
            },
        );
    }

    let resolution = DmResolution {
        channel_id: resolved.channel_id,
        dm_key: resolved.dm_key,
        created: resolved.created,
    };

    Ok(Json(serde_json::json!({ "success": true, "resolution": resolution })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::state::test_support::{claims_for, test_state};

    fn request(org: Option<&str>, a: Option<&str>, b: Option<&str>) -> ResolveDmRequest {
        ResolveDmRequest {
            org_id: org.map(String::from),
            participant_a: a.map(String::from),
            participant_b: b.map(String::from),
        }
    }

    async fn body_json(resp: impl IntoResponse) -> serde_json::Value {
        let resp = resp.into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn missing_participant_fails_before_store_access() {
        let state = test_state();

        let err = resolve_dm(
            State(state.clone()),
            Extension(claims_for("profile-1")),
            Json(request(Some("org-1"), Some("profile-1"), None)),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, ApiError::MissingField("participant_b")));

        // Nothing was created.
        assert!(state.db.list_channels("org-1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn first_contact_creates_then_reversed_call_reuses() {
        let state = test_state();

        let first = resolve_dm(
            State(state.clone()),
            Extension(claims_for("profile-1")),
            Json(request(Some("org-1"), Some("profile-1"), Some("profile-2"))),
        )
        .await
        .unwrap();
        let first = body_json(first).await;
        assert_eq!(first["success"], true);
        assert_eq!(first["resolution"]["created"], true);
        assert_eq!(first["resolution"]["dm_key"], "dm:profile-1-profile-2");

        let second = resolve_dm(
            State(state.clone()),
            Extension(claims_for("profile-2")),
            Json(request(Some("org-1"), Some("profile-2"), Some("profile-1"))),
        )
        .await
        .unwrap();
        let second = body_json(second).await;
        assert_eq!(second["resolution"]["created"], false);
        assert_eq!(
            second["resolution"]["channel_id"],
            first["resolution"]["channel_id"]
        );

        assert_eq!(state.db.list_channels("org-1").unwrap().len(), 1);
    }
}
