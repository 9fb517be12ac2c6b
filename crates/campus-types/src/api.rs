use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    ChannelKind, ChannelStatus, MemberRole, MessageKind, PostingPolicy, Visibility,
};

// -- Identity --

/// Claims issued by the external identity provider. Shared by campus-api
/// (REST middleware) and campus-gateway (WebSocket identify handshake);
/// canonical definition lives here to eliminate duplication. The service
/// verifies the signature and trusts the contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

// -- DM resolver --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveDmRequest {
    pub org_id: Option<String>,
    pub participant_a: Option<String>,
    pub participant_b: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DmResolution {
    pub channel_id: Uuid,
    pub dm_key: String,
    pub created: bool,
}

// -- Channels --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChannelRequest {
    pub org_id: Option<String>,
    pub topic: Option<String>,
    pub kind: Option<ChannelKind>,
    pub visibility: Option<Visibility>,
    pub posting_policy: Option<PostingPolicy>,
    /// Additional member profile ids; required for group DMs.
    pub members: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelIdRequest {
    pub org_id: Option<String>,
    pub channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelListQuery {
    pub org_id: Option<String>,
    /// When true, keep only DM/group-DM channels.
    #[serde(default)]
    pub direct: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChannelLookupQuery {
    pub org_id: Option<String>,
    pub channel_id: Option<String>,
    pub dm_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParticipantView {
    pub profile_id: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// What the requesting account may do in a channel, derived from posting
/// policy, membership and lifecycle status.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelCapabilities {
    pub can_post: bool,
    pub can_manage: bool,
}

/// Fully composed channel: row fields plus participants and the
/// requester's capabilities.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelView {
    pub id: Uuid,
    pub org_id: String,
    pub kind: ChannelKind,
    pub topic: String,
    pub visibility: Visibility,
    pub posting_policy: PostingPolicy,
    pub status: ChannelStatus,
    pub dm_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<ParticipantView>,
    pub capabilities: ChannelCapabilities,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminDmRow {
    pub channel_id: Uuid,
    pub kind: ChannelKind,
    pub dm_key: Option<String>,
    pub member_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AdminDmQuery {
    pub org_id: Option<String>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub org_id: Option<String>,
    pub channel_id: Option<String>,
    /// Reply into an existing thread.
    pub thread_id: Option<String>,
    /// Reply to a top-level message, creating its thread on first use.
    /// Ignored when `thread_id` is set.
    pub parent_message_id: Option<String>,
    pub kind: Option<MessageKind>,
    pub body: Option<String>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    pub org_id: Option<String>,
    pub channel_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based pagination: the `created_at` of the oldest message from
    /// the previous page.
    pub before: Option<String>,
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub profile_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub thread_id: Option<Uuid>,
    pub author_id: String,
    pub kind: MessageKind,
    pub body: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub reactions: Vec<ReactionGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub org_id: Option<String>,
    pub message_id: Option<String>,
    pub emoji: Option<String>,
}

// -- Threads --

#[derive(Debug, Deserialize)]
pub struct ThreadListQuery {
    pub org_id: Option<String>,
    pub channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThreadDetailRequest {
    pub org_id: Option<String>,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadView {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub parent_message_id: Uuid,
    pub message_count: u32,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub participants: Vec<String>,
}

// -- Read-state --

#[derive(Debug, Deserialize)]
pub struct ReadStateQuery {
    pub org_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub org_id: Option<String>,
    pub channel_id: Option<String>,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadStateView {
    pub channel_id: Uuid,
    pub thread_id: Option<Uuid>,
    pub last_read_message_id: Option<Uuid>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

/// Per-channel unread badge, computed from the channel-level read-state
/// rows only (thread cursors do not feed badges).
#[derive(Debug, Clone, Serialize)]
pub struct UnreadBadge {
    pub channel_id: Uuid,
    pub unread_count: u32,
}
