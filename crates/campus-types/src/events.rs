use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events relayed over the WebSocket gateway. The gateway only wires these
/// up to subscribers; all state changes happen in the HTTP layer first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful identification
    Ready { account_id: String },

    /// A channel was created (includes DM channels born from the resolver)
    ChannelCreated {
        channel_id: Uuid,
        org_id: String,
        kind: String,
    },

    /// A channel was archived
    ChannelArchived { channel_id: Uuid },

    /// A channel was deleted
    ChannelDeleted { channel_id: Uuid },

    /// A new message was posted
    MessageCreated {
        id: Uuid,
        channel_id: Uuid,
        thread_id: Option<Uuid>,
        author_id: String,
        kind: String,
        body: String,
        created_at: DateTime<Utc>,
    },

    /// A thread received a reply; stats were recomputed
    ThreadReplied {
        channel_id: Uuid,
        thread_id: Uuid,
        message_count: u32,
        last_reply_at: Option<DateTime<Utc>>,
    },

    /// A reaction was added to a message
    ReactionAdded {
        channel_id: Uuid,
        message_id: Uuid,
        profile_id: String,
        emoji: String,
    },

    /// A reaction was removed from a message
    ReactionRemoved {
        channel_id: Uuid,
        message_id: Uuid,
        profile_id: String,
        emoji: String,
    },

    /// An account advanced its read cursor
    ReadStateUpdated {
        channel_id: Uuid,
        thread_id: Option<Uuid>,
        account_id: String,
        unread_count: u32,
    },
}

/// Commands clients send over the gateway socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// First frame: authenticate with an identity-provider JWT
    Identify { token: String },

    /// Replace the set of channels this connection wants events for
    Subscribe { channel_ids: Vec<Uuid> },
}
