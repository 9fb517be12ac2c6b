use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical, order-independent identity of a two-party DM channel.
/// `dm_key(a, b) == dm_key(b, a)` for all participant pairs.
pub fn dm_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("dm:{}-{}", a, b)
    } else {
        format!("dm:{}-{}", b, a)
    }
}

/// Derived key for a group DM: the same scheme as `dm_key`, over every
/// participant. Duplicate ids collapse so the key is set-like.
pub fn group_dm_key(participants: &[String]) -> String {
    let mut ids: Vec<&str> = participants.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids.dedup();
    format!("dm:{}", ids.join("-"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Channel,
    Dm,
    GroupDm,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Channel => "channel",
            ChannelKind::Dm => "dm",
            ChannelKind::GroupDm => "group_dm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "channel" => Some(ChannelKind::Channel),
            "dm" => Some(ChannelKind::Dm),
            "group_dm" => Some(ChannelKind::GroupDm),
            _ => None,
        }
    }

    /// DMs and group DMs are addressable by a derived key, not a topic.
    pub fn is_direct(&self) -> bool {
        matches!(self, ChannelKind::Dm | ChannelKind::GroupDm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Active,
    Archived,
}

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Active => "active",
            ChannelStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ChannelStatus::Active),
            "archived" => Some(ChannelStatus::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingPolicy {
    Open,
    MembersOnly,
}

impl PostingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingPolicy::Open => "open",
            PostingPolicy::MembersOnly => "members_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PostingPolicy::Open),
            "members_only" => Some(PostingPolicy::MembersOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(MemberRole::Owner),
            "member" => Some(MemberRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    System,
    Attachment,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::System => "system",
            MessageKind::Attachment => "attachment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "system" => Some(MessageKind::System),
            "attachment" => Some(MessageKind::Attachment),
            _ => None,
        }
    }
}

/// A conversation container: class channel, DM, or group DM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub org_id: String,
    pub kind: ChannelKind,
    pub topic: String,
    pub visibility: Visibility,
    pub posting_policy: PostingPolicy,
    pub status: ChannelStatus,
    pub dm_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: Uuid,
    pub profile_id: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// A reply sub-conversation anchored to one parent message. The aggregate
/// stats are recomputed from the replies actually present, never trusted
/// from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub parent_message_id: Uuid,
    pub message_count: u32,
    pub last_reply_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub thread_id: Option<Uuid>,
    pub author_id: String,
    pub kind: MessageKind,
    pub body: String,
    pub payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Per-account read cursor for a channel, or for one thread within it when
/// `thread_id` is set. Advances monotonically; there is no demotion path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadState {
    pub account_id: String,
    pub channel_id: Uuid,
    pub thread_id: Option<Uuid>,
    pub last_read_message_id: Option<Uuid>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub unread_count: u32,
}

/// Keep only the DM/group-DM subset of a mixed channel list, preserving
/// relative order.
pub fn filter_direct_message_channels(channels: Vec<Channel>) -> Vec<Channel> {
    channels.into_iter().filter(|c| c.kind.is_direct()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(kind: ChannelKind, topic: &str) -> Channel {
        Channel {
            id: Uuid::new_v4(),
            org_id: "org-1".to_string(),
            kind,
            topic: topic.to_string(),
            visibility: Visibility::Private,
            posting_policy: PostingPolicy::MembersOnly,
            status: ChannelStatus::Active,
            dm_key: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn dm_key_is_order_independent() {
        assert_eq!(dm_key("profile-1", "profile-2"), dm_key("profile-2", "profile-1"));
        assert_eq!(dm_key("profile-1", "profile-2"), "dm:profile-1-profile-2");
    }

    #[test]
    fn dm_key_degenerate_pair() {
        assert_eq!(dm_key("profile-1", "profile-1"), "dm:profile-1-profile-1");
    }

    #[test]
    fn group_dm_key_sorts_and_dedups() {
        let a = group_dm_key(&["p3".into(), "p1".into(), "p2".into()]);
        let b = group_dm_key(&["p2".into(), "p1".into(), "p3".into(), "p1".into()]);
        assert_eq!(a, b);
        assert_eq!(a, "dm:p1-p2-p3");
    }

    #[test]
    fn filter_keeps_only_direct_kinds_in_order() {
        let channels = vec![
            channel(ChannelKind::Channel, "algebra"),
            channel(ChannelKind::Dm, "a"),
            channel(ChannelKind::Channel, "biology"),
            channel(ChannelKind::GroupDm, "b"),
            channel(ChannelKind::Dm, "c"),
        ];

        let filtered = filter_direct_message_channels(channels);
        let topics: Vec<&str> = filtered.iter().map(|c| c.topic.as_str()).collect();
        assert_eq!(topics, vec!["a", "b", "c"]);
        assert!(filtered.iter().all(|c| c.kind.is_direct()));
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [ChannelKind::Channel, ChannelKind::Dm, ChannelKind::GroupDm] {
            assert_eq!(ChannelKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ChannelKind::parse("voice"), None);
    }
}
