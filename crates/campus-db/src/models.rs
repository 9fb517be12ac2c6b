//! Database row types, mapping directly to SQLite rows.
//! Distinct from the campus-types domain models to keep the DB layer
//! independent; each row converts into its domain model through a total
//! conversion that parses every field and propagates failures instead of
//! papering over them with fallbacks.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use campus_types::models::{
    Channel, ChannelKind, ChannelMember, ChannelStatus, MemberRole, Message, MessageKind,
    PostingPolicy, ReadState, Thread, Visibility,
};

pub struct ChannelRow {
    pub id: String,
    pub org_id: String,
    pub kind: String,
    pub topic: String,
    pub visibility: String,
    pub posting_policy: String,
    pub status: String,
    pub dm_key: Option<String>,
    pub created_at: String,
}

pub struct MemberRow {
    pub channel_id: String,
    pub profile_id: String,
    pub role: String,
    pub joined_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub author_id: String,
    pub kind: String,
    pub body: String,
    pub payload: Option<String>,
    pub created_at: String,
}

pub struct ThreadRow {
    pub id: String,
    pub channel_id: String,
    pub parent_message_id: String,
    pub message_count: i64,
    pub last_reply_at: Option<String>,
    pub created_at: String,
}

pub struct ReadStateRow {
    pub account_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub last_read_message_id: Option<String>,
    pub last_read_at: Option<String>,
    pub unread_count: i64,
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub profile_id: String,
    pub emoji: String,
    pub created_at: String,
}

/// Storage format for timestamps the Rust side writes. Matches SQLite's
/// `datetime('now','subsec')` shape so lexicographic order stays
/// chronological across both writers; microseconds keep cursor comparisons
/// from tying on rapid-fire inserts.
pub fn to_storage_timestamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// SQLite stores timestamps as `YYYY-MM-DD HH:MM:SS[.SSS]` without a
/// timezone; values written elsewhere may already be RFC 3339.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .map(|ndt| ndt.and_utc())
        .with_context(|| format!("bad timestamp: {}", s))
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid> {
    s.parse()
        .map_err(|e| anyhow!("bad {} '{}': {}", field, s, e))
}

impl ChannelRow {
    pub fn into_channel(self) -> Result<Channel> {
        let kind = ChannelKind::parse(&self.kind)
            .ok_or_else(|| anyhow!("unknown channel kind: {}", self.kind))?;
        let visibility = Visibility::parse(&self.visibility)
            .ok_or_else(|| anyhow!("unknown visibility: {}", self.visibility))?;
        let posting_policy = PostingPolicy::parse(&self.posting_policy)
            .ok_or_else(|| anyhow!("unknown posting policy: {}", self.posting_policy))?;
        let status = ChannelStatus::parse(&self.status)
            .ok_or_else(|| anyhow!("unknown channel status: {}", self.status))?;

        Ok(Channel {
            id: parse_uuid(&self.id, "channel id")?,
            org_id: self.org_id,
            kind,
            topic: self.topic,
            visibility,
            posting_policy,
            status,
            dm_key: self.dm_key,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl MemberRow {
    pub fn into_member(self) -> Result<ChannelMember> {
        let role = MemberRole::parse(&self.role)
            .ok_or_else(|| anyhow!("unknown member role: {}", self.role))?;

        Ok(ChannelMember {
            channel_id: parse_uuid(&self.channel_id, "channel id")?,
            profile_id: self.profile_id,
            role,
            joined_at: parse_timestamp(&self.joined_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        let kind = MessageKind::parse(&self.kind)
            .ok_or_else(|| anyhow!("unknown message kind: {}", self.kind))?;
        let payload = match self.payload {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .with_context(|| format!("bad payload on message {}", self.id))?,
            ),
            None => None,
        };
        let thread_id = match self.thread_id {
            Some(tid) => Some(parse_uuid(&tid, "thread id")?),
            None => None,
        };

        Ok(Message {
            id: parse_uuid(&self.id, "message id")?,
            channel_id: parse_uuid(&self.channel_id, "channel id")?,
            thread_id,
            author_id: self.author_id,
            kind,
            body: self.body,
            payload,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl ThreadRow {
    pub fn into_thread(self) -> Result<Thread> {
        if self.message_count < 0 {
            bail!("negative message count on thread {}", self.id);
        }
        let last_reply_at = match self.last_reply_at {
            Some(ts) => Some(parse_timestamp(&ts)?),
            None => None,
        };

        Ok(Thread {
            id: parse_uuid(&self.id, "thread id")?,
            channel_id: parse_uuid(&self.channel_id, "channel id")?,
            parent_message_id: parse_uuid(&self.parent_message_id, "parent message id")?,
            message_count: self.message_count as u32,
            last_reply_at,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl ReadStateRow {
    pub fn into_read_state(self) -> Result<ReadState> {
        let thread_id = match self.thread_id {
            Some(tid) => Some(parse_uuid(&tid, "thread id")?),
            None => None,
        };
        let last_read_message_id = match self.last_read_message_id {
            Some(mid) => Some(parse_uuid(&mid, "message id")?),
            None => None,
        };
        let last_read_at = match self.last_read_at {
            Some(ts) => Some(parse_timestamp(&ts)?),
            None => None,
        };
        if self.unread_count < 0 {
            bail!("negative unread count for account {}", self.account_id);
        }

        Ok(ReadState {
            account_id: self.account_id,
            channel_id: parse_uuid(&self.channel_id, "channel id")?,
            thread_id,
            last_read_message_id,
            last_read_at,
            unread_count: self.unread_count as u32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sqlite_and_rfc3339_timestamps() {
        assert!(parse_timestamp("2026-08-04 10:30:00").is_ok());
        assert!(parse_timestamp("2026-08-04 10:30:00.123").is_ok());
        assert!(parse_timestamp("2026-08-04T10:30:00Z").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn channel_conversion_rejects_unknown_kind() {
        let row = ChannelRow {
            id: Uuid::new_v4().to_string(),
            org_id: "org-1".into(),
            kind: "voice".into(),
            topic: String::new(),
            visibility: "private".into(),
            posting_policy: "members_only".into(),
            status: "active".into(),
            dm_key: None,
            created_at: "2026-08-04 10:30:00".into(),
        };
        assert!(row.into_channel().is_err());
    }
}
