use std::collections::HashMap;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use uuid::Uuid;

use campus_types::models::{ChannelKind, MemberRole, dm_key};

use super::OptionalExt;
use crate::Database;
use crate::models::{ChannelRow, MemberRow};

/// Outcome of a DM resolution: the canonical channel for the pair, plus
/// whether this call created it.
#[derive(Debug, Clone)]
pub struct DmResolved {
    pub channel_id: Uuid,
    pub dm_key: String,
    pub created: bool,
}

enum DmInsert {
    Created,
    /// The unique index on (org_id, dm_key) rejected the insert: a
    /// concurrent caller created the channel first.
    RaceLost,
}

impl Database {
    /// Map an unordered participant pair to its single canonical DM channel,
    /// creating it if absent. Channel and membership rows are written in one
    /// transaction, so a failed membership insert cannot leave an orphan
    /// channel. Losing the insert race falls back to the winner's row.
    pub fn resolve_dm_channel(&self, org_id: &str, a: &str, b: &str) -> Result<DmResolved> {
        let key = dm_key(a, b);

        self.with_conn_mut(|conn| {
            if let Some(row) = query_channel_by_dm_key(conn, org_id, &key)? {
                return Ok(DmResolved {
                    channel_id: row.id.parse()?,
                    dm_key: key.clone(),
                    created: false,
                });
            }

            let channel_id = Uuid::new_v4();
            match insert_dm_channel(conn, &channel_id.to_string(), org_id, &key, a, b)? {
                DmInsert::Created => Ok(DmResolved {
                    channel_id,
                    dm_key: key.clone(),
                    created: true,
                }),
                DmInsert::RaceLost => {
                    let row = query_channel_by_dm_key(conn, org_id, &key)?
                        .ok_or_else(|| anyhow!("DM channel vanished after losing race: {}", key))?;
                    Ok(DmResolved {
                        channel_id: row.id.parse()?,
                        dm_key: key.clone(),
                        created: false,
                    })
                }
            }
        })
    }

    /// Create a named or group-DM channel. The creator joins as owner and
    /// every listed member joins as member, all in one transaction.
    pub fn create_channel(
        &self,
        id: &str,
        org_id: &str,
        kind: ChannelKind,
        topic: &str,
        visibility: &str,
        posting_policy: &str,
        channel_key: Option<&str>,
        creator_id: &str,
        member_ids: &[String],
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO channels (id, org_id, kind, topic, visibility, posting_policy, dm_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![id, org_id, kind.as_str(), topic, visibility, posting_policy, channel_key],
            )?;

            tx.execute(
                "INSERT INTO channel_members (channel_id, profile_id, role) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, creator_id, MemberRole::Owner.as_str()],
            )?;
            for member in member_ids {
                if member == creator_id {
                    continue;
                }
                tx.execute(
                    "INSERT OR IGNORE INTO channel_members (channel_id, profile_id, role) VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, member, MemberRole::Member.as_str()],
                )?;
            }

            tx.commit()?;
            Ok(())
        })
    }

    pub fn get_channel(&self, org_id: &str, channel_id: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| query_channel_by_id(conn, org_id, channel_id))
    }

    pub fn get_channel_by_dm_key(&self, org_id: &str, key: &str) -> Result<Option<ChannelRow>> {
        self.with_conn(|conn| query_channel_by_dm_key(conn, org_id, key))
    }

    /// All live channels in an org, oldest first.
    pub fn list_channels(&self, org_id: &str) -> Result<Vec<ChannelRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHANNEL_COLS} FROM channels
                 WHERE org_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC"
            ))?;

            let rows = stmt
                .query_map([org_id], channel_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Live members of a channel, in join order.
    pub fn get_channel_members(&self, channel_id: &str) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| query_channel_members(conn, channel_id))
    }

    pub fn is_channel_member(&self, channel_id: &str, profile_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM channel_members
                     WHERE channel_id = ?1 AND profile_id = ?2 AND deleted_at IS NULL",
                    [channel_id, profile_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Admin listing of every live DM/group-DM channel in an org with its
    /// member ids. An org with no channels yields an empty vec.
    pub fn admin_direct_message_rows(&self, org_id: &str) -> Result<Vec<(ChannelRow, Vec<String>)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHANNEL_COLS} FROM channels
                 WHERE org_id = ?1 AND kind IN ('dm', 'group_dm') AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC"
            ))?;

            let channels = stmt
                .query_map([org_id], channel_from_row)?
                .collect::<std::result::Result<Vec<ChannelRow>, _>>()?;

            if channels.is_empty() {
                return Ok(vec![]);
            }

            // Batch-fetch memberships for the whole page in one query.
            let channel_ids: Vec<&str> = channels.iter().map(|c| c.id.as_str()).collect();
            let placeholders: Vec<String> =
                (1..=channel_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT channel_id, profile_id FROM channel_members
                 WHERE channel_id IN ({}) AND deleted_at IS NULL
                 ORDER BY joined_at ASC, profile_id ASC",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = channel_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let mut members_by_channel: HashMap<String, Vec<String>> = HashMap::new();
            let mut rows = stmt.query(params.as_slice())?;
            while let Some(row) = rows.next()? {
                let channel_id: String = row.get(0)?;
                let profile_id: String = row.get(1)?;
                members_by_channel.entry(channel_id).or_default().push(profile_id);
            }

            Ok(channels
                .into_iter()
                .map(|c| {
                    let members = members_by_channel.remove(&c.id).unwrap_or_default();
                    (c, members)
                })
                .collect())
        })
    }

    /// Returns false when the channel does not exist in the org.
    pub fn archive_channel(&self, org_id: &str, channel_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE channels SET status = 'archived'
                 WHERE id = ?1 AND org_id = ?2 AND deleted_at IS NULL",
                [channel_id, org_id],
            )?;
            Ok(updated > 0)
        })
    }

    /// Hard-delete cascade: reactions, thread participants, read-state rows,
    /// messages, threads and memberships go; the channel row itself is
    /// soft-deleted so the id stays tombstoned. Read-state rows are removed
    /// nowhere else.
    pub fn delete_channel(&self, org_id: &str, channel_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM channels WHERE id = ?1 AND org_id = ?2 AND deleted_at IS NULL",
                    [channel_id, org_id],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(false);
            }

            tx.execute(
                "DELETE FROM reactions WHERE message_id IN
                 (SELECT id FROM messages WHERE channel_id = ?1)",
                [channel_id],
            )?;
            tx.execute(
                "DELETE FROM thread_participants WHERE thread_id IN
                 (SELECT id FROM threads WHERE channel_id = ?1)",
                [channel_id],
            )?;
            tx.execute("DELETE FROM read_states WHERE channel_id = ?1", [channel_id])?;
            tx.execute("DELETE FROM messages WHERE channel_id = ?1", [channel_id])?;
            tx.execute("DELETE FROM threads WHERE channel_id = ?1", [channel_id])?;
            tx.execute("DELETE FROM channel_members WHERE channel_id = ?1", [channel_id])?;
            tx.execute(
                "UPDATE channels SET deleted_at = datetime('now','subsec') WHERE id = ?1",
                [channel_id],
            )?;

            tx.commit()?;
            Ok(true)
        })
    }
}

const CHANNEL_COLS: &str =
    "id, org_id, kind, topic, visibility, posting_policy, status, dm_key, created_at";

fn channel_from_row(row: &rusqlite::Row) -> std::result::Result<ChannelRow, rusqlite::Error> {
    Ok(ChannelRow {
        id: row.get(0)?,
        org_id: row.get(1)?,
        kind: row.get(2)?,
        topic: row.get(3)?,
        visibility: row.get(4)?,
        posting_policy: row.get(5)?,
        status: row.get(6)?,
        dm_key: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn query_channel_by_id(
    conn: &Connection,
    org_id: &str,
    channel_id: &str,
) -> Result<Option<ChannelRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHANNEL_COLS} FROM channels
         WHERE id = ?1 AND org_id = ?2 AND deleted_at IS NULL"
    ))?;

    let row = stmt.query_row([channel_id, org_id], channel_from_row).optional()?;
    Ok(row)
}

fn query_channel_by_dm_key(
    conn: &Connection,
    org_id: &str,
    key: &str,
) -> Result<Option<ChannelRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHANNEL_COLS} FROM channels
         WHERE org_id = ?1 AND dm_key = ?2 AND deleted_at IS NULL"
    ))?;

    let row = stmt.query_row([org_id, key], channel_from_row).optional()?;
    Ok(row)
}

fn query_channel_members(conn: &Connection, channel_id: &str) -> Result<Vec<MemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT channel_id, profile_id, role, joined_at FROM channel_members
         WHERE channel_id = ?1 AND deleted_at IS NULL
         ORDER BY joined_at ASC, profile_id ASC",
    )?;

    let rows = stmt
        .query_map([channel_id], |row| {
            Ok(MemberRow {
                channel_id: row.get(0)?,
                profile_id: row.get(1)?,
                role: row.get(2)?,
                joined_at: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Insert the channel plus one membership row per unique participant in a
/// single transaction. A unique-index rejection on the channel insert means
/// a concurrent caller won; nothing is written in that case.
fn insert_dm_channel(
    conn: &mut Connection,
    channel_id: &str,
    org_id: &str,
    key: &str,
    a: &str,
    b: &str,
) -> Result<DmInsert> {
    let tx = conn.transaction()?;

    let inserted = tx.execute(
        "INSERT INTO channels (id, org_id, kind, topic, visibility, posting_policy, dm_key)
         VALUES (?1, ?2, 'dm', '', 'private', 'members_only', ?3)",
        [channel_id, org_id, key],
    );

    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            return Ok(DmInsert::RaceLost);
        }
        Err(e) => return Err(e.into()),
    }

    tx.execute(
        "INSERT INTO channel_members (channel_id, profile_id, role) VALUES (?1, ?2, 'member')",
        [channel_id, a],
    )?;
    if a != b {
        tx.execute(
            "INSERT INTO channel_members (channel_id, profile_id, role) VALUES (?1, ?2, 'member')",
            [channel_id, b],
        )?;
    }

    tx.commit()?;
    Ok(DmInsert::Created)
}
