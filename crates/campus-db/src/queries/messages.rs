use anyhow::Result;
use rusqlite::Connection;

use super::OptionalExt;
use crate::Database;
use crate::models::{MessageRow, ReactionRow};

/// Outcome of a reaction toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionToggle {
    Added,
    Removed,
}

impl Database {
    /// Raw message insert. Thread replies go through `insert_thread_reply`,
    /// which also keeps the thread stats honest.
    pub fn insert_message(
        &self,
        id: &str,
        channel_id: &str,
        thread_id: Option<&str>,
        author_id: &str,
        kind: &str,
        body: &str,
        payload: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            insert_message_row(conn, id, channel_id, thread_id, author_id, kind, body, payload)
        })
    }

    pub fn get_message(&self, message_id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1 AND deleted_at IS NULL"
            ))?;
            let row = stmt.query_row([message_id], message_from_row).optional()?;
            Ok(row)
        })
    }

    /// Newest-first page of live channel messages. `before` is the
    /// `created_at` of the oldest message from the previous page.
    pub fn get_messages(
        &self,
        channel_id: &str,
        limit: u32,
        before: Option<&str>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, channel_id, limit, before))
    }

    /// Toggle a reaction: removes if present, inserts if not.
    pub fn toggle_reaction(
        &self,
        id: &str,
        message_id: &str,
        profile_id: &str,
        emoji: &str,
    ) -> Result<ReactionToggle> {
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM reactions
                     WHERE message_id = ?1 AND profile_id = ?2 AND emoji = ?3",
                    [message_id, profile_id, emoji],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(existing_id) = existing {
                conn.execute("DELETE FROM reactions WHERE id = ?1", [&existing_id])?;
                Ok(ReactionToggle::Removed)
            } else {
                conn.execute(
                    "INSERT INTO reactions (id, message_id, profile_id, emoji) VALUES (?1, ?2, ?3, ?4)",
                    [id, message_id, profile_id, emoji],
                )?;
                Ok(ReactionToggle::Added)
            }
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, message_id, profile_id, emoji, created_at FROM reactions
                 WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(ReactionRow {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        profile_id: row.get(2)?,
                        emoji: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

const MESSAGE_COLS: &str =
    "id, channel_id, thread_id, author_id, kind, body, payload, created_at";

pub(super) fn message_from_row(
    row: &rusqlite::Row,
) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        thread_id: row.get(2)?,
        author_id: row.get(3)?,
        kind: row.get(4)?,
        body: row.get(5)?,
        payload: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(super) fn insert_message_row(
    conn: &Connection,
    id: &str,
    channel_id: &str,
    thread_id: Option<&str>,
    author_id: &str,
    kind: &str,
    body: &str,
    payload: Option<&str>,
) -> Result<()> {
    // Explicit microsecond timestamp: read cursors and pagination compare on
    // created_at, and the DB default only carries milliseconds.
    let created_at = crate::models::to_storage_timestamp(chrono::Utc::now());
    conn.execute(
        "INSERT INTO messages (id, channel_id, thread_id, author_id, kind, body, payload, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![id, channel_id, thread_id, author_id, kind, body, payload, created_at],
    )?;
    Ok(())
}

fn query_messages(
    conn: &Connection,
    channel_id: &str,
    limit: u32,
    before: Option<&str>,
) -> Result<Vec<MessageRow>> {
    let mut stmt;
    let rows = match before {
        Some(cursor) => {
            stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE channel_id = ?1 AND deleted_at IS NULL AND created_at < ?2
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?3"
            ))?;
            stmt.query_map(rusqlite::params![channel_id, cursor, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages
                 WHERE channel_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2"
            ))?;
            stmt.query_map(rusqlite::params![channel_id, limit], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn db_with_channel() -> (Database, String) {
        let db = Database::open_in_memory().unwrap();
        let dm = db.resolve_dm_channel("org-1", "profile-1", "profile-2").unwrap();
        (db, dm.channel_id.to_string())
    }

    fn send(db: &Database, channel_id: &str, body: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.insert_message(&id, channel_id, None, "profile-1", "text", body, None).unwrap();
        id
    }

    #[test]
    fn messages_come_back_newest_first_and_limited() {
        let (db, channel_id) = db_with_channel();
        for i in 0..5 {
            send(&db, &channel_id, &format!("m{}", i));
        }

        let page = db.get_messages(&channel_id, 3, None).unwrap();
        assert_eq!(page.len(), 3);
        // Newest first within the page.
        assert!(page[0].created_at >= page[1].created_at);
        assert!(page[1].created_at >= page[2].created_at);
    }

    #[test]
    fn reaction_toggle_adds_then_removes() {
        let (db, channel_id) = db_with_channel();
        let message_id = send(&db, &channel_id, "hello");

        let first = db
            .toggle_reaction(&Uuid::new_v4().to_string(), &message_id, "profile-2", "👍")
            .unwrap();
        assert_eq!(first, ReactionToggle::Added);

        let second = db
            .toggle_reaction(&Uuid::new_v4().to_string(), &message_id, "profile-2", "👍")
            .unwrap();
        assert_eq!(second, ReactionToggle::Removed);

        let reactions = db.get_reactions_for_messages(&[message_id]).unwrap();
        assert!(reactions.is_empty());
    }

    #[test]
    fn batch_reaction_fetch_spans_messages() {
        let (db, channel_id) = db_with_channel();
        let m1 = send(&db, &channel_id, "one");
        let m2 = send(&db, &channel_id, "two");

        db.toggle_reaction(&Uuid::new_v4().to_string(), &m1, "profile-1", "🎉").unwrap();
        db.toggle_reaction(&Uuid::new_v4().to_string(), &m2, "profile-2", "🎉").unwrap();
        db.toggle_reaction(&Uuid::new_v4().to_string(), &m2, "profile-1", "🎉").unwrap();

        let rows = db.get_reactions_for_messages(&[m1.clone(), m2.clone()]).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| r.message_id == m2).count(), 2);

        assert!(db.get_reactions_for_messages(&[]).unwrap().is_empty());
    }

    #[test]
    fn payload_round_trips_through_row_conversion() {
        let (db, channel_id) = db_with_channel();
        let id = Uuid::new_v4().to_string();
        db.insert_message(
            &id,
            &channel_id,
            None,
            "profile-1",
            "attachment",
            "scan.pdf",
            Some(r#"{"url":"https://files.example/scan.pdf","bytes":1024}"#),
        )
        .unwrap();

        let message = db.get_message(&id).unwrap().unwrap().into_message().unwrap();
        let payload = message.payload.unwrap();
        assert_eq!(payload["bytes"], 1024);
    }
}
