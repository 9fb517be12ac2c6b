use anyhow::Result;
use uuid::Uuid;

use super::OptionalExt;
use super::messages::insert_message_row;
use crate::Database;
use crate::models::ThreadRow;

impl Database {
    /// Get-or-create the thread anchored to a parent message. The parent
    /// must be a live, top-level message in the given channel; anything else
    /// resolves to None. At most one thread exists per parent message.
    pub fn ensure_thread(&self, channel_id: &str, parent_message_id: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let parent_thread: Option<Option<String>> = conn
                .query_row(
                    "SELECT thread_id FROM messages
                     WHERE id = ?1 AND channel_id = ?2 AND deleted_at IS NULL",
                    [parent_message_id, channel_id],
                    |row| row.get(0),
                )
                .optional()?;

            match parent_thread {
                None => return Ok(None),         // no such message
                Some(Some(_)) => return Ok(None), // replies cannot anchor threads
                Some(None) => {}
            }

            conn.execute(
                "INSERT OR IGNORE INTO threads (id, channel_id, parent_message_id)
                 VALUES (?1, ?2, ?3)",
                [&Uuid::new_v4().to_string(), channel_id, parent_message_id],
            )?;

            let thread_id: Option<String> = conn
                .query_row(
                    "SELECT id FROM threads
                     WHERE parent_message_id = ?1 AND deleted_at IS NULL",
                    [parent_message_id],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(thread_id)
        })
    }

    pub fn get_thread(&self, org_id: &str, thread_id: &str) -> Result<Option<ThreadRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.channel_id, t.parent_message_id, t.message_count,
                        t.last_reply_at, t.created_at
                 FROM threads t
                 JOIN channels c ON t.channel_id = c.id
                 WHERE t.id = ?1 AND c.org_id = ?2
                   AND t.deleted_at IS NULL AND c.deleted_at IS NULL",
            )?;

            let row = stmt.query_row([thread_id, org_id], thread_from_row).optional()?;
            Ok(row)
        })
    }

    /// Live threads in a channel, oldest first.
    pub fn list_threads(&self, channel_id: &str) -> Result<Vec<ThreadRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, channel_id, parent_message_id, message_count, last_reply_at, created_at
                 FROM threads
                 WHERE channel_id = ?1 AND deleted_at IS NULL
                 ORDER BY created_at ASC, id ASC",
            )?;

            let rows = stmt
                .query_map([channel_id], thread_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn thread_participants(&self, thread_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT profile_id FROM thread_participants
                 WHERE thread_id = ?1
                 ORDER BY joined_at ASC, profile_id ASC",
            )?;

            let rows = stmt
                .query_map([thread_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Batch-fetch participants for a set of thread IDs.
    pub fn get_participants_for_threads(
        &self,
        thread_ids: &[String],
    ) -> Result<Vec<(String, String)>> {
        if thread_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=thread_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT thread_id, profile_id FROM thread_participants
                 WHERE thread_id IN ({})
                 ORDER BY joined_at ASC, profile_id ASC",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = thread_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Insert a reply, recompute the thread's aggregate stats from the
    /// replies actually present, and register the author as a participant,
    /// all in one transaction. Returns the fresh (message_count, last_reply_at).
    pub fn insert_thread_reply(
        &self,
        message_id: &str,
        channel_id: &str,
        thread_id: &str,
        author_id: &str,
        kind: &str,
        body: &str,
        payload: Option<&str>,
    ) -> Result<(u32, Option<String>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            insert_message_row(
                &tx,
                message_id,
                channel_id,
                Some(thread_id),
                author_id,
                kind,
                body,
                payload,
            )?;

            let (count, last_reply_at): (i64, Option<String>) = tx.query_row(
                "SELECT COUNT(*), MAX(created_at) FROM messages
                 WHERE thread_id = ?1 AND deleted_at IS NULL",
                [thread_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            tx.execute(
                "UPDATE threads SET message_count = ?1, last_reply_at = ?2 WHERE id = ?3",
                rusqlite::params![count, last_reply_at, thread_id],
            )?;

            tx.execute(
                "INSERT OR IGNORE INTO thread_participants (thread_id, profile_id) VALUES (?1, ?2)",
                [thread_id, author_id],
            )?;

            tx.commit()?;
            Ok((count as u32, last_reply_at))
        })
    }
}

fn thread_from_row(row: &rusqlite::Row) -> std::result::Result<ThreadRow, rusqlite::Error> {
    Ok(ThreadRow {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        parent_message_id: row.get(2)?,
        message_count: row.get(3)?,
        last_reply_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}
