use anyhow::Result;
use rusqlite::{Connection, Transaction};

use super::OptionalExt;
use crate::Database;
use crate::models::ReadStateRow;

impl Database {
    /// Every read-state row the account holds in the org, channel cursors
    /// and thread cursors alike. Rows for deleted channels are filtered out
    /// with the channels they belonged to.
    pub fn get_read_states(&self, account_id: &str, org_id: &str) -> Result<Vec<ReadStateRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT rs.account_id, rs.channel_id, rs.thread_id,
                        rs.last_read_message_id, rs.last_read_at, rs.unread_count
                 FROM read_states rs
                 JOIN channels c ON rs.channel_id = c.id
                 WHERE rs.account_id = ?1 AND c.org_id = ?2 AND c.deleted_at IS NULL
                 ORDER BY rs.channel_id ASC, rs.thread_id ASC",
            )?;

            let rows = stmt
                .query_map([account_id, org_id], read_state_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// The account's cursor for one channel (or one thread within it).
    pub fn get_read_state(
        &self,
        account_id: &str,
        channel_id: &str,
        thread_id: Option<&str>,
    ) -> Result<Option<ReadStateRow>> {
        self.with_conn(|conn| query_cursor(conn, account_id, channel_id, thread_id))
    }

    /// Advance the account's read cursor to a message. The cursor only ever
    /// moves forward: marking a message older than the stored cursor is a
    /// no-op that returns the stored row. `unread_count` is recomputed from
    /// the live messages behind the new cursor. Returns None when the
    /// message does not exist in the given channel/thread scope.
    pub fn mark_read(
        &self,
        account_id: &str,
        channel_id: &str,
        thread_id: Option<&str>,
        message_id: &str,
    ) -> Result<Option<ReadStateRow>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let message: Option<(Option<String>, String)> = tx
                .query_row(
                    "SELECT thread_id, created_at FROM messages
                     WHERE id = ?1 AND channel_id = ?2 AND deleted_at IS NULL",
                    [message_id, channel_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((message_thread, message_ts)) = message else {
                return Ok(None);
            };

            // A thread cursor only accepts messages from that thread; the
            // channel cursor accepts any message in the channel.
            if let Some(tid) = thread_id {
                if message_thread.as_deref() != Some(tid) {
                    return Ok(None);
                }
            }

            let existing = query_cursor(&tx, account_id, channel_id, thread_id)?;

            if let Some(ref row) = existing {
                if row.last_read_at.as_deref() >= Some(message_ts.as_str()) {
                    return Ok(existing);
                }
            }

            let unread_count = count_unread(&tx, channel_id, thread_id, &message_ts)?;

            if existing.is_some() {
                match thread_id {
                    Some(tid) => {
                        tx.execute(
                            "UPDATE read_states
                             SET last_read_message_id = ?1, last_read_at = ?2, unread_count = ?3
                             WHERE account_id = ?4 AND channel_id = ?5 AND thread_id = ?6",
                            rusqlite::params![message_id, message_ts, unread_count, account_id, channel_id, tid],
                        )?;
                    }
                    None => {
                        tx.execute(
                            "UPDATE read_states
                             SET last_read_message_id = ?1, last_read_at = ?2, unread_count = ?3
                             WHERE account_id = ?4 AND channel_id = ?5 AND thread_id IS NULL",
                            rusqlite::params![message_id, message_ts, unread_count, account_id, channel_id],
                        )?;
                    }
                }
            } else {
                tx.execute(
                    "INSERT INTO read_states
                     (account_id, channel_id, thread_id, last_read_message_id, last_read_at, unread_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![account_id, channel_id, thread_id, message_id, message_ts, unread_count],
                )?;
            }

            let updated = query_cursor(&tx, account_id, channel_id, thread_id)?;
            tx.commit()?;
            Ok(updated)
        })
    }
}

fn read_state_from_row(
    row: &rusqlite::Row,
) -> std::result::Result<ReadStateRow, rusqlite::Error> {
    Ok(ReadStateRow {
        account_id: row.get(0)?,
        channel_id: row.get(1)?,
        thread_id: row.get(2)?,
        last_read_message_id: row.get(3)?,
        last_read_at: row.get(4)?,
        unread_count: row.get(5)?,
    })
}

fn query_cursor(
    conn: &Connection,
    account_id: &str,
    channel_id: &str,
    thread_id: Option<&str>,
) -> Result<Option<ReadStateRow>> {
    let sql_base = "SELECT account_id, channel_id, thread_id,
                           last_read_message_id, last_read_at, unread_count
                    FROM read_states
                    WHERE account_id = ?1 AND channel_id = ?2";

    let row = match thread_id {
        Some(tid) => conn
            .query_row(
                &format!("{sql_base} AND thread_id = ?3"),
                [account_id, channel_id, tid],
                read_state_from_row,
            )
            .optional()?,
        None => conn
            .query_row(
                &format!("{sql_base} AND thread_id IS NULL"),
                [account_id, channel_id],
                read_state_from_row,
            )
            .optional()?,
    };

    Ok(row)
}

fn count_unread(
    tx: &Transaction,
    channel_id: &str,
    thread_id: Option<&str>,
    cursor_ts: &str,
) -> Result<i64> {
    let count = match thread_id {
        Some(tid) => tx.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE thread_id = ?1 AND deleted_at IS NULL AND created_at > ?2",
            [tid, cursor_ts],
            |row| row.get(0),
        )?,
        None => tx.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE channel_id = ?1 AND deleted_at IS NULL AND created_at > ?2",
            [channel_id, cursor_ts],
            |row| row.get(0),
        )?,
    };

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn setup() -> (Database, String) {
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
    fn first_mark_creates_cursor_with_unread_count() {
        let (db, channel_id) = setup();
        let m1 = send(&db, &channel_id, "one");
        let _m2 = send(&db, &channel_id, "two");
        let _m3 = send(&db, &channel_id, "three");

        let row = db.mark_read("profile-2", &channel_id, None, &m1).unwrap().unwrap();
        assert_eq!(row.last_read_message_id.as_deref(), Some(m1.as_str()));
        assert_eq!(row.unread_count, 2);
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let (db, channel_id) = setup();
        let m1 = send(&db, &channel_id, "one");
        let m2 = send(&db, &channel_id, "two");

        db.mark_read("profile-2", &channel_id, None, &m2).unwrap().unwrap();

        // Marking the older message is a no-op.
        let row = db.mark_read("profile-2", &channel_id, None, &m1).unwrap().unwrap();
        assert_eq!(row.last_read_message_id.as_deref(), Some(m2.as_str()));
        assert_eq!(row.unread_count, 0);

        // One cursor row total.
        let states = db.get_read_states("profile-2", "org-1").unwrap();
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn advancing_cursor_drops_unread_count() {
        let (db, channel_id) = setup();
        let m1 = send(&db, &channel_id, "one");
        let m2 = send(&db, &channel_id, "two");

        let first = db.mark_read("profile-2", &channel_id, None, &m1).unwrap().unwrap();
        assert_eq!(first.unread_count, 1);

        let second = db.mark_read("profile-2", &channel_id, None, &m2).unwrap().unwrap();
        assert_eq!(second.unread_count, 0);
    }

    #[test]
    fn thread_cursor_is_separate_from_channel_cursor() {
        let (db, channel_id) = setup();
        let parent = send(&db, &channel_id, "topic");
        let thread_id = db.ensure_thread(&channel_id, &parent).unwrap().unwrap();
        let reply_id = Uuid::new_v4().to_string();
        db.insert_thread_reply(&reply_id, &channel_id, &thread_id, "profile-1", "text", "r", None)
            .unwrap();

        db.mark_read("profile-2", &channel_id, None, &parent).unwrap().unwrap();
        db.mark_read("profile-2", &channel_id, Some(&thread_id), &reply_id).unwrap().unwrap();

        let states = db.get_read_states("profile-2", "org-1").unwrap();
        assert_eq!(states.len(), 2);
        assert!(states.iter().any(|s| s.thread_id.is_none()));
        assert!(states.iter().any(|s| s.thread_id.as_deref() == Some(thread_id.as_str())));
    }

    #[test]
    fn scope_mismatch_resolves_to_not_found() {
        let (db, channel_id) = setup();
        let m1 = send(&db, &channel_id, "one");
        let parent = send(&db, &channel_id, "topic");
        let thread_id = db.ensure_thread(&channel_id, &parent).unwrap().unwrap();

        // A top-level message cannot advance a thread cursor.
        assert!(db.mark_read("profile-2", &channel_id, Some(&thread_id), &m1).unwrap().is_none());

        // Unknown message, no write.
        let bogus = Uuid::new_v4().to_string();
        assert!(db.mark_read("profile-2", &channel_id, None, &bogus).unwrap().is_none());
        assert!(db.get_read_states("profile-2", "org-1").unwrap().is_empty());
    }
}
