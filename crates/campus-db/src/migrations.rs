use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS channels (
            id              TEXT PRIMARY KEY,
            org_id          TEXT NOT NULL,
            kind            TEXT NOT NULL,
            topic           TEXT NOT NULL DEFAULT '',
            visibility      TEXT NOT NULL DEFAULT 'private',
            posting_policy  TEXT NOT NULL DEFAULT 'members_only',
            status          TEXT NOT NULL DEFAULT 'active',
            dm_key          TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            deleted_at      TEXT
        );

        -- At most one live DM channel per unordered participant pair per org.
        -- The resolver relies on this index losing the insert race cleanly;
        -- soft-deleted rows leave the index so the pair can converse again.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_channels_org_dm_key
            ON channels(org_id, dm_key)
            WHERE dm_key IS NOT NULL AND deleted_at IS NULL;

        CREATE INDEX IF NOT EXISTS idx_channels_org
            ON channels(org_id);

        CREATE TABLE IF NOT EXISTS channel_members (
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            profile_id  TEXT NOT NULL,
            role        TEXT NOT NULL DEFAULT 'member',
            joined_at   TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            deleted_at  TEXT,
            PRIMARY KEY (channel_id, profile_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            channel_id  TEXT NOT NULL REFERENCES channels(id),
            thread_id   TEXT REFERENCES threads(id),
            author_id   TEXT NOT NULL,
            kind        TEXT NOT NULL DEFAULT 'text',
            body        TEXT NOT NULL DEFAULT '',
            payload     TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            deleted_at  TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_channel
            ON messages(channel_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(thread_id);

        CREATE TABLE IF NOT EXISTS threads (
            id                  TEXT PRIMARY KEY,
            channel_id          TEXT NOT NULL REFERENCES channels(id),
            parent_message_id   TEXT NOT NULL REFERENCES messages(id),
            message_count       INTEGER NOT NULL DEFAULT 0,
            last_reply_at       TEXT,
            created_at          TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            deleted_at          TEXT,
            UNIQUE(parent_message_id)
        );

        CREATE TABLE IF NOT EXISTS thread_participants (
            thread_id   TEXT NOT NULL REFERENCES threads(id),
            profile_id  TEXT NOT NULL,
            joined_at   TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            PRIMARY KEY (thread_id, profile_id)
        );

        CREATE TABLE IF NOT EXISTS read_states (
            account_id              TEXT NOT NULL,
            channel_id              TEXT NOT NULL REFERENCES channels(id),
            thread_id               TEXT REFERENCES threads(id),
            last_read_message_id    TEXT,
            last_read_at            TEXT,
            unread_count            INTEGER NOT NULL DEFAULT 0
        );

        -- SQLite treats NULLs as distinct in plain UNIQUE constraints, so the
        -- channel-level cursor (thread_id IS NULL) needs its own partial index.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_read_states_channel
            ON read_states(account_id, channel_id) WHERE thread_id IS NULL;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_read_states_thread
            ON read_states(account_id, channel_id, thread_id) WHERE thread_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id),
            profile_id  TEXT NOT NULL,
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now','subsec')),
            UNIQUE(message_id, profile_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
