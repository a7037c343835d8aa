use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL,
            avatar_url  TEXT NOT NULL,
            is_online   INTEGER NOT NULL DEFAULT 0,
            last_seen   INTEGER NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- Two-party conversations, keyed by the canonical (sorted) user pair.
        -- The UNIQUE constraint enforces at most one conversation per
        -- unordered pair; the CHECK keeps the pair canonical.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            user_a          TEXT NOT NULL REFERENCES users(id),
            user_b          TEXT NOT NULL REFERENCES users(id),
            last_message_id TEXT,
            last_message_at INTEGER,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(user_a, user_b),
            CHECK(user_a < user_b)
        );

        CREATE TABLE IF NOT EXISTS groups (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            created_by      TEXT NOT NULL REFERENCES users(id),
            last_message_id TEXT,
            last_message_at INTEGER,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    TEXT NOT NULL REFERENCES groups(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            UNIQUE(group_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_group_members_user
            ON group_members(user_id);

        -- One store for both direct and group messages, discriminated by
        -- chat_kind ('dm' | 'group').
        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            chat_kind   TEXT NOT NULL CHECK(chat_kind IN ('dm', 'group')),
            chat_id     TEXT NOT NULL,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            is_deleted  INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_kind, chat_id, created_at);

        -- Reader set per message. INSERT OR IGNORE against the UNIQUE pair
        -- gives mark-as-read its idempotent set semantics.
        CREATE TABLE IF NOT EXISTS message_reads (
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            UNIQUE(message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_reads_message
            ON message_reads(message_id);

        CREATE TABLE IF NOT EXISTS reactions (
            id          TEXT PRIMARY KEY,
            message_id  TEXT NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL REFERENCES users(id),
            emoji       TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(message_id, user_id, emoji)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON reactions(message_id);

        -- One row per (chat, user); upserted on every keystroke-debounce
        -- cycle and read through a freshness window, never deleted.
        CREATE TABLE IF NOT EXISTS typing_status (
            chat_kind   TEXT NOT NULL CHECK(chat_kind IN ('dm', 'group')),
            chat_id     TEXT NOT NULL,
            user_id     TEXT NOT NULL REFERENCES users(id),
            is_typing   INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL,
            UNIQUE(chat_kind, chat_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_typing_chat
            ON typing_status(chat_kind, chat_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
