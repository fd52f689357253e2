//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `users` (chat directory) and `messages`
//! (the durable message log).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (chat directory, synced from the surrounding application)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,   -- external identity reference
    name       TEXT NOT NULL,
    role       TEXT NOT NULL,
    avatar     TEXT,
    email      TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,  -- UUID v4, assigned at persistence time
    sender      TEXT NOT NULL,              -- user id
    recipient   TEXT NOT NULL,              -- user id
    kind        TEXT NOT NULL DEFAULT 'text'
                CHECK (kind IN ('text', 'image')),
    body        TEXT,                       -- text payload
    media_ref   TEXT,                       -- opaque upload reference
    client_time TEXT NOT NULL,              -- display time, client-supplied
    status      TEXT NOT NULL DEFAULT 'sent'
                CHECK (status IN ('sent', 'read')),
    created_at  TEXT NOT NULL,              -- ISO-8601, server-assigned

    CHECK (body IS NOT NULL OR media_ref IS NOT NULL)
);

-- Conversation fetches: both directions of a pair, ordered by created_at.
CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender, recipient, created_at);

-- Unread counting and bulk mark-as-read.
CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(recipient, sender, status);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
