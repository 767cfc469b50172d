//! SQL schema for the Parley SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS participants (
    participant_id    TEXT PRIMARY KEY,
    display_name      TEXT NOT NULL,
    skills            TEXT NOT NULL DEFAULT '[]',
    interests         TEXT NOT NULL DEFAULT '[]',
    hobbies           TEXT NOT NULL DEFAULT '[]',
    preferred_mode    TEXT NOT NULL DEFAULT 'both',
    status            TEXT NOT NULL DEFAULT 'idle',  -- 'idle' | 'searching' | 'matched' | 'in_chat'
    current_match_id  TEXT,
    created_at        TEXT NOT NULL,
    status_changed_at TEXT NOT NULL,
    -- A match reference exists exactly while matched or in chat.
    CHECK ((status IN ('matched', 'in_chat')) = (current_match_id IS NOT NULL))
);

-- Matches are never deleted; terminal rows are kept for audit.
CREATE TABLE IF NOT EXISTS matches (
    match_id        TEXT PRIMARY KEY,
    initiator_id    TEXT NOT NULL REFERENCES participants(participant_id),
    recipient_id    TEXT NOT NULL REFERENCES participants(participant_id),
    mode            TEXT NOT NULL,   -- 'affinity' | 'challenge'
    status          TEXT NOT NULL,   -- 'pending' | 'rejected' | 'active' | 'ended'
    session_id      TEXT UNIQUE,
    suggested_topic TEXT,
    created_at      TEXT NOT NULL,
    activated_at    TEXT,
    resolved_at     TEXT,
    CHECK (initiator_id != recipient_id)
);

-- Strictly append-only. `seq` is the append order and the read cursor.
CREATE TABLE IF NOT EXISTS messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,
    session_id TEXT NOT NULL,
    sender_id  TEXT NOT NULL REFERENCES participants(participant_id),
    text       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Written once per session, at termination.
CREATE TABLE IF NOT EXISTS records (
    record_id    TEXT PRIMARY KEY,
    match_id     TEXT NOT NULL UNIQUE REFERENCES matches(match_id),
    initiator_id TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    mode         TEXT NOT NULL,
    topic        TEXT,
    summary      TEXT NOT NULL,
    key_points   TEXT NOT NULL DEFAULT '[]',
    started_at   TEXT NOT NULL,
    ended_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS participants_status_idx ON participants(status);
CREATE INDEX IF NOT EXISTS matches_initiator_idx    ON matches(initiator_id, status);
CREATE INDEX IF NOT EXISTS matches_recipient_idx    ON matches(recipient_id, status);
CREATE INDEX IF NOT EXISTS messages_session_idx     ON messages(session_id, seq);
CREATE INDEX IF NOT EXISTS records_initiator_idx    ON records(initiator_id);
CREATE INDEX IF NOT EXISTS records_recipient_idx    ON records(recipient_id);

PRAGMA user_version = 1;
";
