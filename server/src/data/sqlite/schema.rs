//! SQLite schema definitions
//!
//! Initial schema with all tables, plus the model catalog seed. The fallback
//! model must exist before the first message is streamed, so it ships with
//! the schema rather than application code.

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Complete schema SQL
pub const SCHEMA: &str = r#"
-- =============================================================================
-- Infrastructure: Schema version tracking
-- =============================================================================
CREATE TABLE IF NOT EXISTS schema_version (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    execution_time_ms INTEGER,
    success INTEGER NOT NULL DEFAULT 1
);

-- =============================================================================
-- 1. Model catalog (must be before owners/chats due to FK)
-- =============================================================================
CREATE TABLE IF NOT EXISTS models (
    id TEXT PRIMARY KEY,
    provider TEXT NOT NULL CHECK(provider IN ('anthropic', 'openai')),
    display_name TEXT NOT NULL CHECK(length(display_name) >= 1)
);

-- =============================================================================
-- 2. Owners (created lazily on first use)
-- =============================================================================
CREATE TABLE IF NOT EXISTS owners (
    id TEXT PRIMARY KEY,
    default_model_id TEXT REFERENCES models(id),
    created_at INTEGER NOT NULL
);

-- =============================================================================
-- 3. Chats
-- =============================================================================
CREATE TABLE IF NOT EXISTS chats (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
    title TEXT CHECK(title IS NULL OR length(title) <= 200),
    default_model_id TEXT REFERENCES models(id),
    deleted INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chats_owner ON chats(owner_id, updated_at DESC);

-- =============================================================================
-- 4. Messages
--
-- finished_at is set iff the status is terminal, and at most one
-- non-terminal message may exist per chat (the currently-streaming one).
-- =============================================================================
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
    user_content TEXT NOT NULL,
    agent_content TEXT,
    status TEXT NOT NULL CHECK(status IN ('Started', 'Streaming', 'Completed', 'Aborted', 'Failed')),
    error_reason TEXT,
    input_tokens INTEGER,
    output_tokens INTEGER,
    latency_ms INTEGER,
    created_at INTEGER NOT NULL,
    finished_at INTEGER,
    CHECK ((finished_at IS NULL) = (status IN ('Started', 'Streaming')))
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_finished ON messages(chat_id, finished_at);
CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_one_active ON messages(chat_id) WHERE finished_at IS NULL;

-- =============================================================================
-- 5. Provider credentials (owner-supplied keys bypass the free tier)
-- =============================================================================
CREATE TABLE IF NOT EXISTS provider_credentials (
    owner_id TEXT NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
    provider TEXT NOT NULL CHECK(provider IN ('anthropic', 'openai')),
    api_key TEXT NOT NULL CHECK(length(api_key) >= 1),
    created_at INTEGER NOT NULL,
    PRIMARY KEY (owner_id, provider)
);

-- =============================================================================
-- Model catalog seed
-- =============================================================================
INSERT OR IGNORE INTO models (id, provider, display_name) VALUES
    ('claude-3-5-haiku-latest', 'anthropic', 'Claude 3.5 Haiku'),
    ('claude-sonnet-4-5', 'anthropic', 'Claude Sonnet 4.5'),
    ('gpt-4o-mini', 'openai', 'GPT-4o mini'),
    ('gpt-4o', 'openai', 'GPT-4o');
"#;
