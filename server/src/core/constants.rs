// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "ChatRelay";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".chatrelay";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "chatrelay.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "CHATRELAY_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "CHATRELAY_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "CHATRELAY_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "CHATRELAY_LOG";

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "CHATRELAY_DATA_DIR";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5460;

/// Default body limit for JSON API requests (1 MB)
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

// =============================================================================
// SQLite Database
// =============================================================================

/// SQLite database filename
pub const SQLITE_DB_FILENAME: &str = "chatrelay.db";

/// SQLite connection pool max connections
pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 30;

/// SQLite cache size (negative = KB, so -64000 = 64MB)
pub const SQLITE_CACHE_SIZE: &str = "-64000";

/// SQLite WAL auto-checkpoint threshold (pages, ~4MB at 1000)
pub const SQLITE_WAL_AUTOCHECKPOINT: &str = "1000";

// =============================================================================
// Cache (stop flags, rate counters, model catalog)
// =============================================================================

/// Environment variable for cache backend (memory or redis)
pub const ENV_CACHE_BACKEND: &str = "CHATRELAY_CACHE_BACKEND";

/// Environment variable for cache max entries (memory backend)
pub const ENV_CACHE_MAX_ENTRIES: &str = "CHATRELAY_CACHE_MAX_ENTRIES";

/// Environment variable for Redis-compatible cache URL
pub const ENV_CACHE_REDIS_URL: &str = "CHATRELAY_CACHE_REDIS_URL";

/// Default cache max entries
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

/// Default Redis URL (works with Redis, Valkey, Dragonfly)
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

/// Cache key version (bump on schema changes to invalidate all cached data)
pub const CACHE_KEY_VERSION: &str = "v1";

/// Cache TTL for model catalog entries (5 min)
pub const CACHE_TTL_MODEL: u64 = 300;

// =============================================================================
// Event Log (durable per-conversation stream)
// =============================================================================

/// Environment variable for event log backend (memory or redis)
pub const ENV_STREAM_BACKEND: &str = "CHATRELAY_STREAM_BACKEND";

/// Environment variable for event log Redis URL
pub const ENV_STREAM_REDIS_URL: &str = "CHATRELAY_STREAM_REDIS_URL";

/// TTL for stream entries and metadata on active streams, refreshed on each
/// batch flush. Entries and meta share one TTL horizon.
pub const STREAM_EVENT_TTL_SECS: u64 = 3600;

/// Batched writer time threshold in milliseconds
pub const STREAM_BATCH_FLUSH_MS: u64 = 1000;

/// Batched writer size threshold (events per flush)
pub const STREAM_BATCH_MAX_EVENTS: usize = 100;

/// Subscriber blocking-read timeout in seconds
pub const SUBSCRIBER_BLOCK_SECS: u64 = 30;

/// Subscriber read count per blocking read
pub const SUBSCRIBER_READ_COUNT: usize = 500;

/// Writer/reader pool size for the Redis event log
pub const STREAM_POOL_MAX_SIZE: usize = 16;

// =============================================================================
// Stop Registry
// =============================================================================

/// TTL for the cross-node stop flag (seconds)
pub const STOP_FLAG_TTL_SECS: u64 = 300;

// =============================================================================
// Free-Tier Rate Limiting
// =============================================================================

/// Environment variable for free-tier request budget per window
pub const ENV_FREE_TIER_REQUESTS: &str = "CHATRELAY_FREE_TIER_REQUESTS";

/// Environment variable for free-tier window length in seconds
pub const ENV_FREE_TIER_WINDOW_SECS: &str = "CHATRELAY_FREE_TIER_WINDOW_SECS";

/// Default free-tier producer starts per (owner, provider) window
pub const DEFAULT_FREE_TIER_REQUESTS: u32 = 25;

/// Default free-tier window length (24 hours)
pub const DEFAULT_FREE_TIER_WINDOW_SECS: u64 = 86_400;

// =============================================================================
// Providers
// =============================================================================

/// Environment variable for the server-side Anthropic API key (free tier)
pub const ENV_ANTHROPIC_API_KEY: &str = "CHATRELAY_ANTHROPIC_API_KEY";

/// Environment variable for the server-side OpenAI API key (free tier)
pub const ENV_OPENAI_API_KEY: &str = "CHATRELAY_OPENAI_API_KEY";

/// Environment variable to override the Anthropic API base URL
pub const ENV_ANTHROPIC_BASE_URL: &str = "CHATRELAY_ANTHROPIC_BASE_URL";

/// Environment variable to override the OpenAI API base URL
pub const ENV_OPENAI_BASE_URL: &str = "CHATRELAY_OPENAI_BASE_URL";

/// Default Anthropic API base URL
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Default OpenAI API base URL
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";

/// System fallback model id. Seeded into the model catalog by the initial
/// migration; the model resolution chain ends here.
pub const DEFAULT_MODEL_ID: &str = "claude-3-5-haiku-latest";

/// Max completion tokens requested from providers
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Number of prior terminal messages replayed to the provider as context
pub const HISTORY_WINDOW_MESSAGES: u32 = 20;

/// Provider connect timeout in seconds (no total timeout; streams run long)
pub const PROVIDER_CONNECT_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Message Pagination
// =============================================================================

/// Default page size for message history
pub const DEFAULT_MESSAGE_PAGE_LIMIT: u32 = 50;

/// Maximum page size for message history
pub const MAX_MESSAGE_PAGE_LIMIT: u32 = 200;

// =============================================================================
// Shutdown
// =============================================================================

/// Graceful shutdown timeout in seconds
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
