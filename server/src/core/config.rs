use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_CACHE_MAX_ENTRIES,
    DEFAULT_FREE_TIER_REQUESTS, DEFAULT_FREE_TIER_WINDOW_SECS, DEFAULT_HOST,
    DEFAULT_MAX_OUTPUT_TOKENS, DEFAULT_MODEL_ID, DEFAULT_OPENAI_BASE_URL, DEFAULT_PORT,
    DEFAULT_REDIS_URL, HISTORY_WINDOW_MESSAGES, STOP_FLAG_TTL_SECS, STREAM_BATCH_FLUSH_MS,
    STREAM_BATCH_MAX_EVENTS, STREAM_EVENT_TTL_SECS, SUBSCRIBER_BLOCK_SECS, SUBSCRIBER_READ_COUNT,
};

// =============================================================================
// Cache Backend Enum
// =============================================================================

/// Cache backend type (stop flags, rate counters, model catalog)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// Event Log Backend Enum
// =============================================================================

/// Event log backend type (durable per-conversation streams)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for StreamBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamBackendType::Memory => write!(f, "memory"),
            StreamBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Cache configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    pub backend: Option<CacheBackendType>,
    pub max_entries: Option<u64>,
    pub redis_url: Option<String>,
}

/// Event log configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamFileConfig {
    pub backend: Option<StreamBackendType>,
    pub redis_url: Option<String>,
    pub event_ttl_secs: Option<u64>,
    pub batch_flush_ms: Option<u64>,
    pub batch_max_events: Option<usize>,
}

/// Free-tier rate limit configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RateLimitFileConfig {
    pub free_tier_requests: Option<u32>,
    pub free_tier_window_secs: Option<u64>,
}

/// Provider configuration section (API keys come from env, not the file)
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProviderFileConfig {
    pub anthropic_base_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub default_model: Option<String>,
}

/// Root config file structure
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub cache: CacheFileConfig,
    #[serde(default)]
    pub stream: StreamFileConfig,
    #[serde(default)]
    pub rate_limit: RateLimitFileConfig,
    #[serde(default)]
    pub providers: ProviderFileConfig,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Server bind configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendType,
    pub max_entries: u64,
    pub redis_url: Option<String>,
}

/// Event log and streaming engine configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub backend: StreamBackendType,
    pub redis_url: Option<String>,
    /// Shared TTL horizon for stream entries and metadata
    pub event_ttl_secs: u64,
    /// Batched writer time threshold
    pub batch_flush_ms: u64,
    /// Batched writer size threshold
    pub batch_max_events: usize,
    /// Subscriber blocking-read timeout
    pub subscriber_block_secs: u64,
    /// Subscriber read count per blocking read
    pub subscriber_read_count: usize,
    /// Cross-node stop flag TTL
    pub stop_flag_ttl_secs: u64,
}

/// Free-tier rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Producer starts allowed per (owner, provider) window
    pub free_tier_requests: u32,
    /// Window length in seconds
    pub free_tier_window_secs: u64,
}

/// Provider configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Server-side Anthropic key used for free-tier requests
    pub anthropic_api_key: Option<String>,
    /// Server-side OpenAI key used for free-tier requests
    pub openai_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    /// System fallback model id (must exist in the model catalog)
    pub default_model: String,
    pub max_output_tokens: u32,
    /// Prior terminal messages replayed to the provider
    pub history_window: u32,
}

/// Complete resolved application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub stream: StreamConfig,
    pub rate_limit: RateLimitConfig,
    pub providers: ProviderConfig,
}

impl AppConfig {
    /// Resolve configuration: CLI/env flags win over the config file,
    /// which wins over built-in defaults. Without an explicit `--config`,
    /// a `chatrelay.json` in the working directory is picked up.
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => {
                let local = Path::new(CONFIG_FILE_NAME);
                if local.is_file() {
                    FileConfig::load(local)?
                } else {
                    FileConfig::default()
                }
            }
        };

        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or(file.server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file.server.port).unwrap_or(DEFAULT_PORT),
        };

        let cache_backend = cli
            .cache_backend
            .or(file.cache.backend)
            .unwrap_or_default();
        let cache = CacheConfig {
            backend: cache_backend,
            max_entries: cli
                .cache_max_entries
                .or(file.cache.max_entries)
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            redis_url: cli
                .cache_redis_url
                .clone()
                .or(file.cache.redis_url)
                .or_else(|| {
                    (cache_backend == CacheBackendType::Redis)
                        .then(|| DEFAULT_REDIS_URL.to_string())
                }),
        };

        let stream_backend = cli
            .stream_backend
            .or(file.stream.backend)
            .unwrap_or_default();
        let stream = StreamConfig {
            backend: stream_backend,
            redis_url: cli
                .stream_redis_url
                .clone()
                .or(file.stream.redis_url)
                .or_else(|| {
                    (stream_backend == StreamBackendType::Redis)
                        .then(|| DEFAULT_REDIS_URL.to_string())
                }),
            event_ttl_secs: file.stream.event_ttl_secs.unwrap_or(STREAM_EVENT_TTL_SECS),
            batch_flush_ms: file.stream.batch_flush_ms.unwrap_or(STREAM_BATCH_FLUSH_MS),
            batch_max_events: file
                .stream
                .batch_max_events
                .unwrap_or(STREAM_BATCH_MAX_EVENTS),
            subscriber_block_secs: SUBSCRIBER_BLOCK_SECS,
            subscriber_read_count: SUBSCRIBER_READ_COUNT,
            stop_flag_ttl_secs: STOP_FLAG_TTL_SECS,
        };

        let rate_limit = RateLimitConfig {
            free_tier_requests: cli
                .free_tier_requests
                .or(file.rate_limit.free_tier_requests)
                .unwrap_or(DEFAULT_FREE_TIER_REQUESTS),
            free_tier_window_secs: cli
                .free_tier_window_secs
                .or(file.rate_limit.free_tier_window_secs)
                .unwrap_or(DEFAULT_FREE_TIER_WINDOW_SECS),
        };

        let providers = ProviderConfig {
            anthropic_api_key: cli.anthropic_api_key.clone(),
            openai_api_key: cli.openai_api_key.clone(),
            anthropic_base_url: cli
                .anthropic_base_url
                .clone()
                .or(file.providers.anthropic_base_url)
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_BASE_URL.to_string()),
            openai_base_url: cli
                .openai_base_url
                .clone()
                .or(file.providers.openai_base_url)
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            default_model: file
                .providers
                .default_model
                .unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            history_window: HISTORY_WINDOW_MESSAGES,
        };

        Ok(Self {
            server,
            cache,
            stream,
            rate_limit,
            providers,
        })
    }
}
