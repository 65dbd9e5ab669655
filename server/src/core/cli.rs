use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::config::{CacheBackendType, StreamBackendType};
use super::constants::{
    ENV_ANTHROPIC_API_KEY, ENV_ANTHROPIC_BASE_URL, ENV_CACHE_BACKEND, ENV_CACHE_MAX_ENTRIES,
    ENV_CACHE_REDIS_URL, ENV_CONFIG, ENV_FREE_TIER_REQUESTS, ENV_FREE_TIER_WINDOW_SECS, ENV_HOST,
    ENV_OPENAI_API_KEY, ENV_OPENAI_BASE_URL, ENV_PORT, ENV_STREAM_BACKEND, ENV_STREAM_REDIS_URL,
};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(version, about = "Resumable LLM chat streaming backend", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    // Cache options
    /// Cache backend (memory or redis)
    #[arg(long, global = true, env = ENV_CACHE_BACKEND, value_parser = parse_cache_backend)]
    pub cache_backend: Option<CacheBackendType>,

    /// Maximum number of cache entries (memory backend)
    #[arg(long, global = true, env = ENV_CACHE_MAX_ENTRIES)]
    pub cache_max_entries: Option<u64>,

    /// Redis URL for the cache backend
    #[arg(long, global = true, env = ENV_CACHE_REDIS_URL)]
    pub cache_redis_url: Option<String>,

    // Event log options
    /// Event log backend (memory or redis)
    #[arg(long, global = true, env = ENV_STREAM_BACKEND, value_parser = parse_stream_backend)]
    pub stream_backend: Option<StreamBackendType>,

    /// Redis URL for the event log backend
    #[arg(long, global = true, env = ENV_STREAM_REDIS_URL)]
    pub stream_redis_url: Option<String>,

    // Free-tier rate limiting
    /// Free-tier producer starts per (owner, provider) window
    #[arg(long, global = true, env = ENV_FREE_TIER_REQUESTS)]
    pub free_tier_requests: Option<u32>,

    /// Free-tier window length in seconds
    #[arg(long, global = true, env = ENV_FREE_TIER_WINDOW_SECS)]
    pub free_tier_window_secs: Option<u64>,

    // Provider credentials (env only in practice; flags exist for dev)
    /// Server-side Anthropic API key used for free-tier requests
    #[arg(long, global = true, env = ENV_ANTHROPIC_API_KEY, hide_env_values = true)]
    pub anthropic_api_key: Option<String>,

    /// Server-side OpenAI API key used for free-tier requests
    #[arg(long, global = true, env = ENV_OPENAI_API_KEY, hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Override the Anthropic API base URL
    #[arg(long, global = true, env = ENV_ANTHROPIC_BASE_URL)]
    pub anthropic_base_url: Option<String>,

    /// Override the OpenAI API base URL
    #[arg(long, global = true, env = ENV_OPENAI_BASE_URL)]
    pub openai_base_url: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Start the server (default when no subcommand is given)
    Start,
    /// Print resolved storage paths and exit
    Paths,
}

/// Plain data extracted from the parsed CLI, consumed by `AppConfig::load`
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub cache_backend: Option<CacheBackendType>,
    pub cache_max_entries: Option<u64>,
    pub cache_redis_url: Option<String>,
    pub stream_backend: Option<StreamBackendType>,
    pub stream_redis_url: Option<String>,
    pub free_tier_requests: Option<u32>,
    pub free_tier_window_secs: Option<u64>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub openai_base_url: Option<String>,
}

/// Parse CLI arguments into config values and the selected command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        cache_backend: cli.cache_backend,
        cache_max_entries: cli.cache_max_entries,
        cache_redis_url: cli.cache_redis_url,
        stream_backend: cli.stream_backend,
        stream_redis_url: cli.stream_redis_url,
        free_tier_requests: cli.free_tier_requests,
        free_tier_window_secs: cli.free_tier_window_secs,
        anthropic_api_key: cli.anthropic_api_key,
        openai_api_key: cli.openai_api_key,
        anthropic_base_url: cli.anthropic_base_url,
        openai_base_url: cli.openai_base_url,
    };
    (config, cli.command)
}

fn parse_cache_backend(s: &str) -> Result<CacheBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(CacheBackendType::Memory),
        "redis" => Ok(CacheBackendType::Redis),
        _ => Err(format!(
            "Invalid cache backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

fn parse_stream_backend(s: &str) -> Result<StreamBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(StreamBackendType::Memory),
        "redis" => Ok(StreamBackendType::Redis),
        _ => Err(format!(
            "Invalid stream backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cache_backend() {
        assert_eq!(parse_cache_backend("memory"), Ok(CacheBackendType::Memory));
        assert_eq!(parse_cache_backend("Redis"), Ok(CacheBackendType::Redis));
        assert!(parse_cache_backend("duckdb").is_err());
    }

    #[test]
    fn test_parse_stream_backend() {
        assert_eq!(parse_stream_backend("REDIS"), Ok(StreamBackendType::Redis));
        assert!(parse_stream_backend("kafka").is_err());
    }

    #[test]
    fn test_cli_parses_start_command() {
        let cli = Cli::parse_from(["chatrelay", "start", "--port", "8123"]);
        assert_eq!(cli.command, Some(Commands::Start));
        assert_eq!(cli.port, Some(8123));
    }

    #[test]
    fn test_cli_defaults_to_no_command() {
        let cli = Cli::parse_from(["chatrelay"]);
        assert!(cli.command.is_none());
    }
}
