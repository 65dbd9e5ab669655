//! Cache backend trait definition

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

/// Cache backend trait
///
/// Defines the interface for cache implementations. Both in-memory and Redis
/// backends implement this trait. Stop flags and free-tier counters go
/// through here, so the memory backend is only suitable for single-process
/// deployments; cross-node coordination requires Redis.
///
/// # Consistency Notes
///
/// Operations on individual keys are atomic, but the return values of some
/// operations (like `delete` and `exists`) may be stale in concurrent
/// scenarios. This is acceptable here: stop flags are polled per chunk and
/// rate counters tolerate a request of slack.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Set a value in the cache with optional TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Delete a key from the cache
    ///
    /// Returns `true` if the key existed before deletion, `false` otherwise.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Check if a key exists in the cache
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomic increment with TTL (creates key if not exists)
    ///
    /// Used for rate limiting. The TTL is applied only when the counter is
    /// created (transition 0 -> 1).
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError>;

    /// Get the current counter value without incrementing
    ///
    /// Returns None if the counter doesn't exist or has expired.
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError>;

    /// Get the TTL remaining for a key
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), CacheError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
