//! Type-safe cache key builder
//!
//! Streaming-protocol keys (stop flags, rate counters) use stable wire names
//! shared with other instances and are NOT versioned. Pure cache keys carry a
//! version prefix so a schema change can invalidate all cached data at once.

use crate::core::constants::CACHE_KEY_VERSION;

/// Type-safe cache key builder
pub struct CacheKey;

impl CacheKey {
    // =========================================================================
    // Streaming protocol (stable names, unversioned)
    // =========================================================================

    /// Cross-node stop flag for a conversation. Presence of the key means
    /// "cancellation requested".
    pub fn stop_flag(conv_id: &str) -> String {
        format!("stop-stream:{}", conv_id)
    }

    /// Free-tier rate counter for an (owner, provider) pair
    pub fn free_tier(provider: &str, owner_id: &str) -> String {
        format!("rate:freetier:{}:user:{}", provider, owner_id)
    }

    // =========================================================================
    // Model catalog cache (versioned)
    // =========================================================================

    /// Cache key for a model catalog entry
    pub fn model(id: &str) -> String {
        format!("{}:model:{}", CACHE_KEY_VERSION, id)
    }
}
