//! Free-tier rate limiter using the cache backend
//!
//! Limits producer starts per (owner, provider) for owners streaming on the
//! server's own provider credentials. Owners who supply their own keys bypass
//! this entirely.
//!
//! # Algorithm
//!
//! Fixed window with an atomic counter: INCR the counter, set the window TTL
//! on the 0 -> 1 transition, block once the counter exceeds the budget. The
//! `retry_after_secs` hint is the remaining window TTL.
//!
//! # Known Limitations
//!
//! Fixed windows allow up to 2x the budget across a window boundary. For a
//! once-per-message counter with a daily window this is acceptable.

use std::sync::Arc;
use std::time::Duration;

use super::CacheService;
use super::key::CacheKey;
use crate::core::config::RateLimitConfig;

/// Rate limit check result
#[derive(Debug, Clone)]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Requests remaining in the current window
    pub remaining: u32,
    /// Window budget
    pub limit: u32,
    /// Seconds until the window resets (only if blocked)
    pub retry_after_secs: Option<u64>,
}

/// Free-tier rate limiter
pub struct RateLimiter {
    cache: Arc<CacheService>,
    requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheService>, config: &RateLimitConfig) -> Self {
        Self {
            cache,
            requests: config.free_tier_requests,
            window: Duration::from_secs(config.free_tier_window_secs),
        }
    }

    /// Count a free-tier producer start for (owner, provider) and report
    /// whether it is allowed.
    ///
    /// Cache failures allow the request: a broken Redis must not take chat
    /// down with it.
    pub async fn check_free_tier(&self, provider: &str, owner_id: &str) -> RateLimitResult {
        let key = CacheKey::free_tier(provider, owner_id);

        let count = match self.cache.incr(&key, Some(self.window)).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(
                    provider,
                    owner_id,
                    error = %e,
                    "Free-tier counter increment failed, allowing request"
                );
                1
            }
        };

        let limit_i64 = i64::from(self.requests);
        let allowed = count <= limit_i64;
        let remaining = limit_i64.saturating_sub(count).try_into().unwrap_or(0u32);

        let retry_after_secs = if allowed {
            None
        } else {
            let ttl = self.cache.ttl(&key).await.ok().flatten();
            // Clamp into [1, window]: a just-expired key still reports 1s
            Some(
                ttl.map(|d| d.as_secs())
                    .unwrap_or(self.window.as_secs())
                    .clamp(1, self.window.as_secs()),
            )
        };

        tracing::trace!(provider, owner_id, count, allowed, "Free-tier check");

        RateLimitResult {
            allowed,
            remaining,
            limit: self.requests,
            retry_after_secs,
        }
    }
}
