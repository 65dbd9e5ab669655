//! Stop registry
//!
//! Cancellation has two layers so a stream can be aborted from any node:
//!
//! 1. A short-lived cross-node flag in the shared cache
//!    (`stop-stream:{convId}`), written by `request_stop` and polled by the
//!    producer before each chunk.
//! 2. A process-local cancellation token per active producer, for immediate
//!    wakeup when the abort lands on the producing instance itself.
//!
//! The registry is an explicit service value injected where needed; the
//! local map never crosses process boundaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::error::ChatError;
use crate::data::cache::{CacheKey, CacheService};

struct ActiveStream {
    owner_id: String,
    token: CancellationToken,
}

/// Process-scoped registry of active producers plus the cross-node flag
pub struct StopRegistry {
    cache: Arc<CacheService>,
    active: Mutex<HashMap<String, ActiveStream>>,
    flag_ttl: Duration,
}

impl StopRegistry {
    pub fn new(cache: Arc<CacheService>, flag_ttl: Duration) -> Self {
        Self {
            cache,
            active: Mutex::new(HashMap::new()),
            flag_ttl,
        }
    }

    /// Register a producer for a conversation, returning an RAII guard that
    /// carries the cancellation token. Fails with `Conflict` if this process
    /// already runs a producer for the conversation.
    pub fn register(
        self: &Arc<Self>,
        conv_id: &str,
        owner_id: &str,
    ) -> Result<StopGuard, ChatError> {
        let token = CancellationToken::new();
        let mut active = self.active.lock();

        if active.contains_key(conv_id) {
            return Err(ChatError::Conflict {
                message: format!("conversation {} already has an active producer", conv_id),
            });
        }

        active.insert(
            conv_id.to_string(),
            ActiveStream {
                owner_id: owner_id.to_string(),
                token: token.clone(),
            },
        );

        Ok(StopGuard {
            registry: Arc::clone(self),
            conv_id: conv_id.to_string(),
            token,
        })
    }

    /// Whether this process runs a producer for the conversation
    pub fn is_active(&self, conv_id: &str) -> bool {
        self.active.lock().contains_key(conv_id)
    }

    /// Owner of the local producer, if any
    pub fn active_owner(&self, conv_id: &str) -> Option<String> {
        self.active
            .lock()
            .get(conv_id)
            .map(|s| s.owner_id.clone())
    }

    /// Request cancellation: set the cross-node flag and cancel the local
    /// token if the producer runs here. Returns whether a local producer was
    /// signalled.
    ///
    /// Callers verify a stream is actually active first (local registration
    /// or active stream metadata); the flag outlives the producer by its
    /// TTL, and a flag written with nothing to observe it would abort the
    /// conversation's next message. New producers also clear any stale flag
    /// on startup.
    pub async fn request_stop(&self, conv_id: &str) -> Result<bool, ChatError> {
        self.cache
            .set_raw(
                &CacheKey::stop_flag(conv_id),
                b"1".to_vec(),
                Some(self.flag_ttl),
            )
            .await?;

        let signalled = {
            let active = self.active.lock();
            match active.get(conv_id) {
                Some(stream) => {
                    stream.token.cancel();
                    true
                }
                None => false,
            }
        };

        tracing::debug!(conv_id, local = signalled, "Stop requested");
        Ok(signalled)
    }

    /// Poll the cross-node flag. Errors count as "not requested" - a broken
    /// cache must not abort healthy streams.
    pub async fn is_stop_requested(&self, conv_id: &str) -> bool {
        match self.cache.exists(&CacheKey::stop_flag(conv_id)).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(conv_id, error = %e, "Stop flag read failed");
                false
            }
        }
    }

    /// Drop the stale flag once a stream has fully stopped
    pub async fn clear_flag(&self, conv_id: &str) {
        if let Err(e) = self.cache.delete(&CacheKey::stop_flag(conv_id)).await {
            tracing::warn!(conv_id, error = %e, "Stop flag cleanup failed");
        }
    }

    fn deregister(&self, conv_id: &str) {
        self.active.lock().remove(conv_id);
    }
}

/// RAII registration of one active producer. Dropping deregisters, so a
/// panicking producer task cannot leak its conversation slot.
pub struct StopGuard {
    registry: Arc<StopRegistry>,
    conv_id: String,
    token: CancellationToken,
}

impl StopGuard {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.conv_id);
        tracing::trace!(conv_id = %self.conv_id, "Producer deregistered");
    }
}
