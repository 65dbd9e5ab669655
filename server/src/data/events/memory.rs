//! In-memory event log backend
//!
//! Local-only event streams: a VecDeque per conversation with integer ids
//! and a Notify for blocking reads. Suitable for tests and single-process
//! deployments; a process crash loses all streams. Production durability and
//! multi-instance replay require the Redis backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::backend::{EventLogBackend, EventRecord};
use super::error::EventLogError;

/// One conversation's stream state
struct StreamState {
    entries: Vec<(u64, Vec<u8>)>,
    meta: Option<Vec<u8>>,
    next_id: u64,
    /// Shared TTL horizon for entries and meta, reset on every write
    expires_at: Instant,
    notify: Arc<Notify>,
}

impl StreamState {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Vec::new(),
            meta: None,
            next_id: 1,
            expires_at: Instant::now() + ttl,
            notify: Arc::new(Notify::new()),
        }
    }
}

/// In-memory event log backend
#[derive(Default)]
pub struct MemoryEventLog {
    streams: Mutex<HashMap<String, StreamState>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the live (non-expired) stream state, creating it if
    /// `create` is set. Expired streams are dropped on access.
    fn with_stream<R>(
        &self,
        conv_id: &str,
        create: bool,
        f: impl FnOnce(Option<&mut StreamState>) -> R,
    ) -> R {
        let mut streams = self.streams.lock();

        if let Some(state) = streams.get(conv_id)
            && Instant::now() >= state.expires_at
        {
            streams.remove(conv_id);
        }

        if create && !streams.contains_key(conv_id) {
            // TTL is reset by the caller right after creation
            streams.insert(conv_id.to_string(), StreamState::new(Duration::ZERO));
        }

        f(streams.get_mut(conv_id))
    }

    fn parse_cursor(cursor: &str) -> Result<u64, EventLogError> {
        cursor
            .parse::<u64>()
            .map_err(|_| EventLogError::Stream(format!("invalid cursor: {}", cursor)))
    }

    fn read_after(state: &StreamState, cursor: u64, count: usize) -> Vec<EventRecord> {
        state
            .entries
            .iter()
            .filter(|(id, _)| *id > cursor)
            .take(count)
            .map(|(id, payload)| EventRecord {
                id: id.to_string(),
                payload: payload.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl EventLogBackend for MemoryEventLog {
    async fn append(
        &self,
        conv_id: &str,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<String, EventLogError> {
        let ids = self.append_batch(conv_id, &[payload.to_vec()], ttl).await?;
        Ok(ids.into_iter().next().unwrap_or_default())
    }

    async fn append_batch(
        &self,
        conv_id: &str,
        payloads: &[Vec<u8>],
        ttl: Duration,
    ) -> Result<Vec<String>, EventLogError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self.with_stream(conv_id, true, |state| {
            let state = state.expect("stream created above");
            let mut ids = Vec::with_capacity(payloads.len());
            for payload in payloads {
                let id = state.next_id;
                state.next_id += 1;
                state.entries.push((id, payload.clone()));
                ids.push(id.to_string());
            }
            state.expires_at = Instant::now() + ttl;
            state.notify.notify_waiters();
            ids
        }))
    }

    async fn range_from(
        &self,
        conv_id: &str,
        cursor: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<EventRecord>, EventLogError> {
        let cursor = Self::parse_cursor(cursor)?;
        let deadline = Instant::now() + block;

        loop {
            let (records, notify) = self.with_stream(conv_id, false, |state| match state {
                Some(state) => (
                    Self::read_after(state, cursor, count),
                    Some(Arc::clone(&state.notify)),
                ),
                None => (Vec::new(), None),
            });

            if !records.is_empty() {
                return Ok(records);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }

            match notify {
                Some(notify) => {
                    // A write between the read above and this registration
                    // is not observed by the Notify, so cap the wait and
                    // re-check instead of sleeping out the whole block.
                    let wait = remaining.min(Duration::from_millis(100));
                    let _ = tokio::time::timeout(wait, notify.notified()).await;
                }
                None => {
                    // Stream does not exist yet; poll for its creation
                    tokio::time::sleep(remaining.min(Duration::from_millis(50))).await;
                }
            }
        }
    }

    async fn get_meta(&self, conv_id: &str) -> Result<Option<Vec<u8>>, EventLogError> {
        Ok(self.with_stream(conv_id, false, |state| {
            state.and_then(|s| s.meta.clone())
        }))
    }

    async fn set_meta(
        &self,
        conv_id: &str,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), EventLogError> {
        self.with_stream(conv_id, true, |state| {
            let state = state.expect("stream created above");
            state.meta = Some(payload.to_vec());
            state.expires_at = Instant::now() + ttl;
        });
        Ok(())
    }

    async fn bump_ttl(&self, conv_id: &str, ttl: Duration) -> Result<(), EventLogError> {
        self.with_stream(conv_id, false, |state| {
            if let Some(state) = state {
                state.expires_at = Instant::now() + ttl;
            }
        });
        Ok(())
    }

    async fn purge(&self, conv_id: &str) -> Result<(), EventLogError> {
        self.streams.lock().remove(conv_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), EventLogError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
