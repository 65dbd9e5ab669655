//! Event log module
//!
//! The durable, id-addressable event stream per conversation that makes
//! streams resumable: the producer appends every emitted event here (through
//! the batched writer), and any number of subscribers replay from a cursor
//! and then follow live entries.
//!
//! Backends:
//! - In-memory (default) - single process, for tests and local dev
//! - Redis Streams - durable, shared across instances

mod backend;
mod error;
mod memory;
mod redis;
pub mod writer;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::{EventLogBackend, EventRecord};
pub use error::EventLogError;
pub use writer::BatchedEventWriter;

use memory::MemoryEventLog;

use crate::core::config::{StreamBackendType, StreamConfig};
use crate::core::constants::STREAM_POOL_MAX_SIZE;

/// Event log service providing typed access to the log backend
///
/// Events and metadata are serialized as JSON, which is also the wire format
/// subscribers relay to clients.
pub struct EventLogService {
    backend: Arc<dyn EventLogBackend>,
    ttl: Duration,
    batch_flush: Duration,
    batch_max_events: usize,
}

impl std::fmt::Debug for EventLogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogService")
            .field("backend", &self.backend.backend_name())
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl EventLogService {
    /// Create a new event log service from configuration
    pub async fn new(config: &StreamConfig) -> Result<Self, EventLogError> {
        let backend: Arc<dyn EventLogBackend> = match config.backend {
            StreamBackendType::Memory => {
                tracing::debug!("Initializing in-memory event log");
                Arc::new(MemoryEventLog::new())
            }
            StreamBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    EventLogError::Config("redis_url required for Redis backend".into())
                })?;
                // RedisEventLog::new logs the sanitized URL internally
                Arc::new(redis::RedisEventLog::new(url, STREAM_POOL_MAX_SIZE).await?)
            }
        };

        Ok(Self {
            backend,
            ttl: Duration::from_secs(config.event_ttl_secs),
            batch_flush: Duration::from_millis(config.batch_flush_ms),
            batch_max_events: config.batch_max_events,
        })
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Append one event, returning its assigned id
    pub async fn append<T: Serialize>(
        &self,
        conv_id: &str,
        event: &T,
    ) -> Result<String, EventLogError> {
        let payload = serde_json::to_vec(event)
            .map_err(|e| EventLogError::Serialization(e.to_string()))?;
        self.backend.append(conv_id, &payload, self.ttl).await
    }

    /// Append pre-serialized payloads in one round trip (batched writer path)
    pub(crate) async fn append_batch_raw(
        &self,
        conv_id: &str,
        payloads: &[Vec<u8>],
    ) -> Result<Vec<String>, EventLogError> {
        self.backend.append_batch(conv_id, payloads, self.ttl).await
    }

    /// Read the next slice of events after `cursor` (exclusive), blocking up
    /// to `block` when the slice is empty.
    ///
    /// Transient backend errors surface as an empty slice so subscribers
    /// simply poll again; entries that fail to deserialize are skipped.
    pub async fn range_from<T: DeserializeOwned>(
        &self,
        conv_id: &str,
        cursor: &str,
        count: usize,
        block: Duration,
    ) -> Vec<(String, T)> {
        let records = match self.backend.range_from(conv_id, cursor, count, block).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(conv_id, cursor, error = %e, "Event log read failed");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .filter_map(|record| match serde_json::from_slice(&record.payload) {
                Ok(event) => Some((record.id, event)),
                Err(e) => {
                    tracing::warn!(conv_id, id = %record.id, error = %e, "Skipping undecodable event");
                    None
                }
            })
            .collect()
    }

    /// Get the typed metadata record, if present
    pub async fn get_meta<M: DeserializeOwned>(
        &self,
        conv_id: &str,
    ) -> Result<Option<M>, EventLogError> {
        match self.backend.get_meta(conv_id).await? {
            Some(bytes) => {
                let meta = serde_json::from_slice(&bytes)
                    .map_err(|e| EventLogError::Serialization(e.to_string()))?;
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    /// Set the metadata record, resetting the shared TTL horizon
    pub async fn set_meta<M: Serialize>(
        &self,
        conv_id: &str,
        meta: &M,
    ) -> Result<(), EventLogError> {
        let payload =
            serde_json::to_vec(meta).map_err(|e| EventLogError::Serialization(e.to_string()))?;
        self.backend.set_meta(conv_id, &payload, self.ttl).await
    }

    /// Reset the shared TTL horizon without writing
    pub async fn bump_ttl(&self, conv_id: &str) -> Result<(), EventLogError> {
        self.backend.bump_ttl(conv_id, self.ttl).await
    }

    /// Delete the stream and metadata (maintenance only)
    pub async fn purge(&self, conv_id: &str) -> Result<(), EventLogError> {
        self.backend.purge(conv_id).await
    }

    /// Spawn a batched writer for one producing conversation
    pub fn batched_writer(self: &Arc<Self>, conv_id: &str) -> BatchedEventWriter {
        BatchedEventWriter::spawn(
            Arc::clone(self),
            conv_id.to_string(),
            self.batch_flush,
            self.batch_max_events,
        )
    }

    /// Health check
    pub async fn health_check(&self) -> Result<(), EventLogError> {
        self.backend.health_check().await
    }
}

#[cfg(test)]
pub(crate) fn test_service(
    batch_flush_ms: u64,
    batch_max_events: usize,
) -> Arc<EventLogService> {
    Arc::new(EventLogService {
        backend: Arc::new(MemoryEventLog::new()),
        ttl: Duration::from_secs(60),
        batch_flush: Duration::from_millis(batch_flush_ms),
        batch_max_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestEvent {
        kind: String,
        seq: u32,
    }

    fn event(seq: u32) -> TestEvent {
        TestEvent {
            kind: "chunk".to_string(),
            seq,
        }
    }

    #[tokio::test]
    async fn test_typed_append_and_range() {
        let service = test_service(1000, 100);

        service.append("c1", &event(1)).await.unwrap();
        service.append("c1", &event(2)).await.unwrap();

        let entries: Vec<(String, TestEvent)> = service
            .range_from("c1", "0", 100, Duration::ZERO)
            .await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, event(1));
        assert_eq!(entries[1].1, event(2));
    }

    #[tokio::test]
    async fn test_range_resumes_from_cursor() {
        let service = test_service(1000, 100);

        service.append("c1", &event(1)).await.unwrap();
        let id2 = service.append("c1", &event(2)).await.unwrap();
        service.append("c1", &event(3)).await.unwrap();

        let entries: Vec<(String, TestEvent)> = service
            .range_from("c1", &id2, 100, Duration::ZERO)
            .await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, event(3));
    }

    #[tokio::test]
    async fn test_meta_roundtrip() {
        let service = test_service(1000, 100);

        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Meta {
            status: String,
        }

        assert!(
            service
                .get_meta::<Meta>("c1")
                .await
                .unwrap()
                .is_none()
        );

        service
            .set_meta(
                "c1",
                &Meta {
                    status: "active".to_string(),
                },
            )
            .await
            .unwrap();

        let meta: Meta = service.get_meta("c1").await.unwrap().unwrap();
        assert_eq!(meta.status, "active");
    }

    #[tokio::test]
    async fn test_undecodable_entries_are_skipped() {
        let service = test_service(1000, 100);

        service
            .append_batch_raw("c1", &[b"not json".to_vec()])
            .await
            .unwrap();
        service.append("c1", &event(1)).await.unwrap();

        let entries: Vec<(String, TestEvent)> = service
            .range_from("c1", "0", 100, Duration::ZERO)
            .await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, event(1));
    }

    #[tokio::test]
    async fn test_purge_clears_stream() {
        let service = test_service(1000, 100);
        service.append("c1", &event(1)).await.unwrap();

        service.purge("c1").await.unwrap();

        let entries: Vec<(String, TestEvent)> = service
            .range_from("c1", "0", 100, Duration::ZERO)
            .await;
        assert!(entries.is_empty());
    }
}
