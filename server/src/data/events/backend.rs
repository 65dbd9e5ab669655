//! Event log backend trait definition
//!
//! An append-only, id-addressable stream of events per conversation plus one
//! metadata record, with a TTL horizon shared between the two.

use std::time::Duration;

use async_trait::async_trait;

use super::error::EventLogError;

/// An entry read from the log, with the id assigned on append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Monotonic id, totally ordered within a conversation. Opaque to
    /// callers; used as the subscriber cursor. "0" sorts before every id.
    pub id: String,
    /// Serialized event payload
    pub payload: Vec<u8>,
}

/// Event log backend trait
///
/// Both the in-memory and Redis backends implement this trait.
///
/// # Guarantees
///
/// - Total order per conversation; ids are assigned by the log on append.
/// - Durability for at least the TTL after the last write.
/// - Entries and metadata share one TTL horizon: any write through this
///   trait resets both.
///
/// The backend never deletes entries on its own apart from TTL expiry;
/// `purge` exists for maintenance.
#[async_trait]
pub trait EventLogBackend: Send + Sync {
    /// Append one event, returning its assigned id
    async fn append(
        &self,
        conv_id: &str,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<String, EventLogError>;

    /// Append a batch of events in a single round trip, returning assigned
    /// ids in order
    async fn append_batch(
        &self,
        conv_id: &str,
        payloads: &[Vec<u8>],
        ttl: Duration,
    ) -> Result<Vec<String>, EventLogError>;

    /// Read the next slice of entries with id > `cursor` (exclusive), up to
    /// `count`. If the slice is empty, block up to `block` for new entries
    /// and return the empty slice on timeout. Cursor "0" means "from the
    /// beginning".
    async fn range_from(
        &self,
        conv_id: &str,
        cursor: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<EventRecord>, EventLogError>;

    /// Get the raw metadata record, if present
    async fn get_meta(&self, conv_id: &str) -> Result<Option<Vec<u8>>, EventLogError>;

    /// Set the metadata record, resetting the shared TTL horizon
    async fn set_meta(
        &self,
        conv_id: &str,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<(), EventLogError>;

    /// Reset the shared TTL horizon without writing
    async fn bump_ttl(&self, conv_id: &str, ttl: Duration) -> Result<(), EventLogError>;

    /// Delete the stream and metadata (maintenance only)
    async fn purge(&self, conv_id: &str) -> Result<(), EventLogError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), EventLogError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
