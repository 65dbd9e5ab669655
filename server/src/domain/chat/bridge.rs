//! Isolated stream bridge
//!
//! A push/pull queue between the producer task and the originating client's
//! consumer. The invariant that makes streams resumable: when the consumer
//! goes away (client disconnect), pushes become no-ops and the producer
//! keeps running - it still drains the provider, feeds the event log, and
//! finalizes the message row. Cancellation never propagates backwards.
//!
//! The queue is unbounded: the producer must never block on a slow client,
//! and chunk volume per message is bounded by provider output limits.

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::error::ChatError;
use super::events::StreamEvent;

/// Item flowing over the bridge: events, or the classified error surfaced
/// to the originating caller on mid-stream failure
pub type BridgeItem = Result<StreamEvent, ChatError>;

/// Producer half of the bridge
pub struct BridgeSender {
    tx: mpsc::UnboundedSender<BridgeItem>,
}

impl BridgeSender {
    /// Push an event to the consumer. No-op after the consumer is dropped.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(Ok(event));
    }

    /// Surface a classified error to the consumer. No-op after disconnect.
    pub fn error(&self, error: ChatError) {
        let _ = self.tx.send(Err(error));
    }

    /// Whether the consumer is still attached (diagnostics only; emit is
    /// already safe to call either way)
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Consumer half of the bridge: a lazy single-consumer stream. Dropping it
/// detaches the client without touching the producer.
pub type BridgeStream = UnboundedReceiverStream<BridgeItem>;

/// Create a connected bridge pair
pub fn channel() -> (BridgeSender, BridgeStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (BridgeSender { tx }, UnboundedReceiverStream::new(rx))
}
