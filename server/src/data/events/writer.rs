//! Batched event writer
//!
//! Coalesces event appends for one producing conversation into pipelined
//! round trips. Two thresholds trigger a flush: the time window and the
//! buffer size. Enqueueing is non-blocking and never drops on a healthy
//! queue; a failed flush keeps the buffer and retries on the next tick, so
//! the producer is never blocked by the durable path.
//!
//! Every flush goes through `append_batch`, which also resets the shared
//! TTL horizon - the first flush therefore establishes the stream TTL.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::EventLogService;

enum WriterCmd {
    Event(Vec<u8>),
    Flush(oneshot::Sender<()>),
}

/// Handle to a per-conversation writer task
pub struct BatchedEventWriter {
    tx: mpsc::UnboundedSender<WriterCmd>,
    handle: JoinHandle<()>,
}

impl BatchedEventWriter {
    /// Spawn the writer task for one conversation
    pub(super) fn spawn(
        events: Arc<EventLogService>,
        conv_id: String,
        flush_interval: Duration,
        max_events: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(events, conv_id, rx, flush_interval, max_events));
        Self { tx, handle }
    }

    /// Enqueue an event for the next flush. Non-blocking; serialization
    /// failures are logged and dropped (the DB row stays authoritative).
    pub fn enqueue<T: Serialize>(&self, event: &T) {
        match serde_json::to_vec(event) {
            Ok(payload) => {
                // Send fails only after close(), which producers never outlive
                let _ = self.tx.send(WriterCmd::Event(payload));
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event for batching");
            }
        }
    }

    /// Force an immediate flush and wait for it to run
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriterCmd::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Flush pending events and release the writer task
    pub async fn close(self) {
        drop(self.tx);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Batched writer task panicked");
        }
    }
}

async fn run_writer(
    events: Arc<EventLogService>,
    conv_id: String,
    mut rx: mpsc::UnboundedReceiver<WriterCmd>,
    flush_interval: Duration,
    max_events: usize,
) {
    let mut buffer: Vec<Vec<u8>> = Vec::new();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it
    ticker.tick().await;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(WriterCmd::Event(payload)) => {
                    buffer.push(payload);
                    if buffer.len() >= max_events {
                        flush(&events, &conv_id, &mut buffer).await;
                    }
                }
                Some(WriterCmd::Flush(ack)) => {
                    flush(&events, &conv_id, &mut buffer).await;
                    let _ = ack.send(());
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush(&events, &conv_id, &mut buffer).await;
                }
            }
        }
    }

    // Sender dropped: flush whatever remains before exiting
    if !buffer.is_empty() {
        flush(&events, &conv_id, &mut buffer).await;
        if !buffer.is_empty() {
            tracing::error!(
                conv_id,
                pending = buffer.len(),
                "Dropping unflushed events on writer close"
            );
        }
    }

    tracing::trace!(conv_id, "Batched writer stopped");
}

/// Flush the buffer in one pipelined round trip. On failure the buffer is
/// kept for the next tick.
async fn flush(events: &EventLogService, conv_id: &str, buffer: &mut Vec<Vec<u8>>) {
    match events.append_batch_raw(conv_id, buffer).await {
        Ok(ids) => {
            tracing::trace!(conv_id, count = ids.len(), "Flushed event batch");
            buffer.clear();
        }
        Err(e) => {
            tracing::warn!(
                conv_id,
                pending = buffer.len(),
                error = %e,
                "Event batch flush failed, retrying on next tick"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::events::test_service;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestEvent {
        seq: u32,
    }

    async fn read_all(events: &EventLogService, conv_id: &str) -> Vec<TestEvent> {
        events
            .range_from::<TestEvent>(conv_id, "0", 1000, Duration::ZERO)
            .await
            .into_iter()
            .map(|(_, e)| e)
            .collect()
    }

    #[tokio::test]
    async fn test_flushes_on_size_threshold() {
        let events = test_service(60_000, 3);
        let writer = events.batched_writer("c1");

        for seq in 0..3 {
            writer.enqueue(&TestEvent { seq });
        }

        // Size threshold reached; no tick needed
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(read_all(&events, "c1").await.len(), 3);

        writer.close().await;
    }

    #[tokio::test]
    async fn test_flushes_on_time_threshold() {
        let events = test_service(50, 1000);
        let writer = events.batched_writer("c1");

        writer.enqueue(&TestEvent { seq: 1 });

        // Below the size threshold: nothing until the tick fires
        assert!(read_all(&events, "c1").await.is_empty());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(read_all(&events, "c1").await.len(), 1);

        writer.close().await;
    }

    #[tokio::test]
    async fn test_explicit_flush() {
        let events = test_service(60_000, 1000);
        let writer = events.batched_writer("c1");

        writer.enqueue(&TestEvent { seq: 1 });
        writer.enqueue(&TestEvent { seq: 2 });
        writer.flush().await;

        assert_eq!(read_all(&events, "c1").await.len(), 2);

        writer.close().await;
    }

    #[tokio::test]
    async fn test_close_flushes_pending() {
        let events = test_service(60_000, 1000);
        let writer = events.batched_writer("c1");

        writer.enqueue(&TestEvent { seq: 1 });
        writer.close().await;

        assert_eq!(read_all(&events, "c1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_preserves_enqueue_order() {
        let events = test_service(60_000, 4);
        let writer = events.batched_writer("c1");

        for seq in 0..10 {
            writer.enqueue(&TestEvent { seq });
        }
        writer.close().await;

        let all = read_all(&events, "c1").await;
        assert_eq!(all.len(), 10);
        for (i, event) in all.iter().enumerate() {
            assert_eq!(event.seq, i as u32);
        }
    }
}
