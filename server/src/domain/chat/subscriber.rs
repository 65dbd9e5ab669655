//! Subscriber: replay-then-follow over the event log
//!
//! Serves one client connection from the durable log: replay everything
//! after the supplied cursor, then follow live entries via blocking reads.
//! Delivery is at-least-once and ordered per conversation; clients apply by
//! event id, which makes redelivery after a cursor-reuse reconnect
//! harmless.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::Stream;

use super::events::{StreamEvent, StreamMeta, StreamStatus};
use crate::data::events::EventLogService;

/// Cursor value denoting "from the beginning"
pub const CURSOR_BEGIN: &str = "0";

/// Subscribe to a conversation's event stream from a cursor
///
/// Closes after yielding `messageComplete`, when the stream metadata is
/// absent or completed with nothing new past the cursor, or after a full
/// blocking read with no entries and no metadata activity.
pub fn subscribe(
    events: Arc<EventLogService>,
    conv_id: String,
    cursor: Option<String>,
    block: Duration,
    read_count: usize,
) -> impl Stream<Item = StreamEvent> + Send {
    stream! {
        let mut cursor = cursor.unwrap_or_else(|| CURSOR_BEGIN.to_string());

        let meta = match events.get_meta::<StreamMeta>(&conv_id).await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                tracing::debug!(conv_id, "No stream metadata, nothing to subscribe to");
                return;
            }
            Err(e) => {
                tracing::warn!(conv_id, error = %e, "Stream metadata read failed");
                return;
            }
        };
        let mut last_activity = meta.last_activity;

        loop {
            let batch: Vec<(String, StreamEvent)> = events
                .range_from(&conv_id, &cursor, read_count, block)
                .await;

            if batch.is_empty() {
                // Blocking read timed out. Close unless the producer shows
                // signs of life in the metadata.
                match events.get_meta::<StreamMeta>(&conv_id).await {
                    Ok(Some(meta)) => {
                        if meta.status == StreamStatus::Completed {
                            tracing::debug!(conv_id, "Stream completed, closing subscriber");
                            return;
                        }
                        if meta.last_activity == last_activity {
                            tracing::debug!(conv_id, "Subscriber idle, closing");
                            return;
                        }
                        last_activity = meta.last_activity;
                    }
                    Ok(None) => return,
                    Err(e) => {
                        tracing::warn!(conv_id, error = %e, "Stream metadata read failed");
                        return;
                    }
                }
                continue;
            }

            for (id, event) in batch {
                cursor = id;
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    use crate::data::events::test_service;
    use crate::data::types::{MessageRow, MessageStatus};
    use crate::domain::chat::events::MessageSnapshot;

    const BLOCK: Duration = Duration::from_millis(50);

    fn row(status: MessageStatus, finished_at: Option<i64>) -> MessageRow {
        MessageRow {
            id: "m1".to_string(),
            chat_id: "c1".to_string(),
            user_content: "hi".to_string(),
            agent_content: Some("Hello world".to_string()),
            status,
            error_reason: None,
            input_tokens: None,
            output_tokens: None,
            latency_ms: None,
            created_at: 100,
            finished_at,
        }
    }

    fn meta(status: StreamStatus, last_activity: i64) -> StreamMeta {
        StreamMeta {
            conv_id: "c1".to_string(),
            started_at: 100,
            last_activity,
            status,
            producer: None,
        }
    }

    async fn collect(
        events: Arc<EventLogService>,
        cursor: Option<String>,
    ) -> Vec<StreamEvent> {
        subscribe(events, "c1".to_string(), cursor, BLOCK, 500)
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_absent_meta_yields_empty_stream() {
        let events = test_service(1000, 100);
        assert!(collect(events, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_full_historical_replay_ends_at_complete() {
        let events = test_service(1000, 100);

        events
            .append("c1", &StreamEvent::start(&row(MessageStatus::Started, None)))
            .await
            .unwrap();
        events
            .append("c1", &StreamEvent::chunk("c1", "m1", "Hel"))
            .await
            .unwrap();
        events
            .append("c1", &StreamEvent::chunk("c1", "m1", "lo"))
            .await
            .unwrap();
        events
            .append(
                "c1",
                &StreamEvent::complete(MessageSnapshot::from_row(&row(
                    MessageStatus::Completed,
                    Some(200),
                ))),
            )
            .await
            .unwrap();
        events
            .set_meta("c1", &meta(StreamStatus::Completed, 200))
            .await
            .unwrap();

        let received = collect(events, None).await;
        assert_eq!(received.len(), 4);
        assert!(matches!(received[0], StreamEvent::MessageStart { .. }));
        assert!(matches!(received[3], StreamEvent::MessageComplete { .. }));
    }

    #[tokio::test]
    async fn test_cursor_resume_skips_consumed_events() {
        let events = test_service(1000, 100);

        events
            .append("c1", &StreamEvent::start(&row(MessageStatus::Started, None)))
            .await
            .unwrap();
        let chunk_id = events
            .append("c1", &StreamEvent::chunk("c1", "m1", "Hel"))
            .await
            .unwrap();
        events
            .append("c1", &StreamEvent::chunk("c1", "m1", "lo"))
            .await
            .unwrap();
        events
            .append(
                "c1",
                &StreamEvent::complete(MessageSnapshot::from_row(&row(
                    MessageStatus::Completed,
                    Some(200),
                ))),
            )
            .await
            .unwrap();
        events
            .set_meta("c1", &meta(StreamStatus::Completed, 200))
            .await
            .unwrap();

        let received = collect(events, Some(chunk_id)).await;
        assert_eq!(received.len(), 2);
        assert!(matches!(
            &received[0],
            StreamEvent::AgentChunk { chunk, .. } if chunk == "lo"
        ));
        assert!(matches!(received[1], StreamEvent::MessageComplete { .. }));
    }

    #[tokio::test]
    async fn test_follows_live_appends() {
        let events = test_service(1000, 100);

        events
            .append("c1", &StreamEvent::start(&row(MessageStatus::Started, None)))
            .await
            .unwrap();
        events
            .set_meta("c1", &meta(StreamStatus::Active, 100))
            .await
            .unwrap();

        let reader = {
            let events = Arc::clone(&events);
            tokio::spawn(async move {
                subscribe(events, "c1".to_string(), None, Duration::from_secs(2), 500)
                    .collect::<Vec<_>>()
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        events
            .append("c1", &StreamEvent::chunk("c1", "m1", "live"))
            .await
            .unwrap();
        events
            .append(
                "c1",
                &StreamEvent::complete(MessageSnapshot::from_row(&row(
                    MessageStatus::Completed,
                    Some(200),
                ))),
            )
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(3), reader)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.len(), 3);
        assert!(matches!(received[2], StreamEvent::MessageComplete { .. }));
    }

    #[tokio::test]
    async fn test_idle_with_unchanged_meta_closes() {
        let events = test_service(1000, 100);

        events
            .append("c1", &StreamEvent::start(&row(MessageStatus::Started, None)))
            .await
            .unwrap();
        events
            .set_meta("c1", &meta(StreamStatus::Active, 100))
            .await
            .unwrap();

        // Consume the one event, then hit the idle timeout with no meta change
        let received = collect(events, None).await;
        assert_eq!(received.len(), 1);
    }

    #[tokio::test]
    async fn test_completed_meta_with_no_new_events_closes() {
        let events = test_service(1000, 100);

        events
            .set_meta("c1", &meta(StreamStatus::Completed, 200))
            .await
            .unwrap();

        assert!(collect(events, None).await.is_empty());
    }
}
