//! Chat engine and producer
//!
//! The engine front door validates preconditions synchronously (conflict,
//! model resolution, credentials, free tier) and then spawns the producer
//! task that drives one message from allocation to terminal state:
//!
//! ```text
//! [Started] -> messageStart -> [Streaming] -> agentChunk* -> terminal
//!   terminal = Completed (provider end) | Aborted (stop flag) | Failed (provider error)
//! ```
//!
//! Every emitted event fans out to the batched writer (durable log) and the
//! local bridge (originating client). Neither sink can stop the producer:
//! the bridge ignores disconnects and writer failures are logged, with the
//! message row staying authoritative for final content.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use sqlx::SqlitePool;

use super::bridge::{self, BridgeSender, BridgeStream};
use super::error::ChatError;
use super::events::{MessageSnapshot, StreamEvent, StreamMeta, StreamStatus};
use super::stop::{StopGuard, StopRegistry};
use super::subscriber;
use crate::core::config::{ProviderConfig, StreamConfig};
use crate::data::cache::{CacheService, RateLimiter};
use crate::data::events::{BatchedEventWriter, EventLogService};
use crate::data::sqlite::repositories::{chat, credential, message, model, owner};
use crate::data::types::{MessageRow, MessageStatus, ModelRow};
use crate::domain::providers::{
    ChatMessage, ChatParams, ChatProvider, ProviderError, ProviderEvent, ProviderKind,
    ProviderRegistry, Usage, filter_messages,
};
use crate::utils::time::now_ms;

/// Max length of a chat title derived from the first user message
const DERIVED_TITLE_MAX_CHARS: usize = 80;

/// Input for `send_with_stream`
#[derive(Debug, Clone)]
pub struct SendRequest {
    /// Existing conversation; a new one is created when absent
    pub conv_id: Option<String>,
    /// User prompt text
    pub content: String,
    /// Model override (must exist in the catalog)
    pub model_id: Option<String>,
}

/// A started stream: ids plus the originating client's event stream
pub struct SendStream {
    pub conv_id: String,
    pub message_id: String,
    pub stream: BridgeStream,
}

/// Pagination direction for `message_page`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDirection {
    Forward,
    Backward,
}

/// One page of terminal messages plus the live one, if any
#[derive(Debug)]
pub struct MessagePage {
    pub messages: Vec<MessageRow>,
    /// Sync cursor: `finished_at` of the boundary message, or the request
    /// cursor when the page is empty
    pub sync_date: i64,
    pub streaming_message: Option<MessageRow>,
}

/// The streaming chat engine
///
/// One instance per process, shared across connections. All cross-node
/// state goes through the cache and the event log.
pub struct ChatEngine {
    pool: SqlitePool,
    cache: Arc<CacheService>,
    events: Arc<EventLogService>,
    stops: Arc<StopRegistry>,
    limiter: Arc<RateLimiter>,
    providers: Arc<ProviderRegistry>,
    provider_config: ProviderConfig,
    subscriber_block: Duration,
    subscriber_read_count: usize,
}

impl ChatEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        cache: Arc<CacheService>,
        events: Arc<EventLogService>,
        stops: Arc<StopRegistry>,
        limiter: Arc<RateLimiter>,
        providers: Arc<ProviderRegistry>,
        provider_config: ProviderConfig,
        stream_config: &StreamConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            events,
            stops,
            limiter,
            providers,
            provider_config,
            subscriber_block: Duration::from_secs(stream_config.subscriber_block_secs),
            subscriber_read_count: stream_config.subscriber_read_count,
        }
    }

    /// Start streaming a new user message
    ///
    /// Pre-stream failures return here synchronously with nothing appended
    /// to the event log and no message row created. On success the producer
    /// task runs detached; dropping the returned stream only detaches the
    /// client.
    pub async fn send_with_stream(
        &self,
        owner_id: &str,
        request: SendRequest,
    ) -> Result<SendStream, ChatError> {
        let owner_row = owner::get_or_create(&self.pool, owner_id).await?;

        let chat_row = match &request.conv_id {
            Some(conv_id) => chat::get_for_owner(&self.pool, conv_id, owner_id)
                .await?
                .ok_or_else(|| ChatError::NotFound {
                    what: format!("chat {}", conv_id),
                })?,
            None => {
                let title = derive_title(&request.content);
                chat::create(&self.pool, owner_id, Some(&title), None).await?
            }
        };

        // Exactly one non-terminal message per conversation. The unique
        // index backs this up; checking first gives the clean error.
        if message::current_streaming(&self.pool, &chat_row.id)
            .await?
            .is_some()
        {
            return Err(ChatError::Conflict {
                message: format!("chat {} already has a streaming message", chat_row.id),
            });
        }

        let model = self
            .resolve_model(
                request.model_id.as_deref(),
                chat_row.default_model_id.as_deref(),
                owner_row.default_model_id.as_deref(),
            )
            .await?;
        let provider_kind = ProviderKind::from_str(&model.provider)
            .map_err(ChatError::internal)?;

        let api_key = self.resolve_credentials(owner_id, provider_kind).await?;
        let adapter = self.providers.adapter(provider_kind)?;

        let message_row =
            message::create_initial(&self.pool, &chat_row.id, &request.content).await?;
        if let Err(e) = chat::touch(&self.pool, &chat_row.id).await {
            tracing::warn!(conv_id = %chat_row.id, error = %e, "Chat touch failed");
        }

        let guard = self.stops.register(&chat_row.id, owner_id)?;

        let mut context = self
            .load_history(&chat_row.id, &message_row.id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(conv_id = %chat_row.id, error = %e, "History load failed, sending bare prompt");
                Vec::new()
            });
        context.push(ChatMessage::user(request.content.clone()));
        let context = filter_messages(context);

        let params = ChatParams {
            model_id: model.id.clone(),
            api_key,
            max_output_tokens: self.provider_config.max_output_tokens,
        };

        let (bridge_tx, bridge_rx) = bridge::channel();
        let writer = self.events.batched_writer(&chat_row.id);

        let ctx = ProducerCtx {
            pool: self.pool.clone(),
            events: Arc::clone(&self.events),
            stops: Arc::clone(&self.stops),
            adapter,
            writer,
            bridge: bridge_tx,
            guard,
            message: message_row.clone(),
            context,
            params,
        };

        tracing::debug!(
            conv_id = %chat_row.id,
            message_id = %message_row.id,
            model = %model.id,
            "Producer starting"
        );
        tokio::spawn(run_producer(ctx));

        Ok(SendStream {
            conv_id: chat_row.id,
            message_id: message_row.id,
            stream: bridge_rx,
        })
    }

    /// Request cancellation of the active stream for a conversation
    ///
    /// Sets the cross-node stop flag and cancels the local token when the
    /// producer runs on this instance. Returns whether a stream appeared to
    /// be active anywhere. No effect when nothing is streaming: an abort
    /// that lands after completion must not leave a flag behind to poison
    /// the conversation's next message.
    pub async fn abort(&self, owner_id: &str, conv_id: &str) -> Result<bool, ChatError> {
        chat::get_for_owner(&self.pool, conv_id, owner_id)
            .await?
            .ok_or_else(|| ChatError::NotFound {
                what: format!("chat {}", conv_id),
            })?;

        if self.stops.is_active(conv_id) {
            self.stops.request_stop(conv_id).await?;
            return Ok(true);
        }

        // The producer may run on another instance; its liveness is visible
        // through the stream metadata.
        let remote_active = matches!(
            self.events.get_meta::<StreamMeta>(conv_id).await,
            Ok(Some(meta)) if meta.status == StreamStatus::Active
        );
        if !remote_active {
            return Ok(false);
        }

        self.stops.request_stop(conv_id).await?;
        Ok(true)
    }

    /// Attach to a conversation's event stream from a cursor ("0" or absent
    /// means from the beginning)
    pub async fn listen(
        &self,
        owner_id: &str,
        conv_id: &str,
        cursor: Option<String>,
    ) -> Result<BoxStream<'static, StreamEvent>, ChatError> {
        chat::get_for_owner(&self.pool, conv_id, owner_id)
            .await?
            .ok_or_else(|| ChatError::NotFound {
                what: format!("chat {}", conv_id),
            })?;

        Ok(subscriber::subscribe(
            Arc::clone(&self.events),
            conv_id.to_string(),
            cursor,
            self.subscriber_block,
            self.subscriber_read_count,
        )
        .boxed())
    }

    /// One page of terminal messages plus the currently-streaming one
    pub async fn message_page(
        &self,
        owner_id: &str,
        conv_id: &str,
        limit: u32,
        cursor: Option<i64>,
        direction: PageDirection,
    ) -> Result<MessagePage, ChatError> {
        chat::get_for_owner(&self.pool, conv_id, owner_id)
            .await?
            .ok_or_else(|| ChatError::NotFound {
                what: format!("chat {}", conv_id),
            })?;

        let messages = match direction {
            PageDirection::Backward => {
                message::page_older(&self.pool, conv_id, cursor.unwrap_or(i64::MAX), limit).await?
            }
            PageDirection::Forward => {
                message::page_newer(&self.pool, conv_id, cursor.unwrap_or(0), limit).await?
            }
        };

        // The boundary message is the one clients resume from: the last
        // returned row in scan order.
        let sync_date = messages
            .last()
            .and_then(|m| m.finished_at)
            .or(cursor)
            .unwrap_or_else(now_ms);

        let streaming_message = message::current_streaming(&self.pool, conv_id).await?;

        Ok(MessagePage {
            messages,
            sync_date,
            streaming_message,
        })
    }

    /// Resolve the effective model: request override > chat default > owner
    /// default > system fallback. Only an explicit override fails hard on an
    /// unknown id; stale defaults fall through with a warning.
    async fn resolve_model(
        &self,
        requested: Option<&str>,
        chat_default: Option<&str>,
        owner_default: Option<&str>,
    ) -> Result<ModelRow, ChatError> {
        if let Some(model_id) = requested {
            return model::get(&self.pool, Some(&self.cache), model_id)
                .await?
                .ok_or_else(|| ChatError::ModelNotFound {
                    model_id: model_id.to_string(),
                });
        }

        for candidate in [chat_default, owner_default].into_iter().flatten() {
            match model::get(&self.pool, Some(&self.cache), candidate).await? {
                Some(model) => return Ok(model),
                None => {
                    tracing::warn!(model_id = candidate, "Configured default model not in catalog")
                }
            }
        }

        model::get(&self.pool, Some(&self.cache), &self.provider_config.default_model)
            .await?
            .ok_or_else(|| {
                ChatError::internal(format!(
                    "fallback model {} missing from catalog",
                    self.provider_config.default_model
                ))
            })
    }

    /// Pick the API key: owner credentials bypass the free tier; otherwise
    /// the server key is metered per (owner, provider).
    async fn resolve_credentials(
        &self,
        owner_id: &str,
        provider: ProviderKind,
    ) -> Result<String, ChatError> {
        if let Some(cred) = credential::get(&self.pool, owner_id, provider.as_str()).await? {
            return Ok(cred.api_key);
        }

        let server_key = match provider {
            ProviderKind::Anthropic => self.provider_config.anthropic_api_key.clone(),
            ProviderKind::OpenAi => self.provider_config.openai_api_key.clone(),
        }
        .ok_or_else(|| ChatError::AuthMissing {
            provider: provider.to_string(),
        })?;

        let result = self
            .limiter
            .check_free_tier(provider.as_str(), owner_id)
            .await;
        if !result.allowed {
            return Err(ChatError::RateLimited {
                retry_after_secs: result.retry_after_secs.unwrap_or(60),
            });
        }

        Ok(server_key)
    }

    /// Prior terminal exchanges as provider context, oldest first
    ///
    /// Only exchanges with real assistant content are included. Providers
    /// require alternating roles, and a row aborted or failed before its
    /// first delta would otherwise leave a dangling user turn next to the
    /// new prompt.
    async fn load_history(
        &self,
        conv_id: &str,
        exclude_message_id: &str,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let rows = message::recent_history(
            &self.pool,
            conv_id,
            self.provider_config.history_window,
        )
        .await?;

        let mut context = Vec::with_capacity(rows.len() * 2);
        for row in rows {
            if row.id == exclude_message_id {
                continue;
            }
            let Some(agent_content) = row
                .agent_content
                .filter(|content| !content.trim().is_empty())
            else {
                continue;
            };
            context.push(ChatMessage::user(row.user_content));
            context.push(ChatMessage::assistant(agent_content));
        }
        Ok(context)
    }
}

fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= DERIVED_TITLE_MAX_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(DERIVED_TITLE_MAX_CHARS).collect();
        format!("{}…", cut.trim_end())
    }
}

fn producer_tag() -> String {
    format!("pid-{}", std::process::id())
}

/// Everything the detached producer task owns
struct ProducerCtx {
    pool: SqlitePool,
    events: Arc<EventLogService>,
    stops: Arc<StopRegistry>,
    adapter: Arc<dyn ChatProvider>,
    writer: BatchedEventWriter,
    bridge: BridgeSender,
    guard: StopGuard,
    message: MessageRow,
    context: Vec<ChatMessage>,
    params: ChatParams,
}

enum Outcome {
    Completed(Usage),
    Aborted,
    Failed(ProviderError),
}

async fn run_producer(ctx: ProducerCtx) {
    let ProducerCtx {
        pool,
        events,
        stops,
        adapter,
        writer,
        bridge,
        guard,
        message,
        context,
        params,
    } = ctx;
    let conv_id = message.chat_id.clone();
    let started_at = now_ms();

    // A stale flag from a previous lifecycle (abort racing completion on
    // another node) would abort this message on its first chunk.
    stops.clear_flag(&conv_id).await;

    // messageStart is the first event of the lifecycle, on both sinks
    let start_event = StreamEvent::start(&message);
    writer.enqueue(&start_event);
    bridge.emit(start_event);

    let meta = StreamMeta {
        conv_id: conv_id.clone(),
        started_at,
        last_activity: started_at,
        status: StreamStatus::Active,
        producer: Some(producer_tag()),
    };
    if let Err(e) = events.set_meta(&conv_id, &meta).await {
        tracing::warn!(conv_id, error = %e, "Stream meta write failed");
    }

    if let Err(e) = message::mark_streaming(&pool, &message.id).await {
        tracing::warn!(message_id = %message.id, error = %e, "mark_streaming failed");
    }

    let mut accumulated = String::new();
    let token = guard.token();

    let outcome = match adapter.stream_chat(&context, &params).await {
        Err(e) => Outcome::Failed(e),
        Ok(mut stream) => loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => break Outcome::Aborted,

                item = stream.next() => match item {
                    Some(Ok(ProviderEvent::Delta(delta))) => {
                        // Cross-node stop flag, observed at every chunk
                        // boundary; the pending delta is not emitted.
                        if stops.is_stop_requested(&conv_id).await {
                            break Outcome::Aborted;
                        }
                        accumulated.push_str(&delta);
                        let event = StreamEvent::chunk(&conv_id, &message.id, &delta);
                        writer.enqueue(&event);
                        bridge.emit(event);
                    }
                    Some(Ok(ProviderEvent::Done(usage))) => break Outcome::Completed(usage),
                    Some(Err(e)) => break Outcome::Failed(e),
                    None => break Outcome::Failed(ProviderError::Unavailable {
                        message: "provider stream ended without completion".to_string(),
                    }),
                }
            }
        },
    };

    let finished_at = now_ms();
    let (status, usage, caller_error) = match outcome {
        Outcome::Completed(usage) => (MessageStatus::Completed, usage, None),
        Outcome::Aborted => (MessageStatus::Aborted, Usage::default(), None),
        Outcome::Failed(e) => {
            let error: ChatError = e.into();
            (MessageStatus::Failed, Usage::default(), Some(error))
        }
    };
    let error_reason = caller_error.as_ref().map(|e| e.kind().to_string());

    // The DB row is the source of truth for final content. Aborted keeps
    // the accumulated prefix.
    let finalize = message::FinalizeMessage {
        agent_content: Some(accumulated.clone()),
        error_reason: error_reason.clone(),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        latency_ms: Some(finished_at - message.created_at),
    };
    if let Err(e) = message::finalize(&pool, &message.id, status, finished_at, finalize).await {
        tracing::error!(message_id = %message.id, error = %e, "Message finalize failed");
    }

    // The terminal event is emitted even on failure so subscribers close
    // cleanly, and nothing is emitted after it.
    let snapshot = MessageSnapshot {
        id: message.id.clone(),
        conv_id: conv_id.clone(),
        user_content: message.user_content.clone(),
        agent_content: Some(accumulated),
        status,
        created_at: message.created_at,
        finished_at: Some(finished_at),
        error_reason,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        latency_ms: Some(finished_at - message.created_at),
    };
    let complete_event = StreamEvent::complete(snapshot);
    writer.enqueue(&complete_event);
    bridge.emit(complete_event);

    if let Some(error) = caller_error {
        bridge.error(error);
    }

    let meta = StreamMeta {
        conv_id: conv_id.clone(),
        started_at,
        last_activity: finished_at,
        status: StreamStatus::Completed,
        producer: Some(producer_tag()),
    };
    if let Err(e) = events.set_meta(&conv_id, &meta).await {
        tracing::warn!(conv_id, error = %e, "Stream meta write failed");
    }

    writer.close().await;

    if status == MessageStatus::Aborted {
        stops.clear_flag(&conv_id).await;
    }
    drop(guard);

    tracing::debug!(
        conv_id,
        message_id = %message.id,
        status = %status,
        latency_ms = finished_at - message.created_at,
        "Producer finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{CacheBackendType, CacheConfig, RateLimitConfig, StreamBackendType};
    use crate::data::sqlite::SqliteService;
    use crate::domain::providers::mock::MockProvider;

    struct Harness {
        engine: ChatEngine,
        pool: SqlitePool,
        events: Arc<EventLogService>,
        stops: Arc<StopRegistry>,
    }

    async fn harness(provider: MockProvider) -> Harness {
        harness_with(provider, 25, |_| {}).await
    }

    async fn harness_with(
        provider: MockProvider,
        free_tier_requests: u32,
        customize: impl FnOnce(&mut ProviderConfig),
    ) -> Harness {
        let db = SqliteService::init_in_memory().await.unwrap();
        let pool = db.pool().clone();

        let cache = Arc::new(
            CacheService::new(&CacheConfig {
                backend: CacheBackendType::Memory,
                max_entries: 1000,
                redis_url: None,
            })
            .await
            .unwrap(),
        );

        let stream_config = StreamConfig {
            backend: StreamBackendType::Memory,
            redis_url: None,
            event_ttl_secs: 60,
            batch_flush_ms: 20,
            batch_max_events: 100,
            subscriber_block_secs: 1,
            subscriber_read_count: 500,
            stop_flag_ttl_secs: 300,
        };
        let events = Arc::new(EventLogService::new(&stream_config).await.unwrap());

        let stops = Arc::new(StopRegistry::new(
            Arc::clone(&cache),
            Duration::from_secs(300),
        ));
        let limiter = Arc::new(RateLimiter::new(
            Arc::clone(&cache),
            &RateLimitConfig {
                free_tier_requests,
                free_tier_window_secs: 60,
            },
        ));

        let providers = Arc::new(ProviderRegistry::empty().with_adapter(Arc::new(provider)));

        let mut provider_config = ProviderConfig {
            anthropic_api_key: Some("sk-server".to_string()),
            openai_api_key: None,
            anthropic_base_url: "http://unused".to_string(),
            openai_base_url: "http://unused".to_string(),
            default_model: "claude-3-5-haiku-latest".to_string(),
            max_output_tokens: 256,
            history_window: 20,
        };
        customize(&mut provider_config);

        let engine = ChatEngine::new(
            pool.clone(),
            cache,
            Arc::clone(&events),
            Arc::clone(&stops),
            limiter,
            providers,
            provider_config,
            &stream_config,
        );

        Harness {
            engine,
            pool,
            events,
            stops,
        }
    }

    async fn collect_events(stream: BridgeStream) -> (Vec<StreamEvent>, Vec<ChatError>) {
        let items: Vec<_> = stream.collect().await;
        let mut events = Vec::new();
        let mut errors = Vec::new();
        for item in items {
            match item {
                Ok(event) => events.push(event),
                Err(error) => errors.push(error),
            }
        }
        (events, errors)
    }

    async fn wait_for_terminal(pool: &SqlitePool, conv_id: &str) -> MessageRow {
        for _ in 0..100 {
            let page = message::page_older(pool, conv_id, i64::MAX, 1).await.unwrap();
            if let Some(row) = page.into_iter().next() {
                return row;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("message never reached a terminal state");
    }

    async fn log_events(events: &EventLogService, conv_id: &str) -> Vec<StreamEvent> {
        events
            .range_from::<StreamEvent>(conv_id, "0", 1000, Duration::ZERO)
            .await
            .into_iter()
            .map(|(_, e)| e)
            .collect()
    }

    #[tokio::test]
    async fn test_happy_path_event_sequence_and_row() {
        let h = harness(MockProvider::completing(&["Hel", "lo", " world"])).await;

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let conv_id = send.conv_id.clone();

        let (events, errors) = collect_events(send.stream).await;
        assert!(errors.is_empty());
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], StreamEvent::MessageStart { .. }));
        for (i, chunk) in ["Hel", "lo", " world"].iter().enumerate() {
            assert!(matches!(
                &events[i + 1],
                StreamEvent::AgentChunk { chunk: c, .. } if c == chunk
            ));
        }
        let StreamEvent::MessageComplete { message, .. } = &events[4] else {
            panic!("last event must be messageComplete");
        };
        assert_eq!(message.agent_content.as_deref(), Some("Hello world"));
        assert_eq!(message.status, MessageStatus::Completed);
        assert!(message.finished_at.unwrap() >= message.created_at);

        let row = wait_for_terminal(&h.pool, &conv_id).await;
        assert_eq!(row.status, MessageStatus::Completed);
        assert_eq!(row.agent_content.as_deref(), Some("Hello world"));
        assert_eq!(row.output_tokens, Some(3));

        // Durable log converges on the same sequence
        let logged = log_events(&h.events, &conv_id).await;
        assert_eq!(logged, events);
    }

    #[tokio::test]
    async fn test_client_disconnect_does_not_stop_persistence() {
        let provider = MockProvider::completing(&["Hel", "lo", " world"])
            .with_item_delay(Duration::from_millis(15));
        let h = harness(provider).await;

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let conv_id = send.conv_id.clone();

        // Read the start event and the first chunk, then drop the client
        let mut stream = send.stream;
        let _start = stream.next().await.unwrap().unwrap();
        let _first_chunk = stream.next().await.unwrap().unwrap();
        drop(stream);

        let row = wait_for_terminal(&h.pool, &conv_id).await;
        assert_eq!(row.status, MessageStatus::Completed);
        assert_eq!(row.agent_content.as_deref(), Some("Hello world"));

        let logged = log_events(&h.events, &conv_id).await;
        let chunks: Vec<_> = logged
            .iter()
            .filter(|e| matches!(e, StreamEvent::AgentChunk { .. }))
            .collect();
        assert_eq!(chunks.len(), 3, "all chunks reach the log after disconnect");
        assert!(logged.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_abort_keeps_partial_content() {
        let provider = MockProvider::completing(&["a", "b", "c", "d", "e", "f", "g", "h"])
            .with_item_delay(Duration::from_millis(25));
        let h = harness(provider).await;

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let conv_id = send.conv_id.clone();

        let mut stream = send.stream;
        let _start = stream.next().await.unwrap().unwrap();
        let _first_chunk = stream.next().await.unwrap().unwrap();

        assert!(h.engine.abort("u1", &conv_id).await.unwrap());

        let (events, errors) = collect_events(stream).await;
        assert!(errors.is_empty());
        let StreamEvent::MessageComplete { message, .. } = events.last().unwrap() else {
            panic!("stream must end with messageComplete");
        };
        assert_eq!(message.status, MessageStatus::Aborted);

        let row = wait_for_terminal(&h.pool, &conv_id).await;
        assert_eq!(row.status, MessageStatus::Aborted);
        // Content equals the emitted prefix; the first chunk ("a") was
        // consumed before collect()
        let emitted: String = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::AgentChunk { chunk, .. } => Some(chunk.as_str()),
                _ => None,
            })
            .collect();
        let full = format!("a{}", emitted);
        assert_eq!(row.agent_content.as_deref(), Some(full.as_str()));
        assert!(full.len() < 8, "abort must land before the provider finishes");
    }

    #[tokio::test]
    async fn test_provider_error_emits_failed_terminal() {
        let provider = MockProvider::failing_after(
            &["a", "b"],
            ProviderError::from_status(401, "invalid key"),
        );
        let h = harness(provider).await;

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let conv_id = send.conv_id.clone();

        let (events, errors) = collect_events(send.stream).await;

        // Terminal event still closes the stream for subscribers
        let StreamEvent::MessageComplete { message, .. } = events.last().unwrap() else {
            panic!("stream must end with messageComplete");
        };
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.error_reason.as_deref(), Some("AuthInvalid"));
        assert_eq!(message.agent_content.as_deref(), Some("ab"));

        // The originating caller additionally receives the classified error
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind(), "AuthInvalid");

        let row = wait_for_terminal(&h.pool, &conv_id).await;
        assert_eq!(row.status, MessageStatus::Failed);
        assert_eq!(row.error_reason.as_deref(), Some("AuthInvalid"));

        let logged = log_events(&h.events, &conv_id).await;
        assert!(logged.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_second_send_conflicts_while_streaming() {
        let provider = MockProvider::completing(&["a", "b", "c", "d"])
            .with_item_delay(Duration::from_millis(30));
        let h = harness(provider).await;

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();

        let second = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: Some(send.conv_id.clone()),
                    content: "again".to_string(),
                    model_id: None,
                },
            )
            .await;
        assert!(matches!(second, Err(ChatError::Conflict { .. })));

        // Drain so the task finishes cleanly
        let _ = collect_events(send.stream).await;
    }

    #[tokio::test]
    async fn test_free_tier_rate_limit_creates_no_row() {
        let h = harness_with(MockProvider::completing(&["x"]), 1, |_| {}).await;

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "first".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let conv_id = send.conv_id.clone();
        let _ = collect_events(send.stream).await;
        wait_for_terminal(&h.pool, &conv_id).await;

        let second = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: Some(conv_id.clone()),
                    content: "second".to_string(),
                    model_id: None,
                },
            )
            .await;
        let Err(ChatError::RateLimited { retry_after_secs }) = second else {
            panic!("second request must be rate limited");
        };
        assert!((1..=60).contains(&retry_after_secs));

        // No second message row was created
        let rows = message::page_older(&h.pool, &conv_id, i64::MAX, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(
            message::current_streaming(&h.pool, &conv_id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_owner_credentials_bypass_free_tier() {
        let h = harness_with(MockProvider::completing(&["x"]), 0, |_| {}).await;
        owner::get_or_create(&h.pool, "u1").await.unwrap();
        credential::upsert(&h.pool, "u1", "anthropic", "sk-own").await.unwrap();

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await;
        assert!(send.is_ok());
        let _ = collect_events(send.unwrap().stream).await;
    }

    #[tokio::test]
    async fn test_auth_missing_without_any_key() {
        let h = harness_with(MockProvider::completing(&["x"]), 25, |config| {
            config.anthropic_api_key = None;
        })
        .await;

        let result = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await;
        assert!(matches!(result, Err(ChatError::AuthMissing { .. })));
    }

    #[tokio::test]
    async fn test_unknown_requested_model_fails_before_any_state_change() {
        let h = harness(MockProvider::completing(&["x"])).await;

        let result = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: Some("not-a-model".to_string()),
                },
            )
            .await;
        assert!(matches!(result, Err(ChatError::ModelNotFound { .. })));
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_full_history() {
        let h = harness(MockProvider::completing(&["Hel", "lo"])).await;

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let conv_id = send.conv_id.clone();
        let (live_events, _) = collect_events(send.stream).await;
        wait_for_terminal(&h.pool, &conv_id).await;

        // Writer flushes are asynchronous; wait for the terminal event to land
        for _ in 0..100 {
            if log_events(&h.events, &conv_id)
                .await
                .last()
                .is_some_and(StreamEvent::is_terminal)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let replayed: Vec<StreamEvent> = h
            .engine
            .listen("u1", &conv_id, None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(replayed, live_events);
    }

    #[tokio::test]
    async fn test_abort_after_completion_is_noop() {
        let h = harness(MockProvider::completing(&["done"])).await;

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let conv_id = send.conv_id.clone();
        let _ = collect_events(send.stream).await;
        wait_for_terminal(&h.pool, &conv_id).await;

        // Stream already finished: abort reports inactive and leaves no
        // flag behind
        assert!(!h.engine.abort("u1", &conv_id).await.unwrap());
        assert!(!h.stops.is_stop_requested(&conv_id).await);

        // The next message on the conversation streams to completion
        let second = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: Some(conv_id.clone()),
                    content: "again".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let (events, errors) = collect_events(second.stream).await;
        assert!(errors.is_empty());
        let StreamEvent::MessageComplete { message, .. } = events.last().unwrap() else {
            panic!("stream must end with messageComplete");
        };
        assert_eq!(message.status, MessageStatus::Completed);
    }

    #[tokio::test]
    async fn test_stale_stop_flag_cleared_on_new_producer() {
        let h = harness(MockProvider::completing(&["Hel", "lo"])).await;
        owner::get_or_create(&h.pool, "u1").await.unwrap();
        let chat_row = chat::create(&h.pool, "u1", None, None).await.unwrap();

        // Flag left over from another lifecycle, with no producer around to
        // observe or clear it
        h.stops.request_stop(&chat_row.id).await.unwrap();
        assert!(h.stops.is_stop_requested(&chat_row.id).await);

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: Some(chat_row.id.clone()),
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let (events, errors) = collect_events(send.stream).await;
        assert!(errors.is_empty());
        let StreamEvent::MessageComplete { message, .. } = events.last().unwrap() else {
            panic!("stream must end with messageComplete");
        };
        assert_eq!(message.status, MessageStatus::Completed);
        assert_eq!(message.agent_content.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_history_skips_exchanges_without_assistant_content() {
        let provider = MockProvider::completing(&["ok"]);
        let seen = provider.seen_messages();
        let h = harness(provider).await;

        owner::get_or_create(&h.pool, "u1").await.unwrap();
        let chat_row = chat::create(&h.pool, "u1", None, None).await.unwrap();

        // One real exchange, then one aborted before any content arrived
        let answered = message::create_initial(&h.pool, &chat_row.id, "answered question")
            .await
            .unwrap();
        message::finalize(
            &h.pool,
            &answered.id,
            MessageStatus::Completed,
            now_ms(),
            message::FinalizeMessage {
                agent_content: Some("an answer".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let aborted = message::create_initial(&h.pool, &chat_row.id, "aborted question")
            .await
            .unwrap();
        message::finalize(
            &h.pool,
            &aborted.id,
            MessageStatus::Aborted,
            now_ms(),
            message::FinalizeMessage {
                agent_content: Some(String::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: Some(chat_row.id.clone()),
                    content: "next question".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let _ = collect_events(send.stream).await;

        // The empty-aborted exchange is dropped entirely; no dangling user
        // turn reaches the provider and roles alternate.
        let context = seen.lock().clone();
        assert_eq!(context.len(), 3);
        assert_eq!(context[0].content, "answered question");
        assert_eq!(context[1].content, "an answer");
        assert_eq!(context[2].content, "next question");
        for pair in context.windows(2) {
            assert_ne!(pair[0].role, pair[1].role, "roles must alternate");
        }
    }

    #[tokio::test]
    async fn test_abort_on_unknown_chat_is_not_found() {
        let h = harness(MockProvider::completing(&["x"])).await;
        assert!(matches!(
            h.engine.abort("u1", "missing").await,
            Err(ChatError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_exactly_one_start_and_complete_per_lifecycle() {
        let h = harness(MockProvider::completing(&["a", "b"])).await;

        let send = h
            .engine
            .send_with_stream(
                "u1",
                SendRequest {
                    conv_id: None,
                    content: "hi".to_string(),
                    model_id: None,
                },
            )
            .await
            .unwrap();
        let (events, _) = collect_events(send.stream).await;

        let starts = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::MessageStart { .. }))
            .count();
        let completes = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::MessageComplete { .. }))
            .count();
        assert_eq!(starts, 1);
        assert_eq!(completes, 1);
        assert!(events.last().unwrap().is_terminal());
    }

    #[test]
    fn test_derive_title_truncates() {
        assert_eq!(derive_title("short prompt"), "short prompt");
        let long = "x".repeat(200);
        let title = derive_title(&long);
        assert!(title.chars().count() <= DERIVED_TITLE_MAX_CHARS + 1);
        assert!(title.ends_with('…'));
    }
}
