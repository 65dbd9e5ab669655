//! Scriptable provider for tests

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{
    ChatMessage, ChatParams, ChatProvider, ProviderError, ProviderEvent, ProviderKind,
    ProviderStream, Usage,
};

/// A provider that plays back a fixed script of stream items
pub struct MockProvider {
    kind: ProviderKind,
    script: Vec<Result<ProviderEvent, ProviderError>>,
    /// Delay before each item, to let tests interleave aborts
    item_delay: Duration,
    /// Error returned before the stream opens, if set
    connect_error: Option<ProviderError>,
    /// Messages received by the last stream_chat call
    seen_messages: Arc<Mutex<Vec<ChatMessage>>>,
}

impl MockProvider {
    /// Stream the given deltas, then a clean completion
    pub fn completing(deltas: &[&str]) -> Self {
        let mut script: Vec<Result<ProviderEvent, ProviderError>> = deltas
            .iter()
            .map(|d| Ok(ProviderEvent::Delta(d.to_string())))
            .collect();
        script.push(Ok(ProviderEvent::Done(Usage {
            input_tokens: Some(10),
            output_tokens: Some(deltas.len() as i64),
        })));
        Self {
            kind: ProviderKind::Anthropic,
            script,
            item_delay: Duration::ZERO,
            connect_error: None,
            seen_messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Stream the given deltas, then fail mid-stream with `error`
    pub fn failing_after(deltas: &[&str], error: ProviderError) -> Self {
        let mut script: Vec<Result<ProviderEvent, ProviderError>> = deltas
            .iter()
            .map(|d| Ok(ProviderEvent::Delta(d.to_string())))
            .collect();
        script.push(Err(error));
        Self {
            kind: ProviderKind::Anthropic,
            script,
            item_delay: Duration::ZERO,
            connect_error: None,
            seen_messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail before the stream opens
    pub fn refusing(error: ProviderError) -> Self {
        Self {
            kind: ProviderKind::Anthropic,
            script: Vec::new(),
            item_delay: Duration::ZERO,
            connect_error: Some(error),
            seen_messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Sleep before each item so tests can interleave stops/disconnects
    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn with_kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    /// Handle to the messages the adapter was called with
    pub fn seen_messages(&self) -> Arc<Mutex<Vec<ChatMessage>>> {
        Arc::clone(&self.seen_messages)
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _params: &ChatParams,
    ) -> Result<ProviderStream, ProviderError> {
        *self.seen_messages.lock() = messages.to_vec();

        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }

        let script = self.script.clone();
        let delay = self.item_delay;
        let stream = stream! {
            for item in script {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield item;
            }
        };

        Ok(Box::pin(stream))
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn params() -> ChatParams {
        ChatParams {
            model_id: "m".to_string(),
            api_key: "k".to_string(),
            max_output_tokens: 16,
        }
    }

    #[tokio::test]
    async fn test_completing_script() {
        let provider = MockProvider::completing(&["a", "b"]);
        let mut stream = provider
            .stream_chat(&[ChatMessage::user("hi")], &params())
            .await
            .unwrap();

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            ProviderEvent::Delta("a".to_string())
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            ProviderEvent::Delta("b".to_string())
        );
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            ProviderEvent::Done(_)
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_refusing_fails_before_stream() {
        let provider = MockProvider::refusing(ProviderError::AuthInvalid {
            message: "nope".to_string(),
        });
        assert!(provider.stream_chat(&[], &params()).await.is_err());
    }

    #[tokio::test]
    async fn test_records_seen_messages() {
        let provider = MockProvider::completing(&[]);
        let seen = provider.seen_messages();

        provider
            .stream_chat(&[ChatMessage::user("hello")], &params())
            .await
            .unwrap();

        assert_eq!(seen.lock().len(), 1);
    }
}
