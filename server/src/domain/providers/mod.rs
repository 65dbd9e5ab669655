//! Provider adapters
//!
//! A uniform lazy-stream interface over the upstream model APIs. Each
//! adapter turns a chat request into a stream of text deltas and a terminal
//! completion, and maps provider failures into one error taxonomy.

pub mod anthropic;
mod error;
#[cfg(test)]
pub mod mock;
pub mod openai;
pub(crate) mod sse;

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

pub use error::ProviderError;

use crate::core::config::ProviderConfig;
use crate::core::constants::PROVIDER_CONNECT_TIMEOUT_SECS;

/// Supported upstream providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" => Ok(ProviderKind::OpenAi),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

/// Role of a chat message sent to a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of provider context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-request provider parameters
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model_id: String,
    pub api_key: String,
    pub max_output_tokens: u32,
}

/// Token usage reported by the provider, when available
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

/// One element of a provider stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// A text delta, in delivery order
    Delta(String),
    /// Terminal completion; no deltas follow
    Done(Usage),
}

/// Lazy stream of provider events
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

/// A streamed token source over one upstream model API
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Open a token stream for the given context. Pre-stream failures (bad
    /// credentials, unknown model, provider down) surface as an error here;
    /// mid-stream failures surface as `Err` items on the stream.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<ProviderStream, ProviderError>;

    fn kind(&self) -> ProviderKind;
}

/// Drop messages with empty content before sending to a provider
pub fn filter_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    messages
        .into_iter()
        .filter(|m| !m.content.trim().is_empty())
        .collect()
}

/// Dispatch table from provider kind to adapter
///
/// Built once at startup from configuration; tests swap in scripted
/// adapters through `with_adapter`.
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ChatProvider>>,
}

impl ProviderRegistry {
    /// Build the registry with the real HTTP adapters
    pub fn new(config: &ProviderConfig) -> Self {
        // Connect timeout only: SSE streams run for minutes, so no total
        // request timeout.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECS))
            .build()
            .expect("build provider HTTP client");

        let mut adapters: HashMap<ProviderKind, Arc<dyn ChatProvider>> = HashMap::new();
        adapters.insert(
            ProviderKind::Anthropic,
            Arc::new(anthropic::AnthropicProvider::new(
                client.clone(),
                config.anthropic_base_url.clone(),
            )),
        );
        adapters.insert(
            ProviderKind::OpenAi,
            Arc::new(openai::OpenAiProvider::new(
                client,
                config.openai_base_url.clone(),
            )),
        );

        Self { adapters }
    }

    /// Empty registry for tests
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Register or replace an adapter
    pub fn with_adapter(mut self, adapter: Arc<dyn ChatProvider>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    /// Look up the adapter for a provider
    pub fn adapter(&self, kind: ProviderKind) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| ProviderError::Internal {
                message: format!("no adapter registered for provider {}", kind),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_roundtrip() {
        assert_eq!("anthropic".parse(), Ok(ProviderKind::Anthropic));
        assert_eq!("openai".parse(), Ok(ProviderKind::OpenAi));
        assert!("bedrock".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Anthropic.as_str(), "anthropic");
    }

    #[test]
    fn test_filter_messages_drops_empty_content() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant(""),
            ChatMessage::assistant("   "),
            ChatMessage::user("there"),
        ];

        let filtered = filter_messages(messages);
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].content, "hi");
        assert_eq!(filtered[1].content, "there");
    }

    #[tokio::test]
    async fn test_registry_dispatch() {
        let registry = ProviderRegistry::empty()
            .with_adapter(Arc::new(mock::MockProvider::completing(&["x"])));

        assert!(registry.adapter(ProviderKind::Anthropic).is_ok());
        assert!(matches!(
            registry.adapter(ProviderKind::OpenAi),
            Err(ProviderError::Internal { .. })
        ));
    }
}
