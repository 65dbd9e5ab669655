//! Domain logic: the chat streaming engine and provider adapters

pub mod chat;
pub mod providers;

pub use chat::{ChatEngine, ChatError, StopRegistry, StreamEvent};
pub use providers::{ProviderKind, ProviderRegistry};
