//! Chat streaming domain
//!
//! The resumable streaming pipeline: producer, subscriber, client bridge,
//! stop registry, and the stream event wire types.

pub mod bridge;
pub mod error;
pub mod events;
pub mod producer;
pub mod stop;
pub mod subscriber;

pub use error::ChatError;
pub use events::{MessageSnapshot, StreamEvent, StreamMeta, StreamStatus};
pub use producer::{ChatEngine, MessagePage, PageDirection, SendRequest, SendStream};
pub use stop::StopRegistry;
