//! Stream event wire types
//!
//! These shapes are the wire format: serialized as JSON into the event log
//! and relayed verbatim to SSE clients, so field names are camelCase and
//! stable across instances.

use serde::{Deserialize, Serialize};

use crate::data::types::{MessageRow, MessageStatus};

/// Snapshot of a message row carried by start/complete events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    pub id: String,
    pub conv_id: String,
    pub user_content: String,
    pub agent_content: Option<String>,
    pub status: MessageStatus,
    pub created_at: i64,
    pub finished_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
}

impl MessageSnapshot {
    pub fn from_row(row: &MessageRow) -> Self {
        Self {
            id: row.id.clone(),
            conv_id: row.chat_id.clone(),
            user_content: row.user_content.clone(),
            agent_content: row.agent_content.clone(),
            status: row.status,
            created_at: row.created_at,
            finished_at: row.finished_at,
            error_reason: row.error_reason.clone(),
            input_tokens: row.input_tokens,
            output_tokens: row.output_tokens,
            latency_ms: row.latency_ms,
        }
    }
}

/// One entry in a conversation's event log
///
/// Per message lifecycle: exactly one `messageStart`, zero or more
/// `agentChunk`s in provider delivery order, exactly one `messageComplete`.
/// Nothing is emitted after `messageComplete`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "messageStart", rename_all = "camelCase")]
    MessageStart {
        message: MessageSnapshot,
        conv_id: String,
    },
    #[serde(rename = "agentChunk", rename_all = "camelCase")]
    AgentChunk {
        message_id: String,
        chunk: String,
        conv_id: String,
    },
    #[serde(rename = "messageComplete", rename_all = "camelCase")]
    MessageComplete {
        message: MessageSnapshot,
        conv_id: String,
    },
}

impl StreamEvent {
    pub fn start(row: &MessageRow) -> Self {
        StreamEvent::MessageStart {
            message: MessageSnapshot::from_row(row),
            conv_id: row.chat_id.clone(),
        }
    }

    pub fn chunk(conv_id: &str, message_id: &str, delta: &str) -> Self {
        StreamEvent::AgentChunk {
            message_id: message_id.to_string(),
            chunk: delta.to_string(),
            conv_id: conv_id.to_string(),
        }
    }

    pub fn complete(snapshot: MessageSnapshot) -> Self {
        let conv_id = snapshot.conv_id.clone();
        StreamEvent::MessageComplete {
            message: snapshot,
            conv_id,
        }
    }

    pub fn conv_id(&self) -> &str {
        match self {
            StreamEvent::MessageStart { conv_id, .. }
            | StreamEvent::AgentChunk { conv_id, .. }
            | StreamEvent::MessageComplete { conv_id, .. } => conv_id,
        }
    }

    /// SSE event name on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "messageStart",
            StreamEvent::AgentChunk { .. } => "agentChunk",
            StreamEvent::MessageComplete { .. } => "messageComplete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::MessageComplete { .. })
    }
}

/// Stream lifecycle status in the metadata record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Active,
    Completed,
}

/// Per-conversation stream metadata
///
/// Created lazily with the first event; shares the TTL horizon with the
/// entries. Written only by the producer, read by anyone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMeta {
    pub conv_id: String,
    pub started_at: i64,
    pub last_activity: i64,
    pub status: StreamStatus,
    /// Opaque producer context (host/pid of the producing instance)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
}
