//! Row types shared across the data layer

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Message lifecycle status
///
/// `Started` and `Streaming` are the non-terminal states; a conversation has
/// at most one message in a non-terminal state at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    Started,
    Streaming,
    Completed,
    Aborted,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Started => "Started",
            MessageStatus::Streaming => "Streaming",
            MessageStatus::Completed => "Completed",
            MessageStatus::Aborted => "Aborted",
            MessageStatus::Failed => "Failed",
        }
    }

    /// Terminal states set `finished_at` and freeze the row
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Aborted | MessageStatus::Failed
        )
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Started" => Ok(MessageStatus::Started),
            "Streaming" => Ok(MessageStatus::Streaming),
            "Completed" => Ok(MessageStatus::Completed),
            "Aborted" => Ok(MessageStatus::Aborted),
            "Failed" => Ok(MessageStatus::Failed),
            other => Err(format!("Unknown message status: {}", other)),
        }
    }
}

/// A conversation thread owned by a principal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRow {
    pub id: String,
    pub owner_id: String,
    pub title: Option<String>,
    pub default_model_id: Option<String>,
    pub deleted: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One exchange: user prompt plus assistant response with lifecycle status.
/// Timestamps are unix milliseconds; `finished_at` is set iff the status is
/// terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub user_content: String,
    pub agent_content: Option<String>,
    pub status: MessageStatus,
    pub error_reason: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub latency_ms: Option<i64>,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}

/// A model catalog entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRow {
    pub id: String,
    pub provider: String,
    pub display_name: String,
}

/// Provider credentials supplied by an owner (bypasses the free tier)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRow {
    pub owner_id: String,
    pub provider: String,
    pub api_key: String,
    pub created_at: i64,
}

/// An owning principal; rows are created lazily on first use
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRow {
    pub id: String,
    pub default_model_id: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            MessageStatus::Started,
            MessageStatus::Streaming,
            MessageStatus::Completed,
            MessageStatus::Aborted,
            MessageStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<MessageStatus>(), Ok(status));
        }
        assert!("Pending".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!MessageStatus::Started.is_terminal());
        assert!(!MessageStatus::Streaming.is_terminal());
        assert!(MessageStatus::Completed.is_terminal());
        assert!(MessageStatus::Aborted.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serializes_to_bare_name() {
        let json = serde_json::to_string(&MessageStatus::Aborted).unwrap();
        assert_eq!(json, "\"Aborted\"");
    }
}
