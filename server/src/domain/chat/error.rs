//! Chat engine error taxonomy
//!
//! Pre-stream errors return synchronously to the caller and leave no trace
//! in the event log. Mid-stream errors finalize the message row and emit a
//! terminal `messageComplete` so subscribers close cleanly.

use thiserror::Error;

use super::super::providers::ProviderError;
use crate::data::cache::CacheError;
use crate::data::events::EventLogError;
use crate::data::sqlite::SqliteError;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("No credentials available for provider {provider}")]
    AuthMissing { provider: String },

    #[error("Provider rejected credentials: {message}")]
    AuthInvalid { message: String },

    #[error("Rate limited, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Provider quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("Model not found: {model_id}")]
    ModelNotFound { model_id: String },

    #[error("Provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Stream aborted")]
    Aborted,

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ChatError {
    /// Short kind name, persisted as the message `error_reason` and sent in
    /// error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::AuthMissing { .. } => "AuthMissing",
            ChatError::AuthInvalid { .. } => "AuthInvalid",
            ChatError::RateLimited { .. } => "RateLimited",
            ChatError::QuotaExceeded { .. } => "QuotaExceeded",
            ChatError::ModelNotFound { .. } => "ModelNotFound",
            ChatError::ProviderUnavailable { .. } => "ProviderUnavailable",
            ChatError::Conflict { .. } => "Conflict",
            ChatError::Aborted => "Aborted",
            ChatError::NotFound { .. } => "NotFound",
            ChatError::Internal { .. } => "Internal",
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ChatError::Internal {
            message: message.into(),
        }
    }
}

impl From<ProviderError> for ChatError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::AuthInvalid { message } => ChatError::AuthInvalid { message },
            ProviderError::RateLimited {
                retry_after_secs, ..
            } => ChatError::RateLimited {
                retry_after_secs: retry_after_secs.unwrap_or(60),
            },
            ProviderError::QuotaExceeded { message } => ChatError::QuotaExceeded { message },
            ProviderError::ModelNotFound { message } => ChatError::ModelNotFound {
                model_id: message,
            },
            ProviderError::Unavailable { message } => ChatError::ProviderUnavailable { message },
            ProviderError::Internal { message } => ChatError::Internal { message },
        }
    }
}

impl From<SqliteError> for ChatError {
    fn from(e: SqliteError) -> Self {
        match e {
            SqliteError::Conflict(message) => ChatError::Conflict { message },
            other => {
                tracing::error!(error = %other, "Database error in chat engine");
                ChatError::internal("database operation failed")
            }
        }
    }
}

impl From<EventLogError> for ChatError {
    fn from(e: EventLogError) -> Self {
        tracing::error!(error = %e, "Event log error in chat engine");
        ChatError::internal("event log operation failed")
    }
}

impl From<CacheError> for ChatError {
    fn from(e: CacheError) -> Self {
        tracing::error!(error = %e, "Cache error in chat engine");
        ChatError::internal("cache operation failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_match_taxonomy() {
        assert_eq!(
            ChatError::AuthMissing {
                provider: "anthropic".into()
            }
            .kind(),
            "AuthMissing"
        );
        assert_eq!(
            ChatError::RateLimited {
                retry_after_secs: 5
            }
            .kind(),
            "RateLimited"
        );
        assert_eq!(ChatError::Aborted.kind(), "Aborted");
    }

    #[test]
    fn test_provider_error_mapping() {
        let err: ChatError = ProviderError::from_status(401, "bad key").into();
        assert_eq!(err.kind(), "AuthInvalid");

        let err: ChatError = ProviderError::from_status(503, "").into();
        assert_eq!(err.kind(), "ProviderUnavailable");
    }

    #[test]
    fn test_sqlite_conflict_maps_to_conflict() {
        let err: ChatError = SqliteError::Conflict("active message".into()).into();
        assert_eq!(err.kind(), "Conflict");
    }
}
