//! Provider error taxonomy
//!
//! Transport and API failures from every upstream provider are classified
//! into one shared set of kinds, keyed off status-code hints.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    #[error("Provider rejected credentials: {message}")]
    AuthInvalid { message: String },

    #[error("Provider rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Provider quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("Model not found: {message}")]
    ModelNotFound { message: String },

    #[error("Provider unavailable: {message}")]
    Unavailable { message: String },

    #[error("Provider internal error: {message}")]
    Internal { message: String },
}

impl ProviderError {
    /// Classify an HTTP status into the error taxonomy
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };

        match status {
            401 | 403 => ProviderError::AuthInvalid { message },
            402 => ProviderError::QuotaExceeded { message },
            404 => ProviderError::ModelNotFound { message },
            429 => ProviderError::RateLimited {
                message,
                retry_after_secs: None,
            },
            s if s >= 500 => ProviderError::Unavailable { message },
            _ => ProviderError::Internal { message },
        }
    }

    /// Short kind name used as the persisted error reason
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::AuthInvalid { .. } => "AuthInvalid",
            ProviderError::RateLimited { .. } => "RateLimited",
            ProviderError::QuotaExceeded { .. } => "QuotaExceeded",
            ProviderError::ModelNotFound { .. } => "ModelNotFound",
            ProviderError::Unavailable { .. } => "ProviderUnavailable",
            ProviderError::Internal { .. } => "Internal",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // Timeouts and connection failures are transient; everything else is
        // a bug on our side of the request
        if e.is_timeout() || e.is_connect() || e.is_request() {
            ProviderError::Unavailable {
                message: e.to_string(),
            }
        } else {
            ProviderError::Internal {
                message: e.to_string(),
            }
        }
    }
}
