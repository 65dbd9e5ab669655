//! Shared API types
//!
//! Common error envelope and request validation helpers used across all
//! endpoints.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use validator::ValidationError;

use crate::core::constants::MAX_MESSAGE_PAGE_LIMIT;
use crate::domain::chat::ChatError;

/// Validator function for page limit parameters
pub fn validate_limit(limit: u32) -> Result<(), ValidationError> {
    if limit == 0 || limit > MAX_MESSAGE_PAGE_LIMIT {
        return Err(ValidationError::new("limit_range").with_message(
            format!("Limit must be between 1 and {}", MAX_MESSAGE_PAGE_LIMIT).into(),
        ));
    }
    Ok(())
}

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    Unauthorized { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    TooManyRequests { message: String, retry_after_secs: u64 },
    ServiceUnavailable { message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        let code = e.kind().to_string();
        match e {
            ChatError::AuthMissing { .. } | ChatError::AuthInvalid { .. } => Self::Unauthorized {
                code,
                message: e.to_string(),
            },
            ChatError::RateLimited { retry_after_secs } => Self::TooManyRequests {
                message: e.to_string(),
                retry_after_secs,
            },
            ChatError::ModelNotFound { .. } | ChatError::NotFound { .. } => Self::NotFound {
                code,
                message: e.to_string(),
            },
            ChatError::Conflict { .. } => Self::Conflict {
                code,
                message: e.to_string(),
            },
            ChatError::QuotaExceeded { .. } | ChatError::ProviderUnavailable { .. } => {
                Self::ServiceUnavailable {
                    message: e.to_string(),
                }
            }
            ChatError::Aborted => Self::Conflict {
                code,
                message: e.to_string(),
            },
            ChatError::Internal { .. } => {
                tracing::error!(error = %e, "Internal error");
                Self::internal("internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message, retry_after) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message, None)
            }
            Self::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, "unauthorized", code, message, None)
            }
            Self::NotFound { code, message } => {
                (StatusCode::NOT_FOUND, "not_found", code, message, None)
            }
            Self::Conflict { code, message } => {
                (StatusCode::CONFLICT, "conflict", code, message, None)
            }
            Self::TooManyRequests {
                message,
                retry_after_secs,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "RateLimited".to_string(),
                message,
                Some(retry_after_secs),
            ),
            Self::ServiceUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "SERVICE_UNAVAILABLE".to_string(),
                message,
                None,
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "INTERNAL".to_string(),
                message,
                None,
            ),
        };

        let mut body = serde_json::json!({
            "error": error_type,
            "code": code,
            "message": message,
        });
        if let Some(retry_after_secs) = retry_after {
            body["retryAfterSeconds"] = retry_after_secs.into();
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(retry_after_secs) = retry_after
            && let Ok(value) =
                axum::http::HeaderValue::from_str(&retry_after_secs.to_string())
        {
            response.headers_mut().insert("retry-after", value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_limit() {
        assert!(validate_limit(1).is_ok());
        assert!(validate_limit(MAX_MESSAGE_PAGE_LIMIT).is_ok());
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(MAX_MESSAGE_PAGE_LIMIT + 1).is_err());
    }

    #[test]
    fn test_rate_limited_mapping_keeps_retry_hint() {
        let api: ApiError = ChatError::RateLimited {
            retry_after_secs: 42,
        }
        .into();
        match api {
            ApiError::TooManyRequests {
                retry_after_secs, ..
            } => assert_eq!(retry_after_secs, 42),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn test_conflict_mapping() {
        let api: ApiError = ChatError::Conflict {
            message: "busy".to_string(),
        }
        .into();
        assert!(matches!(api, ApiError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_response_has_retry_after_header() {
        let response = ApiError::TooManyRequests {
            message: "slow down".to_string(),
            retry_after_secs: 9,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("retry-after").unwrap(),
            "9"
        );
    }
}
