//! Request extractors
//!
//! Owner identity arrives in the `x-owner-id` header, populated by the
//! authenticating proxy in front of this service. Session handling itself
//! lives outside the core.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::types::ApiError;

/// Header carrying the authenticated owner id
pub const OWNER_ID_HEADER: &str = "x-owner-id";

/// Authenticated owner context for a request
#[derive(Debug, Clone)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner_id = parts
            .headers
            .get(OWNER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ApiError::unauthorized("MISSING_OWNER", "x-owner-id header required")
            })?;

        Ok(OwnerId(owner_id.to_string()))
    }
}
