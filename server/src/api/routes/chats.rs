//! Chat and streaming endpoints
//!
//! The four core operations (send-with-stream, abort, listen, message page)
//! plus chat metadata management. Streaming endpoints speak SSE; each
//! `StreamEvent` rides as one SSE event named after its wire type, and
//! mid-stream failures ride as a trailing `error` event after the terminal
//! `messageComplete`.

use std::convert::Infallible;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::api::ApiState;
use crate::api::extractors::OwnerId;
use crate::api::types::{ApiError, validate_limit};
use crate::core::constants::DEFAULT_MESSAGE_PAGE_LIMIT;
use crate::data::sqlite::repositories::{chat, model};
use crate::domain::chat::{ChatError, MessageSnapshot, PageDirection, SendRequest, StreamEvent};

/// SSE keep-alive interval for streaming endpoints
const SSE_KEEP_ALIVE: Duration = Duration::from_secs(15);

// =============================================================================
// Request / response types
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conv_id: Option<String>,
    #[validate(length(min = 1, max = 65536))]
    pub content: String,
    pub model_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListenQuery {
    /// Opaque event id; "0" or absent means from the beginning
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetMessagesQuery {
    pub limit: Option<u32>,
    /// Sync cursor: unix milliseconds of the boundary message
    pub cursor: Option<i64>,
    /// "forward" or "backward" (default)
    pub direction: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub messages: Vec<MessageSnapshot>,
    pub sync_date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_message: Option<MessageSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct AbortResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub id: String,
    pub title: Option<String>,
    pub default_model_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChatRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: Option<String>,
    pub default_model_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelView {
    pub id: String,
    pub provider: String,
    pub display_name: String,
}

// =============================================================================
// Streaming handlers
// =============================================================================

fn sse_event(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(data) => Event::default().event(event.event_name()).data(data),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize stream event");
            Event::default().event("error").data("serialization failed")
        }
    }
}

fn sse_error(error: &ChatError) -> Event {
    let body = serde_json::json!({
        "code": error.kind(),
        "message": error.to_string(),
    });
    Event::default().event("error").data(body.to_string())
}

/// POST /chats/send - create a message and stream its events
pub async fn send_message(
    State(state): State<ApiState>,
    owner: OwnerId,
    Json(request): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request("INVALID_REQUEST", e.to_string()))?;

    let send = state
        .engine
        .send_with_stream(
            owner.as_str(),
            SendRequest {
                conv_id: request.conv_id,
                content: request.content,
                model_id: request.model_id,
            },
        )
        .await?;

    tracing::debug!(conv_id = %send.conv_id, message_id = %send.message_id, "Send stream opened");

    let stream = send.stream.map(|item| {
        Ok(match item {
            Ok(event) => sse_event(&event),
            Err(error) => sse_error(&error),
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive")))
}

/// GET /chats/{conv_id}/events - attach to the event stream from a cursor
pub async fn listen(
    State(state): State<ApiState>,
    owner: OwnerId,
    Path(conv_id): Path<String>,
    Query(query): Query<ListenQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state
        .engine
        .listen(owner.as_str(), &conv_id, query.cursor)
        .await?;

    let stream = events.map(|event| Ok(sse_event(&event)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(SSE_KEEP_ALIVE).text("keep-alive")))
}

/// POST /chats/{conv_id}/abort - request cancellation of the active stream
pub async fn abort(
    State(state): State<ApiState>,
    owner: OwnerId,
    Path(conv_id): Path<String>,
) -> Result<Json<AbortResponse>, ApiError> {
    let success = state.engine.abort(owner.as_str(), &conv_id).await?;
    Ok(Json(AbortResponse { success }))
}

// =============================================================================
// Message history
// =============================================================================

fn parse_direction(s: Option<&str>) -> Result<PageDirection, ApiError> {
    match s {
        None | Some("backward") => Ok(PageDirection::Backward),
        Some("forward") => Ok(PageDirection::Forward),
        Some(other) => Err(ApiError::bad_request(
            "INVALID_DIRECTION",
            format!("Unknown direction '{}'. Use forward or backward.", other),
        )),
    }
}

/// GET /chats/{conv_id}/messages - terminal messages plus the live one
pub async fn get_messages(
    State(state): State<ApiState>,
    owner: OwnerId,
    Path(conv_id): Path<String>,
    Query(query): Query<GetMessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_MESSAGE_PAGE_LIMIT);
    validate_limit(limit).map_err(|e| ApiError::bad_request("INVALID_LIMIT", e.to_string()))?;
    let direction = parse_direction(query.direction.as_deref())?;

    let page = state
        .engine
        .message_page(owner.as_str(), &conv_id, limit, query.cursor, direction)
        .await?;

    Ok(Json(MessagesResponse {
        messages: page.messages.iter().map(MessageSnapshot::from_row).collect(),
        sync_date: page.sync_date,
        streaming_message: page
            .streaming_message
            .as_ref()
            .map(MessageSnapshot::from_row),
    }))
}

// =============================================================================
// Chat metadata
// =============================================================================

/// GET /chats - list the owner's chats
pub async fn list_chats(
    State(state): State<ApiState>,
    owner: OwnerId,
) -> Result<Json<Vec<ChatView>>, ApiError> {
    let chats = chat::list_for_owner(state.database.pool(), owner.as_str(), 100)
        .await
        .map_err(ChatError::from)?;

    Ok(Json(
        chats
            .into_iter()
            .map(|c| ChatView {
                id: c.id,
                title: c.title,
                default_model_id: c.default_model_id,
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect(),
    ))
}

/// PATCH /chats/{conv_id} - update title and/or default model
pub async fn update_chat(
    State(state): State<ApiState>,
    owner: OwnerId,
    Path(conv_id): Path<String>,
    Json(request): Json<UpdateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request("INVALID_REQUEST", e.to_string()))?;

    let pool = state.database.pool();

    if let Some(model_id) = request.default_model_id.as_deref()
        && model::get(pool, None, model_id)
            .await
            .map_err(ChatError::from)?
            .is_none()
    {
        return Err(ApiError::not_found(
            "ModelNotFound",
            format!("Model not found: {}", model_id),
        ));
    }

    let updated = chat::update_metadata(
        pool,
        &conv_id,
        owner.as_str(),
        request.title.as_deref(),
        request.default_model_id.as_deref(),
    )
    .await
    .map_err(ChatError::from)?;

    if !updated {
        return Err(ApiError::not_found(
            "NotFound",
            format!("chat {} not found", conv_id),
        ));
    }

    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// DELETE /chats/{conv_id} - soft delete
pub async fn delete_chat(
    State(state): State<ApiState>,
    owner: OwnerId,
    Path(conv_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = chat::soft_delete(state.database.pool(), &conv_id, owner.as_str())
        .await
        .map_err(ChatError::from)?;

    if !deleted {
        return Err(ApiError::not_found(
            "NotFound",
            format!("chat {} not found", conv_id),
        ));
    }

    // The event log stream is orphaned once the chat is gone; drop it now
    // instead of waiting out the TTL.
    if let Err(e) = state.events.purge(&conv_id).await {
        tracing::warn!(conv_id, error = %e, "Event stream purge failed");
    }

    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// GET /models - the model catalog
pub async fn list_models(
    State(state): State<ApiState>,
) -> Result<Json<Vec<ModelView>>, ApiError> {
    let models = model::list(state.database.pool())
        .await
        .map_err(ChatError::from)?;

    Ok(Json(
        models
            .into_iter()
            .map(|m| ModelView {
                id: m.id,
                provider: m.provider,
                display_name: m.display_name,
            })
            .collect(),
    ))
}
