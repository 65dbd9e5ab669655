//! Message repository
//!
//! The message row is the source of truth for final content. Two invariants
//! are enforced at the schema level and surfaced here as `Conflict`:
//! - at most one non-terminal message per chat (unique partial index)
//! - `finished_at` is set iff the status is terminal (CHECK constraint)

use std::str::FromStr;

use sqlx::SqlitePool;

use crate::data::sqlite::SqliteError;
use crate::data::types::{MessageRow, MessageStatus};
use crate::utils::time::now_ms;

type MessageTuple = (
    String,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    i64,
    Option<i64>,
);

const SELECT_COLUMNS: &str = "id, chat_id, user_content, agent_content, status, error_reason, \
     input_tokens, output_tokens, latency_ms, created_at, finished_at";

fn from_tuple(row: MessageTuple) -> Result<MessageRow, SqliteError> {
    Ok(MessageRow {
        id: row.0,
        chat_id: row.1,
        user_content: row.2,
        agent_content: row.3,
        status: MessageStatus::from_str(&row.4).map_err(SqliteError::Decode)?,
        error_reason: row.5,
        input_tokens: row.6,
        output_tokens: row.7,
        latency_ms: row.8,
        created_at: row.9,
        finished_at: row.10,
    })
}

/// Terminal fields applied in one atomic update by `finalize`
#[derive(Debug, Clone, Default)]
pub struct FinalizeMessage {
    pub agent_content: Option<String>,
    pub error_reason: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub latency_ms: Option<i64>,
}

/// Create the initial message row (status `Started`)
///
/// Fails with `Conflict` if the chat already has a non-terminal message.
pub async fn create_initial(
    pool: &SqlitePool,
    chat_id: &str,
    user_content: &str,
) -> Result<MessageRow, SqliteError> {
    let id = cuid2::create_id();
    let now = now_ms();

    let result = sqlx::query(
        "INSERT INTO messages (id, chat_id, user_content, status, created_at) VALUES (?, ?, ?, 'Started', ?)",
    )
    .bind(&id)
    .bind(chat_id)
    .bind(user_content)
    .bind(now)
    .execute(pool)
    .await
    .map_err(SqliteError::from);

    if let Err(e) = result {
        if e.is_unique_violation() {
            return Err(SqliteError::Conflict(format!(
                "chat {} already has a streaming message",
                chat_id
            )));
        }
        return Err(e);
    }

    Ok(MessageRow {
        id,
        chat_id: chat_id.to_string(),
        user_content: user_content.to_string(),
        agent_content: None,
        status: MessageStatus::Started,
        error_reason: None,
        input_tokens: None,
        output_tokens: None,
        latency_ms: None,
        created_at: now,
        finished_at: None,
    })
}

/// Transition Started -> Streaming. Idempotent: already-streaming rows are
/// left as they are and terminal rows are not touched.
pub async fn mark_streaming(pool: &SqlitePool, id: &str) -> Result<(), SqliteError> {
    sqlx::query("UPDATE messages SET status = 'Streaming' WHERE id = ? AND status = 'Started'")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Apply the terminal state in a single atomic update
///
/// Rejects non-terminal target statuses, and fails with `Conflict` if the
/// row is already terminal (terminal rows are immutable).
pub async fn finalize(
    pool: &SqlitePool,
    id: &str,
    status: MessageStatus,
    finished_at: i64,
    fields: FinalizeMessage,
) -> Result<(), SqliteError> {
    if !status.is_terminal() {
        return Err(SqliteError::Conflict(format!(
            "finalize requires a terminal status, got {}",
            status
        )));
    }

    let result = sqlx::query(
        "UPDATE messages SET
            agent_content = ?,
            status = ?,
            error_reason = ?,
            input_tokens = ?,
            output_tokens = ?,
            latency_ms = ?,
            finished_at = ?
         WHERE id = ? AND finished_at IS NULL",
    )
    .bind(&fields.agent_content)
    .bind(status.as_str())
    .bind(&fields.error_reason)
    .bind(fields.input_tokens)
    .bind(fields.output_tokens)
    .bind(fields.latency_ms)
    .bind(finished_at)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(SqliteError::Conflict(format!(
            "message {} is already terminal",
            id
        )));
    }

    Ok(())
}

/// The most recent non-terminal message for a chat, if any
pub async fn current_streaming(
    pool: &SqlitePool,
    chat_id: &str,
) -> Result<Option<MessageRow>, SqliteError> {
    let row = sqlx::query_as::<_, MessageTuple>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messages WHERE chat_id = ? AND finished_at IS NULL ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;

    row.map(from_tuple).transpose()
}

/// Terminal messages older than the cursor, newest first
pub async fn page_older(
    pool: &SqlitePool,
    chat_id: &str,
    before_finished_at: i64,
    limit: u32,
) -> Result<Vec<MessageRow>, SqliteError> {
    let rows = sqlx::query_as::<_, MessageTuple>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messages
         WHERE chat_id = ? AND finished_at IS NOT NULL AND finished_at < ?
         ORDER BY finished_at DESC LIMIT ?"
    ))
    .bind(chat_id)
    .bind(before_finished_at)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_tuple).collect()
}

/// Terminal messages newer than the cursor, oldest first
pub async fn page_newer(
    pool: &SqlitePool,
    chat_id: &str,
    after_finished_at: i64,
    limit: u32,
) -> Result<Vec<MessageRow>, SqliteError> {
    let rows = sqlx::query_as::<_, MessageTuple>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messages
         WHERE chat_id = ? AND finished_at IS NOT NULL AND finished_at > ?
         ORDER BY finished_at ASC LIMIT ?"
    ))
    .bind(chat_id)
    .bind(after_finished_at)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(from_tuple).collect()
}

/// The most recent terminal messages in chronological order, for building
/// provider context
pub async fn recent_history(
    pool: &SqlitePool,
    chat_id: &str,
    limit: u32,
) -> Result<Vec<MessageRow>, SqliteError> {
    let mut rows: Vec<MessageRow> = sqlx::query_as::<_, MessageTuple>(&format!(
        "SELECT {SELECT_COLUMNS} FROM messages
         WHERE chat_id = ? AND finished_at IS NOT NULL
         ORDER BY created_at DESC LIMIT ?"
    ))
    .bind(chat_id)
    .bind(limit)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(from_tuple)
    .collect::<Result<_, _>>()?;

    rows.reverse();
    Ok(rows)
}
