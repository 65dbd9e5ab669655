//! Chat repository
//!
//! Chats are created on the first user message if absent, mutated only by
//! metadata updates, and soft-deleted. The core never hard-deletes a chat.

use sqlx::SqlitePool;

use crate::data::sqlite::SqliteError;
use crate::data::types::ChatRow;
use crate::utils::time::now_ms;

type ChatTuple = (String, String, Option<String>, Option<String>, i64, i64, i64);

fn from_tuple(row: ChatTuple) -> ChatRow {
    ChatRow {
        id: row.0,
        owner_id: row.1,
        title: row.2,
        default_model_id: row.3,
        deleted: row.4 != 0,
        created_at: row.5,
        updated_at: row.6,
    }
}

const SELECT_COLUMNS: &str =
    "id, owner_id, title, default_model_id, deleted, created_at, updated_at";

/// Create a new chat with a generated CUID2 id
pub async fn create(
    pool: &SqlitePool,
    owner_id: &str,
    title: Option<&str>,
    default_model_id: Option<&str>,
) -> Result<ChatRow, SqliteError> {
    let id = cuid2::create_id();
    let now = now_ms();

    sqlx::query(
        "INSERT INTO chats (id, owner_id, title, default_model_id, deleted, created_at, updated_at) VALUES (?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(&id)
    .bind(owner_id)
    .bind(title)
    .bind(default_model_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(ChatRow {
        id,
        owner_id: owner_id.to_string(),
        title: title.map(str::to_string),
        default_model_id: default_model_id.map(str::to_string),
        deleted: false,
        created_at: now,
        updated_at: now,
    })
}

/// Get a live (non-deleted) chat for an owner
pub async fn get_for_owner(
    pool: &SqlitePool,
    id: &str,
    owner_id: &str,
) -> Result<Option<ChatRow>, SqliteError> {
    let row = sqlx::query_as::<_, ChatTuple>(&format!(
        "SELECT {SELECT_COLUMNS} FROM chats WHERE id = ? AND owner_id = ? AND deleted = 0"
    ))
    .bind(id)
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(from_tuple))
}

/// List live chats for an owner, most recently updated first
pub async fn list_for_owner(
    pool: &SqlitePool,
    owner_id: &str,
    limit: u32,
) -> Result<Vec<ChatRow>, SqliteError> {
    let rows = sqlx::query_as::<_, ChatTuple>(&format!(
        "SELECT {SELECT_COLUMNS} FROM chats WHERE owner_id = ? AND deleted = 0 ORDER BY updated_at DESC LIMIT ?"
    ))
    .bind(owner_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(from_tuple).collect())
}

/// Update chat metadata (title and/or default model). `None` leaves the
/// field unchanged; use `update_default_model` to clear the model.
pub async fn update_metadata(
    pool: &SqlitePool,
    id: &str,
    owner_id: &str,
    title: Option<&str>,
    default_model_id: Option<&str>,
) -> Result<bool, SqliteError> {
    let result = sqlx::query(
        "UPDATE chats SET
            title = COALESCE(?, title),
            default_model_id = COALESCE(?, default_model_id),
            updated_at = ?
         WHERE id = ? AND owner_id = ? AND deleted = 0",
    )
    .bind(title)
    .bind(default_model_id)
    .bind(now_ms())
    .bind(id)
    .bind(owner_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Clear or set the chat default model explicitly
pub async fn update_default_model(
    pool: &SqlitePool,
    id: &str,
    owner_id: &str,
    default_model_id: Option<&str>,
) -> Result<bool, SqliteError> {
    let result = sqlx::query(
        "UPDATE chats SET default_model_id = ?, updated_at = ? WHERE id = ? AND owner_id = ? AND deleted = 0",
    )
    .bind(default_model_id)
    .bind(now_ms())
    .bind(id)
    .bind(owner_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Soft-delete a chat. Messages are kept; the chat disappears from listings.
pub async fn soft_delete(
    pool: &SqlitePool,
    id: &str,
    owner_id: &str,
) -> Result<bool, SqliteError> {
    let result = sqlx::query(
        "UPDATE chats SET deleted = 1, updated_at = ? WHERE id = ? AND owner_id = ? AND deleted = 0",
    )
    .bind(now_ms())
    .bind(id)
    .bind(owner_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Bump updated_at (called when a message lands in the chat)
pub async fn touch(pool: &SqlitePool, id: &str) -> Result<(), SqliteError> {
    sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
        .bind(now_ms())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
