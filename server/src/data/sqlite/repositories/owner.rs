//! Owner repository
//!
//! Owners are created lazily: the first request from a principal creates the
//! row. Owner identity itself comes from the auth layer upstream.

use sqlx::SqlitePool;

use crate::data::sqlite::SqliteError;
use crate::data::types::OwnerRow;
use crate::utils::time::now_ms;

/// Get an owner, creating the row if it doesn't exist
pub async fn get_or_create(pool: &SqlitePool, owner_id: &str) -> Result<OwnerRow, SqliteError> {
    sqlx::query("INSERT OR IGNORE INTO owners (id, created_at) VALUES (?, ?)")
        .bind(owner_id)
        .bind(now_ms())
        .execute(pool)
        .await?;

    let row = sqlx::query_as::<_, (String, Option<String>, i64)>(
        "SELECT id, default_model_id, created_at FROM owners WHERE id = ?",
    )
    .bind(owner_id)
    .fetch_one(pool)
    .await?;

    Ok(OwnerRow {
        id: row.0,
        default_model_id: row.1,
        created_at: row.2,
    })
}

/// Set the owner's default model
pub async fn set_default_model(
    pool: &SqlitePool,
    owner_id: &str,
    model_id: Option<&str>,
) -> Result<(), SqliteError> {
    sqlx::query("UPDATE owners SET default_model_id = ? WHERE id = ?")
        .bind(model_id)
        .bind(owner_id)
        .execute(pool)
        .await?;
    Ok(())
}
