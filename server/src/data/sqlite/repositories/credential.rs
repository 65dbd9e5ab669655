//! Provider credential repository
//!
//! Owner-supplied provider keys. Their presence bypasses the free-tier rate
//! limiter for that (owner, provider) pair.

use sqlx::SqlitePool;

use crate::data::sqlite::SqliteError;
use crate::data::types::CredentialRow;
use crate::utils::time::now_ms;

/// Get the credential for an (owner, provider) pair
pub async fn get(
    pool: &SqlitePool,
    owner_id: &str,
    provider: &str,
) -> Result<Option<CredentialRow>, SqliteError> {
    let row = sqlx::query_as::<_, (String, String, String, i64)>(
        "SELECT owner_id, provider, api_key, created_at FROM provider_credentials WHERE owner_id = ? AND provider = ?",
    )
    .bind(owner_id)
    .bind(provider)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(owner_id, provider, api_key, created_at)| CredentialRow {
        owner_id,
        provider,
        api_key,
        created_at,
    }))
}

/// Insert or replace the credential for an (owner, provider) pair
pub async fn upsert(
    pool: &SqlitePool,
    owner_id: &str,
    provider: &str,
    api_key: &str,
) -> Result<(), SqliteError> {
    sqlx::query(
        "INSERT INTO provider_credentials (owner_id, provider, api_key, created_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(owner_id, provider) DO UPDATE SET api_key = excluded.api_key",
    )
    .bind(owner_id)
    .bind(provider)
    .bind(api_key)
    .bind(now_ms())
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete the credential for an (owner, provider) pair
pub async fn delete(
    pool: &SqlitePool,
    owner_id: &str,
    provider: &str,
) -> Result<bool, SqliteError> {
    let result = sqlx::query(
        "DELETE FROM provider_credentials WHERE owner_id = ? AND provider = ?",
    )
    .bind(owner_id)
    .bind(provider)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}
