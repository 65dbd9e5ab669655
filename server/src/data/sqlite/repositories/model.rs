//! Model catalog repository
//!
//! Reads support optional caching. Pass `Some(cache)` to enable caching or
//! `None` to bypass it. The catalog is seeded by the initial migration and
//! effectively immutable at runtime, so a short TTL is plenty.

use std::time::Duration;

use sqlx::SqlitePool;

use crate::core::constants::CACHE_TTL_MODEL;
use crate::data::cache::{CacheKey, CacheService};
use crate::data::sqlite::SqliteError;
use crate::data::types::ModelRow;

/// Get a model by id (with optional caching)
pub async fn get(
    pool: &SqlitePool,
    cache: Option<&CacheService>,
    id: &str,
) -> Result<Option<ModelRow>, SqliteError> {
    if let Some(cache) = cache {
        let key = CacheKey::model(id);

        match cache.get::<ModelRow>(&key).await {
            Ok(Some(model)) => {
                tracing::trace!(%id, "Model cache hit");
                return Ok(Some(model));
            }
            Err(e) => tracing::warn!(%id, error = %e, "Cache get error"),
            Ok(None) => {}
        }

        let result = get_from_db(pool, id).await?;

        if let Some(ref model) = result
            && let Err(e) = cache
                .set(&key, model, Some(Duration::from_secs(CACHE_TTL_MODEL)))
                .await
        {
            tracing::warn!(%id, error = %e, "Cache set error");
        }

        Ok(result)
    } else {
        get_from_db(pool, id).await
    }
}

async fn get_from_db(pool: &SqlitePool, id: &str) -> Result<Option<ModelRow>, SqliteError> {
    let row = sqlx::query_as::<_, (String, String, String)>(
        "SELECT id, provider, display_name FROM models WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(id, provider, display_name)| ModelRow {
        id,
        provider,
        display_name,
    }))
}

/// List the full model catalog
pub async fn list(pool: &SqlitePool) -> Result<Vec<ModelRow>, SqliteError> {
    let rows = sqlx::query_as::<_, (String, String, String)>(
        "SELECT id, provider, display_name FROM models ORDER BY provider, id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, provider, display_name)| ModelRow {
            id,
            provider,
            display_name,
        })
        .collect())
}
