//! The key-value backend for the LLM response cache.
//!
//! One row per cache key. Hits bump the `hits` counter; expired entries
//! read as misses and are replaced on the next store.

use super::{now_str, DbPool};
use crate::error::StorageError;

/// Fetch a cached response body and bump the hit counter.
///
/// Entries past their `expires_at` are treated as absent.
pub async fn get_and_touch(
    pool: &DbPool,
    cache_key: &str,
) -> Result<Option<String>, StorageError> {
    let now = now_str();
    let row: Option<(String,)> = sqlx::query_as(
        "UPDATE cache_entries SET hits = hits + 1 \
         WHERE cache_key = ? AND (expires_at IS NULL OR expires_at > ?) \
         RETURNING response_json",
    )
    .bind(cache_key)
    .bind(&now)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(|r| r.0))
}

/// Store (or replace) a cached response.
pub async fn put(
    pool: &DbPool,
    cache_key: &str,
    provider: &str,
    model: &str,
    response_json: &str,
    expires_at: Option<&str>,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO cache_entries (cache_key, provider, model, response_json, hits, created_at, expires_at) \
         VALUES (?, ?, ?, ?, 0, ?, ?) \
         ON CONFLICT(cache_key) DO UPDATE SET \
           response_json = excluded.response_json, \
           created_at = excluded.created_at, \
           expires_at = excluded.expires_at",
    )
    .bind(cache_key)
    .bind(provider)
    .bind(model)
    .bind(response_json)
    .bind(now_str())
    .bind(expires_at)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Hit count for a key (for tests and diagnostics).
pub async fn hits(pool: &DbPool, cache_key: &str) -> Result<i64, StorageError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT hits FROM cache_entries WHERE cache_key = ?")
        .bind(cache_key)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map_or(0, |r| r.0))
}
