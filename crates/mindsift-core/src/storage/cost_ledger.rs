//! The append-only LLM cost ledger.
//!
//! One row per LLM call, cache hits included (tagged `cached` with zero
//! cost), so the ledger is a complete call history as well as a bill.

use super::{parse_ts, DbPool};
use crate::error::StorageError;

/// One ledger row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CostRecord {
    pub id: i64,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_cents: f64,
    pub purpose: String,
    pub cached: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Summary of spend across time windows.
#[derive(Debug, serde::Serialize)]
pub struct CostSummary {
    pub cost_cents_today: f64,
    pub cost_cents_30d: f64,
    pub cost_cents_all_time: f64,
    pub calls_all_time: i64,
    pub cached_calls_all_time: i64,
}

/// Append a ledger row.
pub async fn append(
    pool: &DbPool,
    provider: &str,
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
    cost_cents: f64,
    purpose: &str,
    cached: bool,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO cost_ledger \
         (provider, model, input_tokens, output_tokens, cost_cents, purpose, cached, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(provider)
    .bind(model)
    .bind(input_tokens)
    .bind(output_tokens)
    .bind(cost_cents)
    .bind(purpose)
    .bind(i64::from(cached))
    .bind(super::now_str())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// All ledger rows, newest first, capped at `limit`.
pub async fn recent(pool: &DbPool, limit: i64) -> Result<Vec<CostRecord>, StorageError> {
    let rows: Vec<(i64, String, String, i64, i64, f64, String, i64, String)> = sqlx::query_as(
        "SELECT id, provider, model, input_tokens, output_tokens, cost_cents, purpose, cached, created_at \
         FROM cost_ledger ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(rows
        .into_iter()
        .map(
            |(id, provider, model, input_tokens, output_tokens, cost_cents, purpose, cached, created_at)| {
                CostRecord {
                    id,
                    provider,
                    model,
                    input_tokens: u32::try_from(input_tokens).unwrap_or(0),
                    output_tokens: u32::try_from(output_tokens).unwrap_or(0),
                    cost_cents,
                    purpose,
                    cached: cached != 0,
                    created_at: parse_ts(&created_at),
                }
            },
        )
        .collect())
}

/// Aggregate spend across time windows.
pub async fn summary(pool: &DbPool) -> Result<CostSummary, StorageError> {
    let row: (f64, f64, f64, i64, i64) = sqlx::query_as(
        "SELECT \
            COALESCE(SUM(CASE WHEN created_at >= date('now') THEN cost_cents ELSE 0.0 END), 0.0), \
            COALESCE(SUM(CASE WHEN created_at >= date('now', '-30 days') THEN cost_cents ELSE 0.0 END), 0.0), \
            COALESCE(SUM(cost_cents), 0.0), \
            COUNT(*), \
            COALESCE(SUM(cached), 0) \
         FROM cost_ledger",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(CostSummary {
        cost_cents_today: row.0,
        cost_cents_30d: row.1,
        cost_cents_all_time: row.2,
        calls_all_time: row.3,
        cached_calls_all_time: row.4,
    })
}
