//! CRUD operations for Tier 2 patterns.
//!
//! Patterns are append-only per run. Referential integrity against
//! insights is enforced at write time: a pattern referencing a missing
//! or rejected insight is refused.

use std::collections::BTreeSet;

use super::{fmt_ts, parse_ts, DbPool};
use crate::error::StorageError;
use crate::model::{Pattern, PatternType};

#[derive(sqlx::FromRow)]
struct PatternRow {
    id: String,
    name: String,
    summary: String,
    description: String,
    pattern_type: String,
    insight_ids_json: String,
    strength: f64,
    metadata_json: String,
    case_id: Option<String>,
    run_id: Option<String>,
    created_at: String,
}

impl From<PatternRow> for Pattern {
    fn from(row: PatternRow) -> Self {
        Pattern {
            id: row.id,
            name: row.name,
            summary: row.summary,
            description: row.description,
            pattern_type: PatternType::parse(&row.pattern_type),
            insight_ids: serde_json::from_str(&row.insight_ids_json).unwrap_or_default(),
            strength: row.strength,
            metadata: serde_json::from_str(&row.metadata_json).unwrap_or_default(),
            case_id: row.case_id,
            run_id: row.run_id,
            created_at: parse_ts(&row.created_at),
        }
    }
}

/// Insert a pattern after verifying every referenced insight exists and
/// is not rejected.
pub async fn insert(pool: &DbPool, pattern: &Pattern) -> Result<(), StorageError> {
    for insight_id in &pattern.insight_ids {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM insights WHERE id = ?")
                .bind(insight_id)
                .fetch_optional(pool)
                .await
                .map_err(|e| StorageError::Query { source: e })?;
        let valid = row.is_some_and(|(status,)| status != "rejected");
        if !valid {
            return Err(StorageError::Query {
                source: sqlx::Error::Protocol(format!(
                    "pattern {} references missing or rejected insight {insight_id}",
                    pattern.id
                )),
            });
        }
    }

    sqlx::query(
        "INSERT INTO patterns \
         (id, name, summary, description, pattern_type, insight_ids_json, strength, metadata_json, \
          case_id, run_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&pattern.id)
    .bind(&pattern.name)
    .bind(&pattern.summary)
    .bind(&pattern.description)
    .bind(pattern.pattern_type.as_str())
    .bind(serde_json::to_string(&pattern.insight_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(pattern.strength)
    .bind(pattern.metadata.to_string())
    .bind(&pattern.case_id)
    .bind(&pattern.run_id)
    .bind(fmt_ts(pattern.created_at))
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Extend an existing pattern with more insights and a new strength.
pub async fn extend(
    pool: &DbPool,
    pattern_id: &str,
    insight_ids: &BTreeSet<String>,
    strength: f64,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE patterns SET insight_ids_json = ?, strength = ? WHERE id = ?")
        .bind(serde_json::to_string(insight_ids).unwrap_or_else(|_| "[]".to_string()))
        .bind(strength)
        .bind(pattern_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch a pattern by id.
pub async fn get(pool: &DbPool, id: &str) -> Result<Option<Pattern>, StorageError> {
    let row: Option<PatternRow> = sqlx::query_as("SELECT * FROM patterns WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(Pattern::from))
}

/// All patterns, optionally scoped to a case, strongest first.
pub async fn list(pool: &DbPool, case_id: Option<&str>) -> Result<Vec<Pattern>, StorageError> {
    let query = if case_id.is_some() {
        "SELECT * FROM patterns WHERE case_id = ? ORDER BY strength DESC"
    } else {
        "SELECT * FROM patterns ORDER BY strength DESC"
    };
    let mut q = sqlx::query_as::<_, PatternRow>(query);
    if let Some(case_id) = case_id {
        q = q.bind(case_id);
    }
    let rows = q
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(rows.into_iter().map(Pattern::from).collect())
}
