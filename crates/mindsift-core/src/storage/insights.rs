//! CRUD, merge, and history tracking for insights.
//!
//! Insights are soft-deleted (status flip to `rejected`), never removed.
//! Every mutation writes an `insight_history` row in the same transaction,
//! so the provenance of a merged or critiqued insight can be replayed.

use std::collections::{BTreeMap, BTreeSet};

use super::{fmt_ts, now_str, parse_ts, DbPool};
use crate::error::StorageError;
use crate::model::{Insight, InsightStatus, InsightType};

#[derive(sqlx::FromRow)]
struct InsightRow {
    id: String,
    summary: String,
    themes_json: String,
    emotional_tags_json: String,
    patterns_json: String,
    significance: f64,
    confidence: f64,
    insight_type: String,
    status: String,
    pass_count: i64,
    excerpts_json: String,
    earliest_source_date: Option<String>,
    latest_source_date: Option<String>,
    case_id: Option<String>,
    run_id: Option<String>,
    created_at: String,
    updated_at: String,
    source_ids: Option<String>,
}

fn parse_set(json: &str) -> BTreeSet<String> {
    serde_json::from_str(json).unwrap_or_default()
}

fn set_json(set: &BTreeSet<String>) -> String {
    serde_json::to_string(set).unwrap_or_else(|_| "[]".to_string())
}

impl From<InsightRow> for Insight {
    fn from(row: InsightRow) -> Self {
        Insight {
            id: row.id,
            summary: row.summary,
            themes: parse_set(&row.themes_json),
            emotional_tags: parse_set(&row.emotional_tags_json),
            patterns: parse_set(&row.patterns_json),
            significance: row.significance,
            confidence: row.confidence,
            insight_type: InsightType::parse(&row.insight_type),
            status: InsightStatus::parse(&row.status),
            source_ids: row
                .source_ids
                .as_deref()
                .map(|s| s.split(',').map(str::to_string).collect())
                .unwrap_or_default(),
            excerpts: serde_json::from_str(&row.excerpts_json).unwrap_or_default(),
            pass_count: u32::try_from(row.pass_count).unwrap_or(1),
            earliest_source_date: row.earliest_source_date.as_deref().map(parse_ts),
            latest_source_date: row.latest_source_date.as_deref().map(parse_ts),
            case_id: row.case_id,
            run_id: row.run_id,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

const SELECT_WITH_SOURCES: &str = "SELECT i.*, \
     (SELECT group_concat(document_id) FROM insight_sources WHERE insight_id = i.id) AS source_ids \
     FROM insights i";

/// A journaled insight lifecycle event.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryEvent {
    pub insight_id: String,
    pub event_type: String,
    pub detail: serde_json::Value,
    pub event_at: chrono::DateTime<chrono::Utc>,
}

/// Aggregate insight statistics for the case view.
#[derive(Debug, serde::Serialize)]
pub struct InsightStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
    pub avg_significance: f64,
    pub avg_confidence: f64,
    pub avg_sources: f64,
}

async fn write_row(
    conn: &mut sqlx::SqliteConnection,
    insight: &Insight,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO insights \
         (id, summary, themes_json, emotional_tags_json, patterns_json, significance, confidence, \
          insight_type, status, pass_count, excerpts_json, earliest_source_date, latest_source_date, \
          case_id, run_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&insight.id)
    .bind(&insight.summary)
    .bind(set_json(&insight.themes))
    .bind(set_json(&insight.emotional_tags))
    .bind(set_json(&insight.patterns))
    .bind(insight.significance)
    .bind(insight.confidence)
    .bind(insight.insight_type.as_str())
    .bind(insight.status.as_str())
    .bind(i64::from(insight.pass_count))
    .bind(serde_json::to_string(&insight.excerpts).unwrap_or_else(|_| "[]".to_string()))
    .bind(insight.earliest_source_date.map(fmt_ts))
    .bind(insight.latest_source_date.map(fmt_ts))
    .bind(&insight.case_id)
    .bind(&insight.run_id)
    .bind(fmt_ts(insight.created_at))
    .bind(fmt_ts(insight.updated_at))
    .execute(conn)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

async fn write_sources(
    conn: &mut sqlx::SqliteConnection,
    insight_id: &str,
    source_ids: &BTreeSet<String>,
    now: &str,
) -> Result<(), StorageError> {
    for document_id in source_ids {
        sqlx::query(
            "INSERT OR IGNORE INTO insight_sources (insight_id, document_id, added_at) \
             VALUES (?, ?, ?)",
        )
        .bind(insight_id)
        .bind(document_id)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    }
    Ok(())
}

async fn write_history(
    conn: &mut sqlx::SqliteConnection,
    insight_id: &str,
    event_type: &str,
    detail: &serde_json::Value,
    now: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO insight_history (insight_id, event_type, detail_json, event_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(insight_id)
    .bind(event_type)
    .bind(detail.to_string())
    .bind(now)
    .execute(conn)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Insert a new insight together with its source links and a `created`
/// history event, in one transaction.
pub async fn create(pool: &DbPool, insight: &Insight) -> Result<(), StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    let now = now_str();

    write_row(&mut *tx, insight).await?;
    write_sources(&mut *tx, &insight.id, &insight.source_ids, &now).await?;
    write_history(
        &mut *tx,
        &insight.id,
        "created",
        &serde_json::json!({ "source_count": insight.source_ids.len() }),
        &now,
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch an insight by id, with its sources.
pub async fn get(pool: &DbPool, id: &str) -> Result<Option<Insight>, StorageError> {
    let row: Option<InsightRow> =
        sqlx::query_as(&format!("{SELECT_WITH_SOURCES} WHERE i.id = ?"))
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(Insight::from))
}

/// All active insights (excludes `rejected` and `merged`), optionally
/// scoped to a case or run.
pub async fn active(
    pool: &DbPool,
    case_id: Option<&str>,
    run_id: Option<&str>,
) -> Result<Vec<Insight>, StorageError> {
    let mut query = format!("{SELECT_WITH_SOURCES} WHERE i.status NOT IN ('rejected', 'merged')");
    if case_id.is_some() {
        query.push_str(" AND i.case_id = ?");
    }
    if run_id.is_some() {
        query.push_str(" AND i.run_id = ?");
    }
    query.push_str(" ORDER BY i.created_at");

    let mut q = sqlx::query_as::<_, InsightRow>(&query);
    if let Some(case_id) = case_id {
        q = q.bind(case_id);
    }
    if let Some(run_id) = run_id {
        q = q.bind(run_id);
    }

    let rows = q
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(rows.into_iter().map(Insight::from).collect())
}

/// Active insights sharing at least one theme with the given set.
///
/// Indexed-enough lookup for the near-duplicate scorer: the LIKE probes
/// hit the JSON array text, and the caller re-scores the survivors.
pub async fn similar_candidates(
    pool: &DbPool,
    themes: &BTreeSet<String>,
    case_id: Option<&str>,
    limit: i64,
) -> Result<Vec<Insight>, StorageError> {
    if themes.is_empty() {
        return Ok(Vec::new());
    }

    let mut query = format!("{SELECT_WITH_SOURCES} WHERE i.status NOT IN ('rejected', 'merged')");
    if case_id.is_some() {
        query.push_str(" AND i.case_id = ?");
    }
    let probes: Vec<&str> = themes.iter().map(|_| "i.themes_json LIKE ?").collect();
    query.push_str(&format!(" AND ({})", probes.join(" OR ")));
    query.push_str(" ORDER BY i.created_at LIMIT ?");

    let mut q = sqlx::query_as::<_, InsightRow>(&query);
    if let Some(case_id) = case_id {
        q = q.bind(case_id);
    }
    for theme in themes {
        q = q.bind(format!("%\"{}\"%", theme.replace('"', "")));
    }
    q = q.bind(limit);

    let rows = q
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(rows.into_iter().map(Insight::from).collect())
}

/// Persist a merge: update the target with its in-memory merged state,
/// record the incoming insight as `merged`, and journal both sides.
///
/// The caller merges the two insights in memory first (union tags, append
/// sources, bump pass count) and passes the result as `target`.
pub async fn merge(
    pool: &DbPool,
    target: &Insight,
    incoming: &Insight,
    similarity: f64,
) -> Result<(), StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    let now = now_str();

    sqlx::query(
        "UPDATE insights SET \
         themes_json = ?, emotional_tags_json = ?, patterns_json = ?, \
         significance = ?, confidence = ?, pass_count = ?, excerpts_json = ?, \
         earliest_source_date = ?, latest_source_date = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(set_json(&target.themes))
    .bind(set_json(&target.emotional_tags))
    .bind(set_json(&target.patterns))
    .bind(target.significance)
    .bind(target.confidence)
    .bind(i64::from(target.pass_count))
    .bind(serde_json::to_string(&target.excerpts).unwrap_or_else(|_| "[]".to_string()))
    .bind(target.earliest_source_date.map(fmt_ts))
    .bind(target.latest_source_date.map(fmt_ts))
    .bind(&now)
    .bind(&target.id)
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    write_sources(&mut *tx, &target.id, &target.source_ids, &now).await?;

    let mut merged = incoming.clone();
    merged.status = InsightStatus::Merged;
    write_row(&mut *tx, &merged).await?;
    write_sources(&mut *tx, &merged.id, &merged.source_ids, &now).await?;

    write_history(
        &mut *tx,
        &target.id,
        "source_added",
        &serde_json::json!({ "merged_from": incoming.id, "similarity": similarity }),
        &now,
    )
    .await?;
    write_history(
        &mut *tx,
        &incoming.id,
        "merged",
        &serde_json::json!({ "merged_into": target.id, "similarity": similarity }),
        &now,
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    tracing::info!(
        target = %target.id,
        incoming = %incoming.id,
        similarity,
        "merged insight"
    );
    Ok(())
}

/// Update an insight's mutable fields after critique and journal the event.
pub async fn update_after_critique(
    pool: &DbPool,
    insight: &Insight,
    detail: &serde_json::Value,
) -> Result<(), StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    let now = now_str();

    sqlx::query(
        "UPDATE insights SET significance = ?, confidence = ?, status = ?, \
         themes_json = ?, patterns_json = ?, emotional_tags_json = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(insight.significance)
    .bind(insight.confidence)
    .bind(insight.status.as_str())
    .bind(set_json(&insight.themes))
    .bind(set_json(&insight.patterns))
    .bind(set_json(&insight.emotional_tags))
    .bind(&now)
    .bind(&insight.id)
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    write_history(&mut *tx, &insight.id, "critiqued", detail, &now).await?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Set an insight's status and journal the change.
pub async fn set_status(
    pool: &DbPool,
    insight_id: &str,
    status: InsightStatus,
    cause: &str,
) -> Result<bool, StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    let now = now_str();

    let result = sqlx::query("UPDATE insights SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(&now)
        .bind(insight_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    if result.rows_affected() == 0 {
        tx.rollback()
            .await
            .map_err(|e| StorageError::Query { source: e })?;
        return Ok(false);
    }

    write_history(
        &mut *tx,
        insight_id,
        status.as_str(),
        &serde_json::json!({ "cause": cause }),
        &now,
    )
    .await?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(true)
}

/// Journal a reflexion attempt against a rejected insight.
///
/// The event's presence is what makes the rejection final: the critique
/// engine refuses a second reflexion once one is recorded.
pub async fn log_reflexion(
    pool: &DbPool,
    insight_id: &str,
    re_extracted_ids: &[String],
) -> Result<(), StorageError> {
    let now = now_str();
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    write_history(
        &mut *conn,
        insight_id,
        "reflexion",
        &serde_json::json!({ "re_extracted": re_extracted_ids }),
        &now,
    )
    .await
}

/// The journaled history for an insight, oldest first.
pub async fn history(pool: &DbPool, insight_id: &str) -> Result<Vec<HistoryEvent>, StorageError> {
    let rows: Vec<(String, String, String, String)> = sqlx::query_as(
        "SELECT insight_id, event_type, detail_json, event_at \
         FROM insight_history WHERE insight_id = ? ORDER BY id",
    )
    .bind(insight_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(rows
        .into_iter()
        .map(|(insight_id, event_type, detail_json, event_at)| HistoryEvent {
            insight_id,
            event_type,
            detail: serde_json::from_str(&detail_json).unwrap_or_default(),
            event_at: parse_ts(&event_at),
        })
        .collect())
}

/// Aggregate statistics over a case's insights (or the whole store).
pub async fn stats(pool: &DbPool, case_id: Option<&str>) -> Result<InsightStats, StorageError> {
    let scope = if case_id.is_some() { " WHERE case_id = ?" } else { "" };

    let status_sql = format!("SELECT status, COUNT(*) FROM insights{scope} GROUP BY status");
    let type_sql =
        format!("SELECT insight_type, COUNT(*) FROM insights{scope} GROUP BY insight_type");
    let mut status_query = sqlx::query_as::<_, (String, i64)>(&status_sql);
    let mut type_query = sqlx::query_as::<_, (String, i64)>(&type_sql);
    if let Some(case_id) = case_id {
        status_query = status_query.bind(case_id);
        type_query = type_query.bind(case_id);
    }

    let by_status: BTreeMap<String, i64> = status_query
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?
        .into_iter()
        .collect();
    let by_type: BTreeMap<String, i64> = type_query
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?
        .into_iter()
        .collect();

    let avg_scope = if case_id.is_some() {
        "i.status != 'rejected' AND i.case_id = ?"
    } else {
        "i.status != 'rejected'"
    };
    let avg_sql = format!(
        "SELECT COALESCE(AVG(i.significance), 0.0), COALESCE(AVG(i.confidence), 0.0), \
         COALESCE(AVG((SELECT COUNT(*) FROM insight_sources s WHERE s.insight_id = i.id)), 0.0), \
         COUNT(*) \
         FROM insights i WHERE {avg_scope}"
    );
    let mut avg_query = sqlx::query_as::<_, (f64, f64, f64, i64)>(&avg_sql);
    if let Some(case_id) = case_id {
        avg_query = avg_query.bind(case_id);
    }
    let (avg_significance, avg_confidence, avg_sources, _) = avg_query
        .fetch_one(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(InsightStats {
        total: by_status.values().sum(),
        by_status,
        by_type,
        avg_significance,
        avg_confidence,
        avg_sources,
    })
}
