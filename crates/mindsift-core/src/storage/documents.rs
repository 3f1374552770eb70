//! CRUD operations for ingested documents.
//!
//! Documents are immutable after creation, except for the one-time Tier 0
//! `signals` annotation and the `processed_at` completion stamp.

use super::{fmt_ts, now_str, parse_ts, DbPool};
use crate::error::StorageError;
use crate::model::Document;
use crate::signals::Signals;

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: String,
    content: String,
    source_type: String,
    source_ref: String,
    metadata_json: String,
    signals_json: Option<String>,
    created_at: String,
    processed_at: Option<String>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            content: row.content,
            source_type: row.source_type,
            source_ref: row.source_ref,
            metadata: serde_json::from_str(&row.metadata_json).unwrap_or_default(),
            signals: row
                .signals_json
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok()),
            created_at: parse_ts(&row.created_at),
            processed_at: row.processed_at.as_deref().map(parse_ts),
        }
    }
}

/// Insert a new document.
pub async fn insert(pool: &DbPool, document: &Document) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO documents \
         (id, content, source_type, source_ref, metadata_json, signals_json, created_at, processed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&document.id)
    .bind(&document.content)
    .bind(&document.source_type)
    .bind(&document.source_ref)
    .bind(document.metadata.to_string())
    .bind(
        document
            .signals
            .as_ref()
            .map(|s| serde_json::to_string(s).unwrap_or_default()),
    )
    .bind(fmt_ts(document.created_at))
    .bind(document.processed_at.map(fmt_ts))
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Fetch a document by id.
pub async fn get(pool: &DbPool, id: &str) -> Result<Option<Document>, StorageError> {
    let row: Option<DocumentRow> = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(Document::from))
}

/// Attach a document to a case.
pub async fn attach_to_case(
    pool: &DbPool,
    case_id: &str,
    document_id: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT OR IGNORE INTO case_documents (case_id, document_id, added_at) VALUES (?, ?, ?)",
    )
    .bind(case_id)
    .bind(document_id)
    .bind(now_str())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Attach Tier 0 signals to a document.
///
/// The annotation happens once: a document that already carries signals
/// is left untouched. Returns whether the row was written.
pub async fn set_signals(
    pool: &DbPool,
    document_id: &str,
    signals: &Signals,
) -> Result<bool, StorageError> {
    let json = serde_json::to_string(signals).unwrap_or_default();
    let result = sqlx::query(
        "UPDATE documents SET signals_json = ? WHERE id = ? AND signals_json IS NULL",
    )
    .bind(json)
    .bind(document_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() > 0)
}

/// Stamp a document as successfully processed by Tier 1.
pub async fn mark_processed(pool: &DbPool, document_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE documents SET processed_at = ? WHERE id = ?")
        .bind(now_str())
        .bind(document_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// All documents attached to a case, oldest first.
pub async fn for_case(pool: &DbPool, case_id: &str) -> Result<Vec<Document>, StorageError> {
    let rows: Vec<DocumentRow> = sqlx::query_as(
        "SELECT d.* FROM documents d \
         JOIN case_documents cd ON cd.document_id = d.id \
         WHERE cd.case_id = ? ORDER BY cd.added_at",
    )
    .bind(case_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(rows.into_iter().map(Document::from).collect())
}

/// Count all documents attached to a case.
pub async fn count_for_case(pool: &DbPool, case_id: &str) -> Result<i64, StorageError> {
    let row: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM case_documents WHERE case_id = ?")
            .bind(case_id)
            .fetch_one(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}

/// Count documents in a case that have not been processed yet.
pub async fn unprocessed_count(pool: &DbPool, case_id: &str) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM documents d \
         JOIN case_documents cd ON cd.document_id = d.id \
         WHERE cd.case_id = ? AND d.processed_at IS NULL",
    )
    .bind(case_id)
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}
