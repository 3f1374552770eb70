//! Per-run processing state, persisted for resumability and run comparison.

use super::{fmt_ts, now_str, parse_ts, DbPool};
use crate::error::StorageError;
use crate::model::{new_id, ProcessingState};

#[derive(sqlx::FromRow)]
struct StateRow {
    run_id: String,
    case_id: Option<String>,
    current_tier: i64,
    documents_processed: i64,
    documents_total: i64,
    insights_extracted: i64,
    patterns_found: i64,
    passes_completed: i64,
    status: String,
    error: Option<String>,
    started_at: String,
    completed_at: Option<String>,
}

impl From<StateRow> for ProcessingState {
    fn from(row: StateRow) -> Self {
        ProcessingState {
            run_id: row.run_id,
            case_id: row.case_id,
            current_tier: u32::try_from(row.current_tier).unwrap_or(0),
            documents_processed: u32::try_from(row.documents_processed).unwrap_or(0),
            documents_total: u32::try_from(row.documents_total).unwrap_or(0),
            insights_extracted: u32::try_from(row.insights_extracted).unwrap_or(0),
            patterns_found: u32::try_from(row.patterns_found).unwrap_or(0),
            passes_completed: u32::try_from(row.passes_completed).unwrap_or(0),
            status: row.status,
            error: row.error,
            started_at: parse_ts(&row.started_at),
            completed_at: row.completed_at.as_deref().map(parse_ts),
        }
    }
}

/// Start a new run for a case. Returns the run id.
pub async fn start(
    pool: &DbPool,
    case_id: Option<&str>,
    documents_total: u32,
) -> Result<String, StorageError> {
    let run_id = new_id();
    sqlx::query(
        "INSERT INTO processing_state \
         (run_id, case_id, current_tier, documents_processed, documents_total, \
          insights_extracted, patterns_found, passes_completed, status, started_at) \
         VALUES (?, ?, 0, 0, ?, 0, 0, 0, 'running', ?)",
    )
    .bind(&run_id)
    .bind(case_id)
    .bind(documents_total)
    .bind(now_str())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(run_id)
}

/// Persist a progress snapshot.
pub async fn save(pool: &DbPool, state: &ProcessingState) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE processing_state SET \
           current_tier = ?, documents_processed = ?, documents_total = ?, \
           insights_extracted = ?, patterns_found = ?, passes_completed = ?, \
           status = ?, error = ?, completed_at = ? \
         WHERE run_id = ?",
    )
    .bind(state.current_tier)
    .bind(state.documents_processed)
    .bind(state.documents_total)
    .bind(state.insights_extracted)
    .bind(state.patterns_found)
    .bind(state.passes_completed)
    .bind(&state.status)
    .bind(&state.error)
    .bind(state.completed_at.map(fmt_ts))
    .bind(&state.run_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Load the state for a run.
pub async fn load(pool: &DbPool, run_id: &str) -> Result<Option<ProcessingState>, StorageError> {
    let row: Option<StateRow> = sqlx::query_as("SELECT * FROM processing_state WHERE run_id = ?")
        .bind(run_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(ProcessingState::from))
}

/// The most recent run for a case, if any.
pub async fn latest_for_case(
    pool: &DbPool,
    case_id: &str,
) -> Result<Option<ProcessingState>, StorageError> {
    let row: Option<StateRow> = sqlx::query_as(
        "SELECT * FROM processing_state WHERE case_id = ? ORDER BY started_at DESC LIMIT 1",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(ProcessingState::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn start_save_load_round_trip() {
        let pool = init_test_db().await.expect("init db");

        let run_id = start(&pool, None, 10).await.expect("start");
        let mut state = load(&pool, &run_id).await.expect("load").expect("found");
        assert_eq!(state.status, "running");
        assert_eq!(state.documents_total, 10);

        state.documents_processed = 7;
        state.insights_extracted = 14;
        state.current_tier = 1;
        save(&pool, &state).await.expect("save");

        let reloaded = load(&pool, &run_id).await.expect("load").expect("found");
        assert_eq!(reloaded.documents_processed, 7);
        assert_eq!(reloaded.insights_extracted, 14);
        assert_eq!(reloaded.current_tier, 1);
    }

    #[tokio::test]
    async fn latest_for_case_picks_newest() {
        let pool = init_test_db().await.expect("init db");
        let case = crate::storage::cases::create(&pool, "c", "").await.expect("case");

        let _old = start(&pool, Some(&case.id), 1).await.expect("start");
        let newest = start(&pool, Some(&case.id), 2).await.expect("start");

        let latest = latest_for_case(&pool, &case.id).await.expect("latest").expect("found");
        assert_eq!(latest.run_id, newest);
    }
}
