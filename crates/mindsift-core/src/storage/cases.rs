//! CRUD operations for cases and their timelines.
//!
//! State transitions are compare-and-set on the current state and journal
//! a timeline event in the same transaction, so the timeline is a complete
//! record of every transition that actually happened.

use super::{now_str, parse_ts, DbPool};
use crate::error::StorageError;
use crate::model::{new_id, Case, CaseState, TimelineEvent};

#[derive(sqlx::FromRow)]
struct CaseRow {
    id: String,
    title: String,
    description: String,
    state: String,
    cancel_requested: i64,
    created_at: String,
    updated_at: String,
}

impl From<CaseRow> for Case {
    fn from(row: CaseRow) -> Self {
        Case {
            id: row.id,
            title: row.title,
            description: row.description,
            state: CaseState::parse(&row.state),
            cancel_requested: row.cancel_requested != 0,
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

/// Create a new case in the `uploading` state.
pub async fn create(pool: &DbPool, title: &str, description: &str) -> Result<Case, StorageError> {
    let now = now_str();
    let case = Case {
        id: new_id(),
        title: title.to_string(),
        description: description.to_string(),
        state: CaseState::Uploading,
        cancel_requested: false,
        created_at: parse_ts(&now),
        updated_at: parse_ts(&now),
    };

    sqlx::query(
        "INSERT INTO cases (id, title, description, state, cancel_requested, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 0, ?, ?)",
    )
    .bind(&case.id)
    .bind(&case.title)
    .bind(&case.description)
    .bind(case.state.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(case)
}

/// Fetch a case by id.
pub async fn get(pool: &DbPool, id: &str) -> Result<Option<Case>, StorageError> {
    let row: Option<CaseRow> = sqlx::query_as("SELECT * FROM cases WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(Case::from))
}

/// List all cases, newest first.
pub async fn list(pool: &DbPool) -> Result<Vec<Case>, StorageError> {
    let rows: Vec<CaseRow> = sqlx::query_as("SELECT * FROM cases ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(rows.into_iter().map(Case::from).collect())
}

/// Atomically move a case from `from` to `to` and journal the transition.
///
/// Compare-and-set on the current state: returns `false` without writing
/// anything when another worker already moved the case.
pub async fn transition(
    pool: &DbPool,
    case_id: &str,
    from: CaseState,
    to: CaseState,
    cause: &str,
) -> Result<bool, StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let now = now_str();
    let result = sqlx::query("UPDATE cases SET state = ?, updated_at = ? WHERE id = ? AND state = ?")
        .bind(to.as_str())
        .bind(&now)
        .bind(case_id)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    if result.rows_affected() == 0 {
        tx.rollback()
            .await
            .map_err(|e| StorageError::Query { source: e })?;
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO timeline_events (case_id, from_state, to_state, cause, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(case_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(cause)
    .bind(&now)
    .execute(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    tracing::info!(case_id, from = from.as_str(), to = to.as_str(), cause, "case transition");
    Ok(true)
}

/// Flag a case for cancellation. Workers observe the flag between
/// store operations and at LLM-call boundaries.
pub async fn request_cancel(pool: &DbPool, case_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE cases SET cancel_requested = 1, updated_at = ? WHERE id = ?")
        .bind(now_str())
        .bind(case_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Whether cancellation has been requested for a case.
pub async fn is_cancel_requested(pool: &DbPool, case_id: &str) -> Result<bool, StorageError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT cancel_requested FROM cases WHERE id = ?")
        .bind(case_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.is_some_and(|r| r.0 != 0))
}

/// The journaled transition history for a case, oldest first.
pub async fn timeline(pool: &DbPool, case_id: &str) -> Result<Vec<TimelineEvent>, StorageError> {
    let rows: Vec<(i64, String, String, String, String, String)> = sqlx::query_as(
        "SELECT id, case_id, from_state, to_state, cause, created_at \
         FROM timeline_events WHERE case_id = ? ORDER BY id",
    )
    .bind(case_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(rows
        .into_iter()
        .map(|(id, case_id, from_state, to_state, cause, created_at)| TimelineEvent {
            id,
            case_id,
            from_state: CaseState::parse(&from_state),
            to_state: CaseState::parse(&to_state),
            cause,
            created_at: parse_ts(&created_at),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn create_and_get() {
        let pool = init_test_db().await.expect("init db");
        let case = create(&pool, "My corpus", "chat exports 2019-2024").await.expect("create");

        let fetched = get(&pool, &case.id).await.expect("get").expect("found");
        assert_eq!(fetched.title, "My corpus");
        assert_eq!(fetched.state, CaseState::Uploading);
        assert!(!fetched.cancel_requested);
    }

    #[tokio::test]
    async fn transition_journals_event() {
        let pool = init_test_db().await.expect("init db");
        let case = create(&pool, "c", "").await.expect("create");

        let moved = transition(
            &pool,
            &case.id,
            CaseState::Uploading,
            CaseState::Scanning,
            "first file ingested",
        )
        .await
        .expect("transition");
        assert!(moved);

        let events = timeline(&pool, &case.id).await.expect("timeline");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from_state, CaseState::Uploading);
        assert_eq!(events[0].to_state, CaseState::Scanning);
        assert_eq!(events[0].cause, "first file ingested");
    }

    #[tokio::test]
    async fn transition_cas_fails_on_stale_state() {
        let pool = init_test_db().await.expect("init db");
        let case = create(&pool, "c", "").await.expect("create");

        // Case is in uploading, not processing
        let moved = transition(
            &pool,
            &case.id,
            CaseState::Processing,
            CaseState::Complete,
            "queue drained",
        )
        .await
        .expect("transition");
        assert!(!moved);

        // No phantom journal entry
        assert!(timeline(&pool, &case.id).await.expect("timeline").is_empty());
    }

    #[tokio::test]
    async fn cancel_flag_round_trip() {
        let pool = init_test_db().await.expect("init db");
        let case = create(&pool, "c", "").await.expect("create");

        assert!(!is_cancel_requested(&pool, &case.id).await.expect("check"));
        request_cancel(&pool, &case.id).await.expect("cancel");
        assert!(is_cancel_requested(&pool, &case.id).await.expect("check"));
    }
}
