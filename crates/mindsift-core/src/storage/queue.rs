//! The durable work queue.
//!
//! Lease-based claiming: a worker atomically claims the oldest visible
//! item, holds it for a bounded lease, and completes it with a
//! compare-and-set on the lease token. Expired leases become claimable
//! again, so a crashed worker's items are picked up by its peers.
//! FIFO is per `(case_id, enqueued_at)`; no global ordering is promised.

use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;

use super::{fmt_ts, now_str, parse_ts, DbPool};
use crate::error::StorageError;
use crate::model::{new_id, QueueItem, QueueKind, QueueStatus};

#[derive(sqlx::FromRow)]
struct QueueRow {
    id: String,
    case_id: Option<String>,
    kind: String,
    payload_json: String,
    attempts: i64,
    status: String,
    lease_token: Option<String>,
    leased_until: Option<String>,
    next_visible_at: String,
    enqueued_at: String,
    last_error: Option<String>,
}

impl From<QueueRow> for QueueItem {
    fn from(row: QueueRow) -> Self {
        QueueItem {
            id: row.id,
            case_id: row.case_id,
            kind: QueueKind::parse(&row.kind).unwrap_or(QueueKind::Extract),
            payload: serde_json::from_str(&row.payload_json).unwrap_or_default(),
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            status: QueueStatus::parse(&row.status),
            lease_token: row.lease_token,
            leased_until: row.leased_until.as_deref().map(parse_ts),
            next_visible_at: parse_ts(&row.next_visible_at),
            enqueued_at: parse_ts(&row.enqueued_at),
            last_error: row.last_error,
        }
    }
}

/// Enqueue a work item, immediately visible.
pub async fn enqueue(
    pool: &DbPool,
    case_id: Option<&str>,
    kind: QueueKind,
    payload: &serde_json::Value,
) -> Result<QueueItem, StorageError> {
    let now = now_str();
    let id = new_id();

    sqlx::query(
        "INSERT INTO queue \
         (id, case_id, kind, payload_json, attempts, status, next_visible_at, enqueued_at) \
         VALUES (?, ?, ?, ?, 0, 'queued', ?, ?)",
    )
    .bind(&id)
    .bind(case_id)
    .bind(kind.as_str())
    .bind(payload.to_string())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(QueueItem {
        id,
        case_id: case_id.map(str::to_string),
        kind,
        payload: payload.clone(),
        attempts: 0,
        status: QueueStatus::Queued,
        lease_token: None,
        leased_until: None,
        next_visible_at: parse_ts(&now),
        enqueued_at: parse_ts(&now),
        last_error: None,
    })
}

/// Atomically claim the next visible item, optionally filtered by kind.
///
/// Claims the oldest `queued` item whose `next_visible_at` has passed, or
/// a `leased` item whose lease has expired. The claim bumps `attempts`
/// and installs a fresh lease token.
pub async fn claim_next(
    pool: &DbPool,
    kind: Option<QueueKind>,
    lease_ms: u64,
) -> Result<Option<QueueItem>, StorageError> {
    let now = now_str();
    let leased_until = fmt_ts(Utc::now() + ChronoDuration::milliseconds(i64::try_from(lease_ms).unwrap_or(60_000)));
    let token = new_id();
    let kind_str = kind.map(QueueKind::as_str);

    let row: Option<QueueRow> = sqlx::query_as(
        "UPDATE queue SET \
           status = 'leased', lease_token = ?, leased_until = ?, attempts = attempts + 1 \
         WHERE id = ( \
           SELECT id FROM queue \
           WHERE ((status = 'queued' AND next_visible_at <= ?) \
                  OR (status = 'leased' AND leased_until <= ?)) \
             AND (? IS NULL OR kind = ?) \
           ORDER BY enqueued_at LIMIT 1 \
         ) \
         RETURNING *",
    )
    .bind(&token)
    .bind(&leased_until)
    .bind(&now)
    .bind(&now)
    .bind(kind_str)
    .bind(kind_str)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(row.map(QueueItem::from))
}

/// Mark an item done, but only while the lease is still ours.
///
/// Returns `false` when the lease was lost (expired and reclaimed);
/// the caller must discard its work's side effects where possible.
pub async fn complete(
    pool: &DbPool,
    item_id: &str,
    lease_token: &str,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE queue SET status = 'done', lease_token = NULL, leased_until = NULL \
         WHERE id = ? AND lease_token = ? AND status = 'leased'",
    )
    .bind(item_id)
    .bind(lease_token)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() > 0)
}

/// Record a failure. Requeues with `delay` backoff until `max_attempts`
/// is exhausted, then marks the item `failed`.
///
/// Returns the resulting status, or `None` when the lease was lost.
pub async fn fail(
    pool: &DbPool,
    item_id: &str,
    lease_token: &str,
    error: &str,
    delay: Duration,
    max_attempts: u32,
) -> Result<Option<QueueStatus>, StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT attempts FROM queue WHERE id = ? AND lease_token = ? AND status = 'leased'",
    )
    .bind(item_id)
    .bind(lease_token)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    let Some((attempts,)) = row else {
        tx.rollback()
            .await
            .map_err(|e| StorageError::Query { source: e })?;
        return Ok(None);
    };

    let status = if attempts >= i64::from(max_attempts) {
        sqlx::query(
            "UPDATE queue SET status = 'failed', last_error = ?, lease_token = NULL, \
             leased_until = NULL WHERE id = ?",
        )
        .bind(error)
        .bind(item_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
        QueueStatus::Failed
    } else {
        let visible_at = fmt_ts(
            Utc::now()
                + ChronoDuration::milliseconds(
                    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX),
                ),
        );
        sqlx::query(
            "UPDATE queue SET status = 'queued', last_error = ?, lease_token = NULL, \
             leased_until = NULL, next_visible_at = ? WHERE id = ?",
        )
        .bind(error)
        .bind(visible_at)
        .bind(item_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
        QueueStatus::Queued
    };

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(Some(status))
}

/// Fetch an item by id.
pub async fn get(pool: &DbPool, item_id: &str) -> Result<Option<QueueItem>, StorageError> {
    let row: Option<QueueRow> = sqlx::query_as("SELECT * FROM queue WHERE id = ?")
        .bind(item_id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(QueueItem::from))
}

/// Count items for a case that are not yet done or failed.
pub async fn pending_count(pool: &DbPool, case_id: &str) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM queue WHERE case_id = ? AND status NOT IN ('done', 'failed')",
    )
    .bind(case_id)
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}

/// Whether a `(case, kind)` item already exists that is not done/failed.
pub async fn has_pending(
    pool: &DbPool,
    case_id: &str,
    kind: QueueKind,
) -> Result<bool, StorageError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM queue WHERE case_id = ? AND kind = ? \
         AND status NOT IN ('done', 'failed'))",
    )
    .bind(case_id)
    .bind(kind.as_str())
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0 == 1)
}

/// Per-tier succeeded/failed counters for the user-visible case view.
#[derive(Debug, serde::Serialize)]
pub struct TierCounters {
    pub kind: String,
    pub done: i64,
    pub failed: i64,
    pub pending: i64,
}

/// Aggregate queue progress for a case, grouped by kind.
pub async fn tier_counters(pool: &DbPool, case_id: &str) -> Result<Vec<TierCounters>, StorageError> {
    let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
        "SELECT kind, \
           SUM(CASE WHEN status = 'done' THEN 1 ELSE 0 END), \
           SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), \
           SUM(CASE WHEN status NOT IN ('done', 'failed') THEN 1 ELSE 0 END) \
         FROM queue WHERE case_id = ? GROUP BY kind ORDER BY kind",
    )
    .bind(case_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(rows
        .into_iter()
        .map(|(kind, done, failed, pending)| TierCounters {
            kind,
            done,
            failed,
            pending,
        })
        .collect())
}

/// Human-readable failure list for a case: `(kind, last_error)` pairs.
pub async fn failures(pool: &DbPool, case_id: &str) -> Result<Vec<(String, String)>, StorageError> {
    let rows: Vec<(String, Option<String>)> = sqlx::query_as(
        "SELECT kind, last_error FROM queue WHERE case_id = ? AND status = 'failed' \
         ORDER BY enqueued_at",
    )
    .bind(case_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(rows
        .into_iter()
        .map(|(kind, err)| (kind, err.unwrap_or_else(|| "unknown error".to_string())))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn enqueue_and_claim_fifo() {
        let pool = init_test_db().await.expect("init db");

        let first = enqueue(&pool, None, QueueKind::Extract, &serde_json::json!({"doc": "a"}))
            .await
            .expect("enqueue");
        let _second = enqueue(&pool, None, QueueKind::Extract, &serde_json::json!({"doc": "b"}))
            .await
            .expect("enqueue");

        let claimed = claim_next(&pool, None, 60_000).await.expect("claim").expect("item");
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, QueueStatus::Leased);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.lease_token.is_some());
    }

    #[tokio::test]
    async fn claim_filters_by_kind() {
        let pool = init_test_db().await.expect("init db");
        enqueue(&pool, None, QueueKind::Extract, &serde_json::json!({}))
            .await
            .expect("enqueue");

        assert!(claim_next(&pool, Some(QueueKind::Correlate), 60_000)
            .await
            .expect("claim")
            .is_none());
        assert!(claim_next(&pool, Some(QueueKind::Extract), 60_000)
            .await
            .expect("claim")
            .is_some());
    }

    #[tokio::test]
    async fn complete_cas_on_lease_token() {
        let pool = init_test_db().await.expect("init db");
        enqueue(&pool, None, QueueKind::Extract, &serde_json::json!({}))
            .await
            .expect("enqueue");

        let claimed = claim_next(&pool, None, 60_000).await.expect("claim").expect("item");
        let token = claimed.lease_token.clone().expect("token");

        // Wrong token: refused
        assert!(!complete(&pool, &claimed.id, "stolen").await.expect("complete"));
        // Right token: done exactly once
        assert!(complete(&pool, &claimed.id, &token).await.expect("complete"));
        assert!(!complete(&pool, &claimed.id, &token).await.expect("complete"));

        let item = get(&pool, &claimed.id).await.expect("get").expect("found");
        assert_eq!(item.status, QueueStatus::Done);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let pool = init_test_db().await.expect("init db");
        enqueue(&pool, None, QueueKind::Extract, &serde_json::json!({}))
            .await
            .expect("enqueue");

        // Claim with an already-expired lease to simulate a dead worker
        let crashed = claim_next(&pool, None, 0).await.expect("claim").expect("item");

        let reclaimed = claim_next(&pool, None, 60_000).await.expect("claim").expect("item");
        assert_eq!(reclaimed.id, crashed.id);
        assert_eq!(reclaimed.attempts, 2);
        assert_ne!(reclaimed.lease_token, crashed.lease_token);

        // The crashed worker's completion is refused
        let stale = crashed.lease_token.expect("token");
        assert!(!complete(&pool, &crashed.id, &stale).await.expect("complete"));
    }

    #[tokio::test]
    async fn fail_requeues_with_backoff_then_fails() {
        let pool = init_test_db().await.expect("init db");
        let case = crate::storage::cases::create(&pool, "t", "d").await.expect("case");
        enqueue(&pool, Some(case.id.as_str()), QueueKind::Extract, &serde_json::json!({}))
            .await
            .expect("enqueue");

        // Attempt 1: requeued
        let claimed = claim_next(&pool, None, 60_000).await.expect("claim").expect("item");
        let token = claimed.lease_token.clone().expect("token");
        let status = fail(&pool, &claimed.id, &token, "boom", Duration::ZERO, 2)
            .await
            .expect("fail")
            .expect("status");
        assert_eq!(status, QueueStatus::Queued);

        // Attempt 2: attempts exhausted, marked failed
        let claimed = claim_next(&pool, None, 60_000).await.expect("claim").expect("item");
        let token = claimed.lease_token.clone().expect("token");
        let status = fail(&pool, &claimed.id, &token, "boom again", Duration::ZERO, 2)
            .await
            .expect("fail")
            .expect("status");
        assert_eq!(status, QueueStatus::Failed);

        let failures = failures(&pool, &case.id).await.expect("failures");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].1, "boom again");
    }

    #[tokio::test]
    async fn fail_with_lost_lease_returns_none() {
        let pool = init_test_db().await.expect("init db");
        enqueue(&pool, None, QueueKind::Extract, &serde_json::json!({}))
            .await
            .expect("enqueue");
        let claimed = claim_next(&pool, None, 60_000).await.expect("claim").expect("item");

        let result = fail(&pool, &claimed.id, "wrong-token", "boom", Duration::ZERO, 3)
            .await
            .expect("fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn backoff_delays_visibility() {
        let pool = init_test_db().await.expect("init db");
        enqueue(&pool, None, QueueKind::Extract, &serde_json::json!({}))
            .await
            .expect("enqueue");

        let claimed = claim_next(&pool, None, 60_000).await.expect("claim").expect("item");
        let token = claimed.lease_token.clone().expect("token");
        fail(&pool, &claimed.id, &token, "transient", Duration::from_secs(3600), 5)
            .await
            .expect("fail");

        // Not visible again until the backoff elapses
        assert!(claim_next(&pool, None, 60_000).await.expect("claim").is_none());
    }

    #[tokio::test]
    async fn counters_and_pending() {
        let pool = init_test_db().await.expect("init db");
        let case = crate::storage::cases::create(&pool, "t", "d").await.expect("case");
        let c1 = case.id.as_str();

        enqueue(&pool, Some(c1), QueueKind::Extract, &serde_json::json!({}))
            .await
            .expect("enqueue");
        enqueue(&pool, Some(c1), QueueKind::Correlate, &serde_json::json!({}))
            .await
            .expect("enqueue");

        assert_eq!(pending_count(&pool, c1).await.expect("count"), 2);
        assert!(has_pending(&pool, c1, QueueKind::Extract).await.expect("has"));

        let claimed = claim_next(&pool, Some(QueueKind::Extract), 60_000)
            .await
            .expect("claim")
            .expect("item");
        complete(&pool, &claimed.id, claimed.lease_token.as_deref().expect("token"))
            .await
            .expect("complete");

        assert_eq!(pending_count(&pool, c1).await.expect("count"), 1);
        assert!(!has_pending(&pool, c1, QueueKind::Extract).await.expect("has"));

        let counters = tier_counters(&pool, c1).await.expect("counters");
        let extract = counters.iter().find(|c| c.kind == "extract").expect("extract row");
        assert_eq!(extract.done, 1);
        assert_eq!(extract.pending, 0);
    }
}
