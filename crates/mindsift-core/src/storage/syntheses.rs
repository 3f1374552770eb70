//! CRUD operations for Tier 3 syntheses. Append-only per run.

use super::{fmt_ts, parse_ts, DbPool};
use crate::error::StorageError;
use crate::model::Synthesis;

#[derive(sqlx::FromRow)]
struct SynthesisRow {
    id: String,
    summary: String,
    synthesis_type: String,
    pattern_ids_json: String,
    significance: f64,
    confidence: f64,
    metadata_json: String,
    case_id: Option<String>,
    run_id: Option<String>,
    created_at: String,
}

impl From<SynthesisRow> for Synthesis {
    fn from(row: SynthesisRow) -> Self {
        Synthesis {
            id: row.id,
            summary: row.summary,
            synthesis_type: row.synthesis_type,
            pattern_ids: serde_json::from_str(&row.pattern_ids_json).unwrap_or_default(),
            significance: row.significance,
            confidence: row.confidence,
            metadata: serde_json::from_str(&row.metadata_json).unwrap_or_default(),
            case_id: row.case_id,
            run_id: row.run_id,
            created_at: parse_ts(&row.created_at),
        }
    }
}

/// Insert a synthesis.
pub async fn insert(pool: &DbPool, synthesis: &Synthesis) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO syntheses \
         (id, summary, synthesis_type, pattern_ids_json, significance, confidence, metadata_json, \
          case_id, run_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&synthesis.id)
    .bind(&synthesis.summary)
    .bind(&synthesis.synthesis_type)
    .bind(serde_json::to_string(&synthesis.pattern_ids).unwrap_or_else(|_| "[]".to_string()))
    .bind(synthesis.significance)
    .bind(synthesis.confidence)
    .bind(synthesis.metadata.to_string())
    .bind(&synthesis.case_id)
    .bind(&synthesis.run_id)
    .bind(fmt_ts(synthesis.created_at))
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// All syntheses, optionally scoped to a case, newest first.
pub async fn list(pool: &DbPool, case_id: Option<&str>) -> Result<Vec<Synthesis>, StorageError> {
    let query = if case_id.is_some() {
        "SELECT * FROM syntheses WHERE case_id = ? ORDER BY created_at DESC"
    } else {
        "SELECT * FROM syntheses ORDER BY created_at DESC"
    };
    let mut q = sqlx::query_as::<_, SynthesisRow>(query);
    if let Some(case_id) = case_id {
        q = q.bind(case_id);
    }
    let rows = q
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(rows.into_iter().map(Synthesis::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_id;
    use crate::storage::init_test_db;
    use chrono::Utc;

    #[tokio::test]
    async fn insert_and_list_round_trip() {
        let pool = init_test_db().await.expect("init db");

        let synthesis = Synthesis {
            id: new_id(),
            summary: "A long arc of retreat from close relationships".to_string(),
            synthesis_type: "narrative".to_string(),
            pattern_ids: ["p1".to_string(), "p2".to_string()].into_iter().collect(),
            significance: 0.7,
            confidence: 0.65,
            metadata: serde_json::json!({"pattern_count": 2}),
            case_id: None,
            run_id: Some("run-1".to_string()),
            created_at: Utc::now(),
        };
        insert(&pool, &synthesis).await.expect("insert");

        let all = list(&pool, None).await.expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].pattern_ids.len(), 2);
        assert_eq!(all[0].synthesis_type, "narrative");
    }
}
