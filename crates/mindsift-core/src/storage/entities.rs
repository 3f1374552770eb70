//! Storage for the entity registry, blocklist, and relationship graph.
//!
//! Identity is `(entity_type, normalised_value)`. A duplicate insert is a
//! merge-update (mention count bump), not an error. Relationship upserts
//! are single-statement and safe under concurrent writers.

use super::{fmt_ts, now_str, parse_ts, DbPool};
use crate::error::StorageError;
use crate::model::{ConfidenceBand, Entity, EntityType, Relationship};

#[derive(sqlx::FromRow)]
struct EntityRow {
    id: String,
    entity_type: String,
    raw_value: String,
    normalised_value: String,
    display_name: String,
    merged_into_id: Option<String>,
    confidence_band: String,
    mention_count: i64,
    created_at: String,
    updated_at: String,
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Entity {
            id: row.id,
            entity_type: EntityType::parse(&row.entity_type).unwrap_or(EntityType::Person),
            raw_value: row.raw_value,
            normalised_value: row.normalised_value,
            display_name: row.display_name,
            merged_into_id: row.merged_into_id,
            confidence_band: ConfidenceBand::parse(&row.confidence_band),
            mention_count: u32::try_from(row.mention_count).unwrap_or(1),
            created_at: parse_ts(&row.created_at),
            updated_at: parse_ts(&row.updated_at),
        }
    }
}

/// Insert an entity, or bump the mention count of the existing row with
/// the same `(entity_type, normalised_value)` identity. Returns the
/// stored row either way.
pub async fn upsert(pool: &DbPool, entity: &Entity) -> Result<Entity, StorageError> {
    let row: EntityRow = sqlx::query_as(
        "INSERT INTO entity_registry \
         (id, entity_type, raw_value, normalised_value, display_name, merged_into_id, \
          confidence_band, mention_count, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(entity_type, normalised_value) DO UPDATE SET \
           mention_count = mention_count + 1, \
           updated_at = excluded.updated_at \
         RETURNING *",
    )
    .bind(&entity.id)
    .bind(entity.entity_type.as_str())
    .bind(&entity.raw_value)
    .bind(&entity.normalised_value)
    .bind(&entity.display_name)
    .bind(&entity.merged_into_id)
    .bind(entity.confidence_band.as_str())
    .bind(i64::from(entity.mention_count))
    .bind(fmt_ts(entity.created_at))
    .bind(fmt_ts(entity.updated_at))
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(Entity::from(row))
}

/// Fetch an entity by id.
pub async fn get(pool: &DbPool, id: &str) -> Result<Option<Entity>, StorageError> {
    let row: Option<EntityRow> = sqlx::query_as("SELECT * FROM entity_registry WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(Entity::from))
}

/// Fetch an entity by its canonical identity.
pub async fn find_by_identity(
    pool: &DbPool,
    entity_type: EntityType,
    normalised_value: &str,
) -> Result<Option<Entity>, StorageError> {
    let row: Option<EntityRow> = sqlx::query_as(
        "SELECT * FROM entity_registry WHERE entity_type = ? AND normalised_value = ?",
    )
    .bind(entity_type.as_str())
    .bind(normalised_value)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.map(Entity::from))
}

/// Point an entity at its merge target.
pub async fn set_merged_into(
    pool: &DbPool,
    entity_id: &str,
    target_id: &str,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE entity_registry SET merged_into_id = ?, updated_at = ? WHERE id = ?")
        .bind(target_id)
        .bind(now_str())
        .bind(entity_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Update an entity's type and confidence band (LLM validation outcome).
pub async fn reclassify(
    pool: &DbPool,
    entity_id: &str,
    entity_type: EntityType,
    band: ConfidenceBand,
) -> Result<(), StorageError> {
    sqlx::query(
        "UPDATE entity_registry SET entity_type = ?, confidence_band = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(entity_type.as_str())
    .bind(band.as_str())
    .bind(now_str())
    .bind(entity_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Delete an entity row (LLM validation rejected it).
pub async fn delete(pool: &DbPool, entity_id: &str) -> Result<(), StorageError> {
    sqlx::query("DELETE FROM entity_registry WHERE id = ?")
        .bind(entity_id)
        .execute(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// Count unmerged entities in a confidence band.
pub async fn count_by_band(
    pool: &DbPool,
    band: ConfidenceBand,
) -> Result<i64, StorageError> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM entity_registry \
         WHERE confidence_band = ? AND merged_into_id IS NULL",
    )
    .bind(band.as_str())
    .fetch_one(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(row.0)
}

// ── Blocklist ───────────────────────────────────────────────────────

/// Check the blocklist for a candidate. A hit bumps the rejection
/// counter and returns `true`.
pub async fn blocklist_hit(
    pool: &DbPool,
    entity_type: EntityType,
    normalised_value: &str,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE entity_blacklist SET rejection_count = rejection_count + 1 \
         WHERE normalised_value = ? AND entity_type = ?",
    )
    .bind(normalised_value)
    .bind(entity_type.as_str())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(result.rows_affected() > 0)
}

/// Add a value to the blocklist (or bump its counter if present).
pub async fn blocklist_add(
    pool: &DbPool,
    entity_type: EntityType,
    normalised_value: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO entity_blacklist (normalised_value, entity_type, rejection_count, created_at) \
         VALUES (?, ?, 1, ?) \
         ON CONFLICT(normalised_value, entity_type) DO UPDATE SET \
           rejection_count = rejection_count + 1",
    )
    .bind(normalised_value)
    .bind(entity_type.as_str())
    .bind(now_str())
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

// ── Relationships ───────────────────────────────────────────────────

fn relationship_from_row(
    row: (String, String, String, f64, String, String),
) -> Relationship {
    Relationship {
        from_id: row.0,
        to_id: row.1,
        relation_type: row.2,
        weight: row.3,
        first_seen: parse_ts(&row.4),
        last_seen: parse_ts(&row.5),
    }
}

/// Upsert a directed edge: weight += 1 and `last_seen` refresh on conflict.
pub async fn relationship_upsert(
    pool: &DbPool,
    from_id: &str,
    to_id: &str,
    relation_type: &str,
) -> Result<(), StorageError> {
    let now = now_str();
    sqlx::query(
        "INSERT INTO relationships (from_id, to_id, relation_type, weight, first_seen, last_seen) \
         VALUES (?, ?, ?, 1.0, ?, ?) \
         ON CONFLICT(from_id, to_id, relation_type) DO UPDATE SET \
           weight = weight + 1.0, \
           last_seen = excluded.last_seen",
    )
    .bind(from_id)
    .bind(to_id)
    .bind(relation_type)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

/// All edges touching an id, in either direction.
pub async fn relationships_for(
    pool: &DbPool,
    id: &str,
) -> Result<Vec<Relationship>, StorageError> {
    let rows: Vec<(String, String, String, f64, String, String)> = sqlx::query_as(
        "SELECT from_id, to_id, relation_type, weight, first_seen, last_seen \
         FROM relationships WHERE from_id = ? OR to_id = ? ORDER BY weight DESC",
    )
    .bind(id)
    .bind(id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(rows.into_iter().map(relationship_from_row).collect())
}

/// Outgoing edges of one relation type, heaviest first, capped at `limit`.
pub async fn top_related(
    pool: &DbPool,
    from_id: &str,
    relation_type: &str,
    limit: i64,
) -> Result<Vec<Relationship>, StorageError> {
    let rows: Vec<(String, String, String, f64, String, String)> = sqlx::query_as(
        "SELECT from_id, to_id, relation_type, weight, first_seen, last_seen \
         FROM relationships WHERE from_id = ? AND relation_type = ? \
         ORDER BY weight DESC LIMIT ?",
    )
    .bind(from_id)
    .bind(relation_type)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;
    Ok(rows.into_iter().map(relationship_from_row).collect())
}

/// Rewrite every edge referencing `old_id` to reference `new_id`,
/// merging weights where the rewritten edge already exists.
pub async fn rewrite_edges(
    pool: &DbPool,
    old_id: &str,
    new_id: &str,
) -> Result<(), StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    let edges: Vec<(String, String, String, f64, String, String)> = sqlx::query_as(
        "SELECT from_id, to_id, relation_type, weight, first_seen, last_seen \
         FROM relationships WHERE from_id = ? OR to_id = ?",
    )
    .bind(old_id)
    .bind(old_id)
    .fetch_all(&mut *tx)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    sqlx::query("DELETE FROM relationships WHERE from_id = ? OR to_id = ?")
        .bind(old_id)
        .bind(old_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    for (from_id, to_id, relation_type, weight, first_seen, last_seen) in edges {
        let from_id = if from_id == old_id { new_id } else { &from_id };
        let to_id = if to_id == old_id { new_id } else { &to_id };
        // Self-edges created by the rewrite are dropped
        if from_id == to_id {
            continue;
        }
        sqlx::query(
            "INSERT INTO relationships (from_id, to_id, relation_type, weight, first_seen, last_seen) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(from_id, to_id, relation_type) DO UPDATE SET \
               weight = weight + excluded.weight, \
               last_seen = MAX(last_seen, excluded.last_seen)",
        )
        .bind(from_id)
        .bind(to_id)
        .bind(&relation_type)
        .bind(weight)
        .bind(&first_seen)
        .bind(&last_seen)
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    }

    tx.commit()
        .await
        .map_err(|e| StorageError::Query { source: e })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_id;
    use crate::storage::init_test_db;
    use chrono::Utc;

    fn sample_entity(raw: &str, normalised: &str) -> Entity {
        Entity {
            id: new_id(),
            entity_type: EntityType::Person,
            raw_value: raw.to_string(),
            normalised_value: normalised.to_string(),
            display_name: raw.to_string(),
            merged_into_id: None,
            confidence_band: ConfidenceBand::Medium,
            mention_count: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_bumps_mention_count_on_duplicate() {
        let pool = init_test_db().await.expect("init db");

        let first = upsert(&pool, &sample_entity("Sarah Smith", "sarah smith"))
            .await
            .expect("first");
        assert_eq!(first.mention_count, 1);

        let second = upsert(&pool, &sample_entity("Sarah  Smith", "sarah smith"))
            .await
            .expect("second");
        assert_eq!(second.id, first.id);
        assert_eq!(second.mention_count, 2);
    }

    #[tokio::test]
    async fn find_by_identity_works() {
        let pool = init_test_db().await.expect("init db");
        upsert(&pool, &sample_entity("Sarah Smith", "sarah smith"))
            .await
            .expect("upsert");

        let found = find_by_identity(&pool, EntityType::Person, "sarah smith")
            .await
            .expect("find");
        assert!(found.is_some());

        let missing = find_by_identity(&pool, EntityType::Phone, "sarah smith")
            .await
            .expect("find");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn blocklist_hit_bumps_counter() {
        let pool = init_test_db().await.expect("init db");

        assert!(!blocklist_hit(&pool, EntityType::Person, "monday")
            .await
            .expect("check"));

        blocklist_add(&pool, EntityType::Person, "monday").await.expect("add");
        assert!(blocklist_hit(&pool, EntityType::Person, "monday")
            .await
            .expect("check"));

        let row: (i64,) = sqlx::query_as(
            "SELECT rejection_count FROM entity_blacklist WHERE normalised_value = 'monday'",
        )
        .fetch_one(&pool)
        .await
        .expect("count");
        assert_eq!(row.0, 2);
    }

    #[tokio::test]
    async fn relationship_upsert_increments_weight() {
        let pool = init_test_db().await.expect("init db");

        relationship_upsert(&pool, "a", "b", "co_occurs").await.expect("first");
        relationship_upsert(&pool, "a", "b", "co_occurs").await.expect("second");

        let edges = relationships_for(&pool, "a").await.expect("edges");
        assert_eq!(edges.len(), 1);
        assert!((edges[0].weight - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn rewrite_edges_merges_weights() {
        let pool = init_test_db().await.expect("init db");

        // b and c both relate to x; merging c into b must fold the weights
        relationship_upsert(&pool, "b", "x", "co_occurs").await.expect("edge");
        relationship_upsert(&pool, "c", "x", "co_occurs").await.expect("edge");
        relationship_upsert(&pool, "c", "x", "co_occurs").await.expect("edge");

        rewrite_edges(&pool, "c", "b").await.expect("rewrite");

        let edges = relationships_for(&pool, "b").await.expect("edges");
        assert_eq!(edges.len(), 1);
        assert!((edges[0].weight - 3.0).abs() < f64::EPSILON);

        assert!(relationships_for(&pool, "c").await.expect("edges").is_empty());
    }

    #[tokio::test]
    async fn rewrite_drops_self_edges() {
        let pool = init_test_db().await.expect("init db");
        relationship_upsert(&pool, "b", "c", "works_with").await.expect("edge");

        rewrite_edges(&pool, "c", "b").await.expect("rewrite");
        assert!(relationships_for(&pool, "b").await.expect("edges").is_empty());
    }

    #[tokio::test]
    async fn top_related_orders_by_weight() {
        let pool = init_test_db().await.expect("init db");
        for _ in 0..3 {
            relationship_upsert(&pool, "a", "b", "co_occurs").await.expect("edge");
        }
        relationship_upsert(&pool, "a", "c", "co_occurs").await.expect("edge");

        let top = top_related(&pool, "a", "co_occurs", 10).await.expect("top");
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].to_id, "b");
    }
}
