//! The relationship-aware entity graph.
//!
//! Directed multi-edges between canonical entities: co-occurrence,
//! user-labelled relations, and the critique engine's insight-level
//! `contradicts` edges all live in the same table. Sentiment over time
//! joins an entity's mentions with the emotional tags of the insights
//! that mention it.

use std::collections::BTreeMap;

use crate::error::EntityError;
use crate::model::Relationship;
use crate::storage::{entities, insights, DbPool};

use super::registry::EntityRegistry;

/// Relation type used for automatic co-occurrence edges.
pub const CO_OCCURS: &str = "co_occurs";

/// One month of emotional tags attached to insights mentioning an entity.
#[derive(Debug, serde::Serialize)]
pub struct SentimentBucket {
    /// Month key, `YYYY-MM`.
    pub month: String,
    /// Emotional tag counts for that month.
    pub tags: BTreeMap<String, u32>,
}

/// Graph operations over registered entities.
pub struct EntityGraph {
    pool: DbPool,
    registry: EntityRegistry,
}

impl EntityGraph {
    /// Create a graph backed by the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self {
            registry: EntityRegistry::new(pool.clone()),
            pool,
        }
    }

    /// Record a directed relationship between two entities.
    ///
    /// Both endpoints are resolved through their merge chains; the edge
    /// is upserted with weight += 1. Unknown endpoints fail with
    /// `EntityNotFound`.
    pub async fn record_relationship(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: &str,
    ) -> Result<(), EntityError> {
        let from = self.registry.resolve(from_id).await?;
        let to = self.registry.resolve(to_id).await?;
        entities::relationship_upsert(&self.pool, &from.id, &to.id, relation_type).await?;
        Ok(())
    }

    /// Record pairwise co-occurrence edges for entities seen together.
    ///
    /// Edges are symmetric: both directions are written so neighbourhood
    /// queries see the pair from either side.
    pub async fn record_co_occurrence(&self, entity_ids: &[String]) -> Result<(), EntityError> {
        for (index, a) in entity_ids.iter().enumerate() {
            for b in &entity_ids[index + 1..] {
                if a == b {
                    continue;
                }
                self.record_relationship(a, b, CO_OCCURS).await?;
                self.record_relationship(b, a, CO_OCCURS).await?;
            }
        }
        Ok(())
    }

    /// Every edge touching an entity (after merge resolution).
    pub async fn neighbourhood(&self, entity_id: &str) -> Result<Vec<Relationship>, EntityError> {
        let root = self.registry.resolve(entity_id).await?;
        Ok(entities::relationships_for(&self.pool, &root.id).await?)
    }

    /// Top-K co-occurring entities, heaviest first.
    pub async fn co_occurrence_top(
        &self,
        entity_id: &str,
        limit: i64,
    ) -> Result<Vec<Relationship>, EntityError> {
        let root = self.registry.resolve(entity_id).await?;
        Ok(entities::top_related(&self.pool, &root.id, CO_OCCURS, limit).await?)
    }

    /// Emotional tags over time for insights mentioning an entity.
    ///
    /// Joins the entity's display name against insight summaries and
    /// excerpts (case-insensitive) and buckets the emotional tags by
    /// month of the insight's earliest source date.
    pub async fn sentiment_over_time(
        &self,
        entity_id: &str,
    ) -> Result<Vec<SentimentBucket>, EntityError> {
        let root = self.registry.resolve(entity_id).await?;
        let needle = root.display_name.to_lowercase();

        let all = insights::active(&self.pool, None, None).await?;
        let mut buckets: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();

        for insight in all {
            let mentions = insight.summary.to_lowercase().contains(&needle)
                || insight
                    .excerpts
                    .iter()
                    .any(|e| e.to_lowercase().contains(&needle));
            if !mentions {
                continue;
            }

            let month = insight
                .earliest_source_date
                .unwrap_or(insight.created_at)
                .format("%Y-%m")
                .to_string();
            let entry = buckets.entry(month).or_default();
            for tag in &insight.emotional_tags {
                *entry.entry(tag.clone()).or_default() += 1;
            }
        }

        Ok(buckets
            .into_iter()
            .map(|(month, tags)| SentimentBucket { month, tags })
            .collect())
    }
}
