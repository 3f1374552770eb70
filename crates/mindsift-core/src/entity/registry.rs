//! The canonical entity registry.
//!
//! Candidates from Tier 0 pass through the blocklist, get normalised,
//! and land as registry rows. Merging is user-driven: merging B into A
//! points B at A and rewrites B's relationship edges; later lookups
//! dereference through the merge chain to the root.

use chrono::Utc;

use super::normalise_value;
use crate::error::EntityError;
use crate::model::{new_id, ConfidenceBand, Entity, EntityType};
use crate::signals::EntityCandidate;
use crate::storage::{entities, DbPool};

/// What happened when a candidate was registered.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// A new registry row was created.
    Created(Entity),
    /// An existing entity matched; its mention count was bumped.
    Updated(Entity),
    /// The blocklist rejected the candidate.
    Rejected,
}

/// Canonical entity store with blocklist and merge support.
pub struct EntityRegistry {
    pool: DbPool,
}

impl EntityRegistry {
    /// Create a registry backed by the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Register a Tier 0 candidate.
    ///
    /// Consults the blocklist first: hits bump the rejection counter and
    /// create nothing. Otherwise the candidate is normalised and
    /// upserted; a duplicate identity is a mention-count update, not an
    /// error.
    pub async fn register(&self, candidate: &EntityCandidate) -> Result<RegisterOutcome, EntityError> {
        let normalised = normalise_value(candidate.entity_type, &candidate.value);

        if entities::blocklist_hit(&self.pool, candidate.entity_type, &normalised).await? {
            tracing::debug!(value = %candidate.value, "entity candidate blocklisted");
            return Ok(RegisterOutcome::Rejected);
        }

        let now = Utc::now();
        let entity = Entity {
            id: new_id(),
            entity_type: candidate.entity_type,
            raw_value: candidate.value.clone(),
            normalised_value: normalised,
            display_name: candidate.value.clone(),
            merged_into_id: None,
            confidence_band: candidate.confidence_band,
            mention_count: 1,
            created_at: now,
            updated_at: now,
        };

        let stored = entities::upsert(&self.pool, &entity).await?;
        if stored.id == entity.id {
            Ok(RegisterOutcome::Created(stored))
        } else {
            Ok(RegisterOutcome::Updated(stored))
        }
    }

    /// Resolve an entity id to its merge root.
    ///
    /// Follows `merged_into_id` pointers to the end of the chain. The
    /// chain is finite by construction (merge refuses cycles), but a
    /// hop bound guards against corrupted data.
    pub async fn resolve(&self, id: &str) -> Result<Entity, EntityError> {
        let mut current = entities::get(&self.pool, id)
            .await?
            .ok_or_else(|| EntityError::EntityNotFound { id: id.to_string() })?;

        let mut hops = 0;
        while let Some(target_id) = current.merged_into_id.clone() {
            hops += 1;
            if hops > 32 {
                tracing::error!(id, "merge chain exceeded hop bound");
                break;
            }
            current = entities::get(&self.pool, &target_id)
                .await?
                .ok_or(EntityError::EntityNotFound { id: target_id })?;
        }
        Ok(current)
    }

    /// Look up an entity by raw value and type, dereferencing merges.
    pub async fn lookup(
        &self,
        entity_type: EntityType,
        raw_value: &str,
    ) -> Result<Option<Entity>, EntityError> {
        let normalised = normalise_value(entity_type, raw_value);
        let Some(entity) = entities::find_by_identity(&self.pool, entity_type, &normalised).await?
        else {
            return Ok(None);
        };
        Ok(Some(self.resolve(&entity.id).await?))
    }

    /// Merge `source_id` into `target_id`.
    ///
    /// Sets the source's merge pointer and rewrites its relationship
    /// edges onto the target. Merging an entity into itself (directly or
    /// through the existing chain) is refused.
    pub async fn merge(&self, source_id: &str, target_id: &str) -> Result<(), EntityError> {
        let source_root = self.resolve(source_id).await?;
        let target_root = self.resolve(target_id).await?;

        if source_root.id == target_root.id {
            return Err(EntityError::SelfMerge {
                id: source_id.to_string(),
            });
        }

        entities::set_merged_into(&self.pool, &source_root.id, &target_root.id).await?;
        entities::rewrite_edges(&self.pool, &source_root.id, &target_root.id).await?;

        tracing::info!(source = %source_root.id, target = %target_root.id, "merged entity");
        Ok(())
    }

    /// Add a value to the blocklist and delete any registry row for it.
    pub async fn block(
        &self,
        entity_type: EntityType,
        raw_value: &str,
    ) -> Result<(), EntityError> {
        let normalised = normalise_value(entity_type, raw_value);
        entities::blocklist_add(&self.pool, entity_type, &normalised).await?;
        if let Some(existing) =
            entities::find_by_identity(&self.pool, entity_type, &normalised).await?
        {
            entities::delete(&self.pool, &existing.id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    fn candidate(value: &str) -> EntityCandidate {
        EntityCandidate {
            entity_type: EntityType::Person,
            value: value.to_string(),
            confidence_band: ConfidenceBand::Medium,
        }
    }

    #[tokio::test]
    async fn register_creates_then_updates() {
        let pool = init_test_db().await.expect("init db");
        let registry = EntityRegistry::new(pool);

        let first = registry.register(&candidate("Sarah Smith")).await.expect("register");
        let created = match first {
            RegisterOutcome::Created(e) => e,
            other => panic!("expected Created, got {other:?}"),
        };
        assert_eq!(created.normalised_value, "sarah smith");

        // Different surface form, same identity
        let second = registry.register(&candidate("SARAH   Smith")).await.expect("register");
        match second {
            RegisterOutcome::Updated(e) => {
                assert_eq!(e.id, created.id);
                assert_eq!(e.mention_count, 2);
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocklisted_candidate_is_rejected() {
        let pool = init_test_db().await.expect("init db");
        let registry = EntityRegistry::new(pool.clone());

        registry.block(EntityType::Person, "Monday Morning").await.expect("block");

        let outcome = registry.register(&candidate("Monday Morning")).await.expect("register");
        assert!(matches!(outcome, RegisterOutcome::Rejected));

        // No registry row was created
        assert!(entities::find_by_identity(&pool, EntityType::Person, "monday morning")
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn merge_dereferences_on_lookup() {
        let pool = init_test_db().await.expect("init db");
        let registry = EntityRegistry::new(pool);

        let RegisterOutcome::Created(bob) =
            registry.register(&candidate("Bob Smith")).await.expect("register")
        else {
            panic!("expected Created");
        };
        let RegisterOutcome::Created(robert) =
            registry.register(&candidate("Robert Smith")).await.expect("register")
        else {
            panic!("expected Created");
        };

        registry.merge(&bob.id, &robert.id).await.expect("merge");

        let resolved = registry
            .lookup(EntityType::Person, "Bob Smith")
            .await
            .expect("lookup")
            .expect("entity");
        assert_eq!(resolved.id, robert.id);
    }

    #[tokio::test]
    async fn merge_chain_resolves_to_root() {
        let pool = init_test_db().await.expect("init db");
        let registry = EntityRegistry::new(pool);

        let mut ids = Vec::new();
        for name in ["Alias One", "Alias Two", "Alias Three"] {
            let RegisterOutcome::Created(e) =
                registry.register(&candidate(name)).await.expect("register")
            else {
                panic!("expected Created");
            };
            ids.push(e.id);
        }

        registry.merge(&ids[0], &ids[1]).await.expect("merge");
        registry.merge(&ids[1], &ids[2]).await.expect("merge");

        let root = registry.resolve(&ids[0]).await.expect("resolve");
        assert_eq!(root.id, ids[2]);
    }

    #[tokio::test]
    async fn self_merge_refused() {
        let pool = init_test_db().await.expect("init db");
        let registry = EntityRegistry::new(pool);

        let RegisterOutcome::Created(a) =
            registry.register(&candidate("Solo Person")).await.expect("register")
        else {
            panic!("expected Created");
        };

        assert!(matches!(
            registry.merge(&a.id, &a.id).await,
            Err(EntityError::SelfMerge { .. })
        ));
    }

    #[tokio::test]
    async fn cycle_via_chain_refused() {
        let pool = init_test_db().await.expect("init db");
        let registry = EntityRegistry::new(pool);

        let RegisterOutcome::Created(a) =
            registry.register(&candidate("Name A")).await.expect("register")
        else {
            panic!("expected Created");
        };
        let RegisterOutcome::Created(b) =
            registry.register(&candidate("Name B")).await.expect("register")
        else {
            panic!("expected Created");
        };

        registry.merge(&a.id, &b.id).await.expect("merge");
        // b's root is b; a's root is b; merging b into a would cycle
        assert!(matches!(
            registry.merge(&b.id, &a.id).await,
            Err(EntityError::SelfMerge { .. })
        ));
    }

    #[tokio::test]
    async fn resolve_missing_errors() {
        let pool = init_test_db().await.expect("init db");
        let registry = EntityRegistry::new(pool);
        assert!(matches!(
            registry.resolve("ghost").await,
            Err(EntityError::EntityNotFound { .. })
        ));
    }
}
