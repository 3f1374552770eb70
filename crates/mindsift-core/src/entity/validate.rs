//! LLM-based validation of low-confidence entity candidates.
//!
//! Tier 0's regex extraction over-generates: capitalised phrases and
//! number runs that are not real entities. A batch of low-confidence
//! rows can be sent to the router with a classification prompt; the
//! verdicts keep, reject (blocklist), or reclassify each candidate.

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::error::EntityError;
use crate::llm::{strip_json_fences, GenerationParams, LlmRequest};
use crate::model::{ConfidenceBand, Entity, EntityType};
use crate::storage::{entities, DbPool};

/// Verdict for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationAction {
    /// Real entity of the claimed type; confidence promoted.
    Keep,
    /// Not an entity; row deleted and value blocklisted.
    Reject,
    /// Real entity of a different type.
    Reclassify(EntityType),
}

/// Outcome counts for a validation batch.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub kept: u32,
    pub rejected: u32,
    pub reclassified: u32,
}

#[derive(Deserialize)]
struct RawVerdict {
    value: String,
    action: String,
    #[serde(default)]
    reclassify_to: Option<String>,
}

const VALIDATION_SYSTEM: &str = "You classify candidate entities extracted from personal \
documents. Respond with JSON only, no prose.";

fn build_prompt(candidates: &[Entity]) -> String {
    let mut prompt = String::from(
        "For each candidate below, decide whether it is a real entity of the claimed type.\n\
         Candidates:\n",
    );
    for entity in candidates {
        prompt.push_str(&format!(
            "- value: \"{}\" claimed_type: {}\n",
            entity.raw_value, entity.entity_type
        ));
    }
    prompt.push_str(
        "\nRespond with a JSON array, one object per candidate, in the same order:\n\
         [{\"value\": \"...\", \"action\": \"keep\" | \"reject\" | \"reclassify\", \
         \"reclassify_to\": \"person|location|organisation|phone|email|currency\"}]\n",
    );
    prompt
}

fn parse_verdicts(content: &str) -> Result<Vec<(String, ValidationAction)>, EntityError> {
    let raw: Vec<RawVerdict> = serde_json::from_str(strip_json_fences(content))
        .map_err(|e| EntityError::Validation(format!("malformed verdict JSON: {e}")))?;

    raw.into_iter()
        .map(|verdict| {
            let action = match verdict.action.as_str() {
                "keep" => ValidationAction::Keep,
                "reject" => ValidationAction::Reject,
                "reclassify" => {
                    let target = verdict
                        .reclassify_to
                        .as_deref()
                        .and_then(EntityType::parse)
                        .ok_or_else(|| {
                            EntityError::Validation(format!(
                                "reclassify verdict for '{}' lacks a valid target type",
                                verdict.value
                            ))
                        })?;
                    ValidationAction::Reclassify(target)
                }
                other => {
                    return Err(EntityError::Validation(format!(
                        "unknown verdict action '{other}'"
                    )))
                }
            };
            Ok((verdict.value, action))
        })
        .collect()
}

/// Validate a batch of candidates through the router and apply the
/// verdicts: keeps are promoted to high confidence, rejects are deleted
/// and blocklisted, reclassifications change the entity type.
pub async fn validate_batch(
    pool: &DbPool,
    llm: &ResponseCache,
    candidates: &[Entity],
) -> Result<ValidationSummary, EntityError> {
    if candidates.is_empty() {
        return Ok(ValidationSummary::default());
    }

    let request = LlmRequest {
        prompt: build_prompt(candidates),
        system: Some(VALIDATION_SYSTEM.to_string()),
        params: GenerationParams {
            temperature: 0.0,
            max_tokens: 1000,
            model: None,
        },
        purpose: "entity_validation".to_string(),
    };

    let response = llm
        .generate(&request)
        .await
        .map_err(|e| EntityError::Validation(e.to_string()))?;
    let verdicts = parse_verdicts(&response.content)?;

    let mut summary = ValidationSummary::default();
    for (value, action) in verdicts {
        let Some(entity) = candidates.iter().find(|e| e.raw_value == value) else {
            tracing::warn!(value, "verdict for unknown candidate, skipping");
            continue;
        };

        match action {
            ValidationAction::Keep => {
                entities::reclassify(pool, &entity.id, entity.entity_type, ConfidenceBand::High)
                    .await?;
                summary.kept += 1;
            }
            ValidationAction::Reject => {
                entities::blocklist_add(pool, entity.entity_type, &entity.normalised_value)
                    .await?;
                entities::delete(pool, &entity.id).await?;
                summary.rejected += 1;
            }
            ValidationAction::Reclassify(target) => {
                entities::reclassify(pool, &entity.id, target, ConfidenceBand::Medium).await?;
                summary.reclassified += 1;
            }
        }
    }

    tracing::info!(
        kept = summary.kept,
        rejected = summary.rejected,
        reclassified = summary.reclassified,
        "entity validation batch applied"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KvCacheStore;
    use crate::entity::registry::{EntityRegistry, RegisterOutcome};
    use crate::llm::mock::MockProvider;
    use crate::llm::router::ProviderRouter;
    use crate::signals::EntityCandidate;
    use crate::storage::init_test_db;
    use std::sync::Arc;

    #[test]
    fn parse_verdicts_all_actions() {
        let content = r#"[
            {"value": "Sarah Smith", "action": "keep"},
            {"value": "Monday Morning", "action": "reject"},
            {"value": "Baker Street", "action": "reclassify", "reclassify_to": "location"}
        ]"#;
        let verdicts = parse_verdicts(content).expect("parse");
        assert_eq!(verdicts[0].1, ValidationAction::Keep);
        assert_eq!(verdicts[1].1, ValidationAction::Reject);
        assert_eq!(
            verdicts[2].1,
            ValidationAction::Reclassify(EntityType::Location)
        );
    }

    #[test]
    fn parse_verdicts_rejects_unknown_action() {
        let content = r#"[{"value": "x", "action": "promote"}]"#;
        assert!(parse_verdicts(content).is_err());
    }

    #[test]
    fn parse_verdicts_requires_reclassify_target() {
        let content = r#"[{"value": "x", "action": "reclassify"}]"#;
        assert!(parse_verdicts(content).is_err());
    }

    #[test]
    fn prompt_lists_candidates() {
        let entity = Entity {
            id: "e1".to_string(),
            entity_type: EntityType::Person,
            raw_value: "Maybe Tomorrow".to_string(),
            normalised_value: "maybe tomorrow".to_string(),
            display_name: "Maybe Tomorrow".to_string(),
            merged_into_id: None,
            confidence_band: ConfidenceBand::Low,
            mention_count: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let prompt = build_prompt(&[entity]);
        assert!(prompt.contains("\"Maybe Tomorrow\""));
        assert!(prompt.contains("claimed_type: person"));
    }

    #[tokio::test]
    async fn batch_applies_verdicts() {
        let pool = init_test_db().await.expect("init db");
        let registry = EntityRegistry::new(pool.clone());

        let mut stored = Vec::new();
        for value in ["Sarah Smith", "Monday Blues", "Baker Street"] {
            let RegisterOutcome::Created(e) = registry
                .register(&EntityCandidate {
                    entity_type: EntityType::Person,
                    value: value.to_string(),
                    confidence_band: ConfidenceBand::Low,
                })
                .await
                .expect("register")
            else {
                panic!("expected Created");
            };
            stored.push(e);
        }

        let verdict_json = r#"[
            {"value": "Sarah Smith", "action": "keep"},
            {"value": "Monday Blues", "action": "reject"},
            {"value": "Baker Street", "action": "reclassify", "reclassify_to": "location"}
        ]"#;
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(verdict_json));
        let router =
            Arc::new(ProviderRouter::new(vec![provider], 2, 5_000, pool.clone()).expect("router"));
        let llm = ResponseCache::new(
            Box::new(KvCacheStore::new(pool.clone(), None)),
            router,
            pool.clone(),
        );

        let summary = validate_batch(&pool, &llm, &stored).await.expect("validate");
        assert_eq!(
            summary,
            ValidationSummary {
                kept: 1,
                rejected: 1,
                reclassified: 1
            }
        );

        // Keep: promoted
        let sarah = entities::get(&pool, &stored[0].id).await.expect("get").expect("found");
        assert_eq!(sarah.confidence_band, ConfidenceBand::High);

        // Reject: gone and blocklisted
        assert!(entities::get(&pool, &stored[1].id).await.expect("get").is_none());
        assert!(
            entities::blocklist_hit(&pool, EntityType::Person, "monday blues")
                .await
                .expect("check")
        );

        // Reclassify: new type
        let baker = entities::get(&pool, &stored[2].id).await.expect("get").expect("found");
        assert_eq!(baker.entity_type, EntityType::Location);
    }
}
