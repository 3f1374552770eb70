//! Tier 3: higher-order synthesis over patterns.
//!
//! Runs when enough sufficiently strong patterns exist. Patterns are
//! grouped by shared type or overlapping insights, and each group is
//! folded into one narrative synthesis.

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::config::SynthesisConfig;
use crate::llm::{strip_json_fences, GenerationParams, LlmRequest};
use crate::model::{new_id, Pattern, Synthesis};
use crate::storage::{patterns, syntheses, DbPool};

use super::SynthError;

/// What a synthesis run produced.
#[derive(Debug, Default)]
pub struct SynthesisOutcome {
    /// Ids of syntheses created.
    pub created: Vec<String>,
    /// The gate refused to run (too few or too weak patterns).
    pub gated: bool,
}

/// The Tier 3 synthesizer.
pub struct Synthesizer {
    pool: DbPool,
    llm: std::sync::Arc<ResponseCache>,
    config: SynthesisConfig,
}

#[derive(Deserialize)]
struct RawSynthesis {
    summary: String,
    #[serde(default)]
    synthesis_type: String,
    significance: f64,
    confidence: f64,
}

const SYNTHESIS_SYSTEM: &str = "You write a higher-order synthesis over behavioural patterns \
observed in one person: what they mean taken together, not a list. Respond with JSON only, \
matching the requested schema.";

impl Synthesizer {
    /// Create a Tier 3 synthesizer.
    pub fn new(pool: DbPool, llm: std::sync::Arc<ResponseCache>, config: SynthesisConfig) -> Self {
        Self { pool, llm, config }
    }

    /// Run synthesis for a case when the pattern gate passes.
    pub async fn run_synthesis(
        &self,
        case_id: Option<&str>,
        run_id: Option<&str>,
    ) -> Result<SynthesisOutcome, SynthError> {
        let all_patterns = patterns::list(&self.pool, case_id).await?;

        let mean_strength = if all_patterns.is_empty() {
            0.0
        } else {
            all_patterns.iter().map(|p| p.strength).sum::<f64>() / all_patterns.len() as f64
        };
        if all_patterns.len() < self.config.min_patterns
            || mean_strength < self.config.significance_threshold
        {
            tracing::debug!(
                patterns = all_patterns.len(),
                mean_strength,
                "synthesis gate closed"
            );
            return Ok(SynthesisOutcome {
                gated: true,
                ..SynthesisOutcome::default()
            });
        }

        let mut outcome = SynthesisOutcome::default();
        for group in group_patterns(&all_patterns) {
            let members: Vec<&Pattern> = group.iter().map(|&i| &all_patterns[i]).collect();
            let synthesis = self.generate_synthesis(&members, case_id, run_id).await?;
            syntheses::insert(&self.pool, &synthesis).await?;
            outcome.created.push(synthesis.id);
        }

        tracing::info!(created = outcome.created.len(), "synthesis finished");
        Ok(outcome)
    }

    async fn generate_synthesis(
        &self,
        members: &[&Pattern],
        case_id: Option<&str>,
        run_id: Option<&str>,
    ) -> Result<Synthesis, SynthError> {
        let mut listing = String::new();
        for pattern in members {
            listing.push_str(&format!(
                "- {} ({}, strength {:.2}): {}\n",
                pattern.name, pattern.pattern_type, pattern.strength, pattern.description
            ));
        }

        let prompt = format!(
            "These related patterns were observed in one person:\n\n{listing}\n\
             Write a short narrative synthesis of what they mean together. Respond with JSON only:\n\
             {{\"summary\": \"the narrative\", \"synthesis_type\": \"narrative | trajectory | \
             belief_system | character\", \"significance\": 0.0, \"confidence\": 0.0}}"
        );

        let request = LlmRequest {
            prompt,
            system: Some(SYNTHESIS_SYSTEM.to_string()),
            params: GenerationParams {
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
                model: Some(self.config.model.clone()),
            },
            purpose: "synthesize".to_string(),
        };

        let response = self.llm.generate(&request).await?;
        let raw: RawSynthesis = serde_json::from_str(strip_json_fences(&response.content))
            .map_err(|e| SynthError::BadModelOutput {
                message: format!("synthesis response did not match schema: {e}"),
            })?;

        Ok(Synthesis {
            id: new_id(),
            summary: raw.summary.trim().to_string(),
            synthesis_type: if raw.synthesis_type.is_empty() {
                "narrative".to_string()
            } else {
                raw.synthesis_type
            },
            pattern_ids: members.iter().map(|p| p.id.clone()).collect(),
            significance: raw.significance.clamp(0.0, 1.0),
            confidence: raw.confidence.clamp(0.0, 1.0),
            metadata: serde_json::json!({ "pattern_count": members.len() }),
            case_id: case_id.map(str::to_string),
            run_id: run_id.map(str::to_string),
            created_at: chrono::Utc::now(),
        })
    }
}

/// Group patterns that share a type or overlap in insights
/// (connected components).
fn group_patterns(all: &[Pattern]) -> Vec<Vec<usize>> {
    let mut parent: Vec<usize> = (0..all.len()).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        let mut current = x;
        while parent[current] != root {
            let next = parent[current];
            parent[current] = root;
            current = next;
        }
        root
    }

    for a in 0..all.len() {
        for b in (a + 1)..all.len() {
            let related = all[a].pattern_type == all[b].pattern_type
                || !all[a]
                    .insight_ids
                    .is_disjoint(&all[b].insight_ids);
            if related {
                let ra = find(&mut parent, a);
                let rb = find(&mut parent, b);
                if ra != rb {
                    parent[ra] = rb;
                }
            }
        }
    }

    let mut groups: std::collections::HashMap<usize, Vec<usize>> =
        std::collections::HashMap::new();
    for x in 0..all.len() {
        let root = find(&mut parent, x);
        groups.entry(root).or_default().push(x);
    }
    let mut out: Vec<Vec<usize>> = groups.into_values().collect();
    out.sort_by_key(|g| g.first().copied().unwrap_or(0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KvCacheStore;
    use crate::llm::mock::MockProvider;
    use crate::llm::router::ProviderRouter;
    use crate::model::PatternType;
    use crate::storage::init_test_db;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    const SYNTHESIS_JSON: &str = r#"{
        "summary": "A long retreat from intimacy shaped by work stress",
        "synthesis_type": "trajectory",
        "significance": 0.8,
        "confidence": 0.7
    }"#;

    fn pattern(pattern_type: PatternType, strength: f64, insight_ids: &[&str]) -> Pattern {
        Pattern {
            id: new_id(),
            name: "pattern".to_string(),
            summary: "summary".to_string(),
            description: "description".to_string(),
            pattern_type,
            insight_ids: insight_ids.iter().map(|s| (*s).to_string()).collect(),
            strength,
            metadata: serde_json::json!({}),
            case_id: None,
            run_id: None,
            created_at: Utc::now(),
        }
    }

    async fn synthesizer_with(provider: Arc<MockProvider>) -> (Synthesizer, DbPool) {
        let pool = init_test_db().await.expect("init db");
        let router =
            Arc::new(ProviderRouter::new(vec![provider], 2, 5_000, pool.clone()).expect("router"));
        let llm = Arc::new(ResponseCache::new(
            Box::new(KvCacheStore::new(pool.clone(), None)),
            router,
            pool.clone(),
        ));
        (
            Synthesizer::new(pool.clone(), llm, SynthesisConfig::default()),
            pool,
        )
    }

    async fn seed_pattern(pool: &DbPool, p: &Pattern) {
        // Seed the referenced insights so referential checks pass
        for insight_id in &p.insight_ids {
            let exists: Option<(String,)> =
                sqlx::query_as("SELECT id FROM insights WHERE id = ?")
                    .bind(insight_id)
                    .fetch_optional(pool)
                    .await
                    .expect("query");
            if exists.is_some() {
                continue;
            }
            sqlx::query(
                "INSERT INTO insights (id, summary, significance, confidence, created_at, updated_at) \
                 VALUES (?, 'seed', 0.5, 0.5, ?, ?)",
            )
            .bind(insight_id)
            .bind(Utc::now().to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .execute(pool)
            .await
            .expect("insert insight");
        }
        patterns::insert(pool, p).await.expect("insert pattern");
    }

    #[tokio::test]
    async fn gate_refuses_weak_patterns() {
        let provider = Arc::new(MockProvider::new("anthropic", "m"));
        let (synthesizer, pool) = synthesizer_with(provider.clone()).await;

        seed_pattern(&pool, &pattern(PatternType::Emotional, 0.2, &["i1", "i2", "i3"])).await;

        let outcome = synthesizer.run_synthesis(None, None).await.expect("synthesize");
        assert!(outcome.gated);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn gate_refuses_no_patterns() {
        let provider = Arc::new(MockProvider::new("anthropic", "m"));
        let (synthesizer, _pool) = synthesizer_with(provider).await;

        let outcome = synthesizer.run_synthesis(None, None).await.expect("synthesize");
        assert!(outcome.gated);
    }

    #[tokio::test]
    async fn strong_patterns_produce_synthesis() {
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(SYNTHESIS_JSON));
        let (synthesizer, pool) = synthesizer_with(provider).await;

        seed_pattern(&pool, &pattern(PatternType::Emotional, 0.8, &["i1", "i2"])).await;
        seed_pattern(&pool, &pattern(PatternType::Emotional, 0.7, &["i3", "i4"])).await;

        let outcome = synthesizer.run_synthesis(None, None).await.expect("synthesize");
        assert_eq!(outcome.created.len(), 1);

        let stored = syntheses::list(&pool, None).await.expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].pattern_ids.len(), 2);
        assert_eq!(stored[0].synthesis_type, "trajectory");
    }

    #[tokio::test]
    async fn unrelated_types_get_separate_syntheses() {
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(SYNTHESIS_JSON));
        let (synthesizer, pool) = synthesizer_with(provider).await;

        seed_pattern(&pool, &pattern(PatternType::Emotional, 0.8, &["i1"])).await;
        seed_pattern(&pool, &pattern(PatternType::Cognitive, 0.8, &["i2"])).await;

        let outcome = synthesizer.run_synthesis(None, None).await.expect("synthesize");
        assert_eq!(outcome.created.len(), 2);
    }

    #[tokio::test]
    async fn overlapping_insights_group_across_types() {
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(SYNTHESIS_JSON));
        let (synthesizer, pool) = synthesizer_with(provider).await;

        seed_pattern(&pool, &pattern(PatternType::Emotional, 0.8, &["i1", "i2"])).await;
        seed_pattern(&pool, &pattern(PatternType::Cognitive, 0.8, &["i2", "i3"])).await;

        let outcome = synthesizer.run_synthesis(None, None).await.expect("synthesize");
        assert_eq!(outcome.created.len(), 1);

        let stored = syntheses::list(&pool, None).await.expect("list");
        assert_eq!(stored[0].pattern_ids.len(), 2);
    }

    #[test]
    fn group_patterns_by_type_and_overlap() {
        let patterns = vec![
            pattern(PatternType::Emotional, 0.8, &["a"]),
            pattern(PatternType::Emotional, 0.8, &["b"]),
            pattern(PatternType::Cognitive, 0.8, &["c"]),
        ];
        let groups = group_patterns(&patterns);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn members_are_deduplicated_in_pattern_ids() {
        let p = pattern(PatternType::Emotional, 0.8, &["a", "a", "b"]);
        let set: BTreeSet<String> = p.insight_ids;
        assert_eq!(set.len(), 2);
    }
}
