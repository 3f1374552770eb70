//! The critique engine: post-hoc validation of extracted insights.
//!
//! Four checks run per insight: citation support (does each excerpt
//! actually appear in a source document), calibration (is the claimed
//! significance plausible against cheap heuristics), contradiction
//! (LLM comparison against theme-overlapping peers), and grounding
//! (reject when confidence falls below the floor). Rejected insights get
//! one reflexion pass back through Tier 1 with the critique notes; after
//! that the decision is final.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::config::{CritiqueConfig, ExtractionConfig};
use crate::error::{RouterError, StorageError};
use crate::extract::{ExtractError, ExtractOutcome, Extractor};
use crate::llm::{strip_json_fences, GenerationParams, LlmRequest};
use crate::model::{Insight, InsightStatus};
use crate::storage::{documents, entities, insights, DbPool};

/// Relation type for critique-detected contradictions between insights.
pub const CONTRADICTS: &str = "contradicts";

/// Confidence multiplier per unsupported excerpt.
const UNGROUNDED_PENALTY: f64 = 0.7;

/// Confidence multiplier applied to both sides of a contradiction.
const CONTRADICTION_PENALTY: f64 = 0.8;

/// Errors from the critique tier.
#[derive(Debug, thiserror::Error)]
pub enum CritiqueError {
    /// Router exhaustion; retryable at queue level.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Storage-layer error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Reflexion re-extraction failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// How critique left an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CritiqueOutcome {
    /// All checks passed; nothing changed.
    Passed,
    /// Scores or tags were adjusted; the insight survives.
    Adjusted,
    /// Confidence fell below the floor; status is now `rejected`.
    Rejected,
}

/// The full critique result for one insight.
#[derive(Debug)]
pub struct CritiqueReport {
    pub insight_id: String,
    pub outcome: CritiqueOutcome,
    pub notes: Vec<String>,
    pub ungrounded_excerpts: u32,
    pub recalibrated: bool,
    pub contradictions: Vec<String>,
}

/// The critique engine.
pub struct CritiqueEngine {
    pool: DbPool,
    llm: std::sync::Arc<ResponseCache>,
    config: CritiqueConfig,
    extraction: ExtractionConfig,
}

#[derive(Deserialize)]
struct ContradictionVerdict {
    #[serde(default)]
    contradiction: bool,
    #[serde(default)]
    reason: String,
}

impl CritiqueEngine {
    /// Create a critique engine.
    pub fn new(
        pool: DbPool,
        llm: std::sync::Arc<ResponseCache>,
        config: CritiqueConfig,
        extraction: ExtractionConfig,
    ) -> Self {
        Self {
            pool,
            llm,
            config,
            extraction,
        }
    }

    /// Run all four checks against one insight and persist the result.
    pub async fn critique_insight(&self, insight_id: &str) -> Result<CritiqueReport, CritiqueError> {
        let Some(mut insight) = insights::get(&self.pool, insight_id).await? else {
            return Ok(CritiqueReport {
                insight_id: insight_id.to_string(),
                outcome: CritiqueOutcome::Passed,
                notes: vec!["insight not found".to_string()],
                ungrounded_excerpts: 0,
                recalibrated: false,
                contradictions: Vec::new(),
            });
        };
        if matches!(insight.status, InsightStatus::Rejected | InsightStatus::Merged) {
            return Ok(CritiqueReport {
                insight_id: insight.id,
                outcome: CritiqueOutcome::Passed,
                notes: vec!["already inactive, skipped".to_string()],
                ungrounded_excerpts: 0,
                recalibrated: false,
                contradictions: Vec::new(),
            });
        }

        let mut notes = Vec::new();
        let mut changed = false;

        // 1. Citation support
        let ungrounded = self.check_citations(&insight).await?;
        if ungrounded > 0 {
            for _ in 0..ungrounded {
                insight.confidence *= UNGROUNDED_PENALTY;
            }
            insight.patterns.insert("ungrounded".to_string());
            notes.push(format!(
                "{ungrounded} excerpt(s) not found in source documents"
            ));
            changed = true;
        }

        // 2. Calibration
        let corpus_themes = self.corpus_themes(insight.case_id.as_deref()).await?;
        let heuristic = heuristic_significance(&insight, &corpus_themes);
        let deviation = (insight.significance - heuristic).abs();
        let recalibrated = deviation > self.config.calibration_band;
        if recalibrated {
            let adjusted = ((insight.significance + heuristic) / 2.0).clamp(0.0, 1.0);
            notes.push(format!(
                "significance recalibrated {:.2} -> {adjusted:.2} (heuristic {heuristic:.2})",
                insight.significance
            ));
            insight.significance = adjusted;
            changed = true;
        }

        // 3. Contradiction
        let contradictions = self.check_contradictions(&mut insight).await?;
        if !contradictions.is_empty() {
            notes.push(format!("contradicts {} peer insight(s)", contradictions.len()));
            changed = true;
        }

        // 4. Grounding floor
        let rejected = insight.confidence < self.config.confidence_floor;
        if rejected {
            insight.status = InsightStatus::Rejected;
            notes.push(format!(
                "confidence {:.2} below floor {:.2}, rejected",
                insight.confidence, self.config.confidence_floor
            ));
        }

        let outcome = if rejected {
            CritiqueOutcome::Rejected
        } else if changed {
            CritiqueOutcome::Adjusted
        } else {
            CritiqueOutcome::Passed
        };

        if changed || rejected {
            insights::update_after_critique(
                &self.pool,
                &insight,
                &serde_json::json!({ "notes": notes }),
            )
            .await?;
        }

        tracing::info!(
            insight = %insight.id,
            outcome = ?outcome,
            ungrounded,
            recalibrated,
            contradictions = contradictions.len(),
            "insight critiqued"
        );

        Ok(CritiqueReport {
            insight_id: insight.id,
            outcome,
            notes,
            ungrounded_excerpts: ungrounded,
            recalibrated,
            contradictions,
        })
    }

    /// Reflexion: resubmit a rejected insight's document to Tier 1 with
    /// the critique notes. One attempt per insight; afterwards the
    /// rejection is final.
    pub async fn refine_rejected(
        &self,
        insight_id: &str,
        extractor: &Extractor,
    ) -> Result<Option<ExtractOutcome>, CritiqueError> {
        let Some(insight) = insights::get(&self.pool, insight_id).await? else {
            return Ok(None);
        };
        if insight.status != InsightStatus::Rejected {
            return Ok(None);
        }

        let history = insights::history(&self.pool, insight_id).await?;
        let attempts = history.iter().filter(|e| e.event_type == "reflexion").count();
        if attempts >= 1 || insight.pass_count >= self.extraction.max_passes {
            tracing::debug!(insight = insight_id, "reflexion budget exhausted, decision final");
            return Ok(None);
        }

        let notes = history
            .iter()
            .rev()
            .find(|e| e.event_type == "critiqued")
            .and_then(|e| e.detail.get("notes").cloned())
            .map_or_else(|| "rejected by critique".to_string(), |n| n.to_string());

        let Some(document_id) = insight.source_ids.iter().next() else {
            return Ok(None);
        };
        let Some(document) = documents::get(&self.pool, document_id).await? else {
            return Ok(None);
        };

        let outcome = extractor
            .refine_document(
                &document,
                insight.case_id.as_deref(),
                insight.run_id.as_deref(),
                &notes,
            )
            .await?;

        insights::log_reflexion(&self.pool, insight_id, &outcome.created).await?;
        Ok(Some(outcome))
    }

    /// Verify each excerpt appears, case-insensitively and
    /// whitespace-normalised, in some source document.
    async fn check_citations(&self, insight: &Insight) -> Result<u32, CritiqueError> {
        if insight.excerpts.is_empty() {
            return Ok(0);
        }

        let mut sources = Vec::new();
        for document_id in &insight.source_ids {
            if let Some(document) = documents::get(&self.pool, document_id).await? {
                sources.push(normalise_for_match(&document.content));
            }
        }

        let mut missing = 0;
        for excerpt in &insight.excerpts {
            let needle = normalise_for_match(excerpt);
            if needle.is_empty() {
                continue;
            }
            if !sources.iter().any(|s| s.contains(&needle)) {
                missing += 1;
            }
        }
        Ok(missing)
    }

    /// LLM comparison against peers sharing at least two themes, capped
    /// by most-theme-overlap. Confirmed contradictions write a
    /// `contradicts` edge and decay both confidences.
    async fn check_contradictions(
        &self,
        insight: &mut Insight,
    ) -> Result<Vec<String>, CritiqueError> {
        let peers = insights::active(&self.pool, insight.case_id.as_deref(), None).await?;

        let mut overlapping: Vec<(usize, &Insight)> = peers
            .iter()
            .filter(|peer| peer.id != insight.id)
            .map(|peer| (peer.themes.intersection(&insight.themes).count(), peer))
            .filter(|(overlap, _)| *overlap >= 2)
            .collect();
        overlapping.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        overlapping.truncate(self.config.contradiction_max_pairs_per_insight);

        let mut confirmed = Vec::new();
        for (_, peer) in overlapping {
            let request = LlmRequest {
                prompt: format!(
                    "Do these two observations about the same person contradict each other?\n\
                     A: {}\nB: {}\n\n\
                     Respond with JSON only: {{\"contradiction\": true|false, \"reason\": \"...\"}}",
                    insight.summary, peer.summary
                ),
                system: Some(
                    "You compare observations for logical contradiction. JSON only.".to_string(),
                ),
                params: GenerationParams {
                    temperature: 0.0,
                    max_tokens: 200,
                    model: None,
                },
                purpose: "critique".to_string(),
            };

            let response = self.llm.generate(&request).await?;
            let verdict: ContradictionVerdict =
                match serde_json::from_str(strip_json_fences(&response.content)) {
                    Ok(verdict) => verdict,
                    Err(err) => {
                        tracing::warn!(error = %err, "unparseable contradiction verdict, skipping pair");
                        continue;
                    }
                };

            if verdict.contradiction {
                tracing::debug!(
                    a = %insight.id,
                    b = %peer.id,
                    reason = %verdict.reason,
                    "contradiction detected"
                );
                entities::relationship_upsert(&self.pool, &insight.id, &peer.id, CONTRADICTS)
                    .await?;
                insight.confidence *= CONTRADICTION_PENALTY;

                let mut peer_updated = peer.clone();
                peer_updated.confidence *= CONTRADICTION_PENALTY;
                insights::update_after_critique(
                    &self.pool,
                    &peer_updated,
                    &serde_json::json!({ "notes": [format!("contradicted by {}", insight.id)] }),
                )
                .await?;

                confirmed.push(peer.id.clone());
            }
        }
        Ok(confirmed)
    }

    async fn corpus_themes(&self, case_id: Option<&str>) -> Result<BTreeSet<String>, StorageError> {
        let active = insights::active(&self.pool, case_id, None).await?;
        let mut themes = BTreeSet::new();
        for peer in active {
            themes.extend(peer.themes);
        }
        Ok(themes)
    }
}

/// Lowercase and collapse all whitespace for citation matching.
fn normalise_for_match(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cheap significance estimate from structural features: summary length,
/// theme overlap with the corpus vocabulary, and emotional tag density.
fn heuristic_significance(insight: &Insight, corpus_themes: &BTreeSet<String>) -> f64 {
    let length_factor = (insight.summary.split_whitespace().count() as f64 / 20.0).min(1.0);

    let theme_factor = if insight.themes.is_empty() {
        0.0
    } else {
        insight
            .themes
            .iter()
            .filter(|t| corpus_themes.contains(*t))
            .count() as f64
            / insight.themes.len() as f64
    };

    let emotion_factor = (insight.emotional_tags.len() as f64 / 4.0).min(1.0);

    0.3 * length_factor + 0.4 * theme_factor + 0.3 * emotion_factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KvCacheStore;
    use crate::llm::mock::MockProvider;
    use crate::llm::router::ProviderRouter;
    use crate::model::{new_id, Document, InsightType};
    use crate::storage::init_test_db;
    use chrono::Utc;
    use std::sync::Arc;

    const NO_CONTRADICTION: &str = r#"{"contradiction": false, "reason": ""}"#;

    fn engine_config() -> CritiqueConfig {
        CritiqueConfig::default()
    }

    async fn setup(provider: Arc<MockProvider>) -> (CritiqueEngine, DbPool) {
        let pool = init_test_db().await.expect("init db");
        let router =
            Arc::new(ProviderRouter::new(vec![provider], 2, 5_000, pool.clone()).expect("router"));
        let llm = Arc::new(ResponseCache::new(
            Box::new(KvCacheStore::new(pool.clone(), None)),
            router,
            pool.clone(),
        ));
        let engine = CritiqueEngine::new(
            pool.clone(),
            llm,
            engine_config(),
            ExtractionConfig::default(),
        );
        (engine, pool)
    }

    async fn seed_document(pool: &DbPool, id: &str, content: &str) {
        let mut doc = Document::new(content, "journal", id);
        doc.id = id.to_string();
        documents::insert(pool, &doc).await.expect("doc");
    }

    fn base_insight(doc_id: &str, excerpt: &str) -> Insight {
        Insight {
            id: new_id(),
            summary: "They put off difficult conversations until deadlines force the issue"
                .to_string(),
            themes: ["work".to_string(), "avoidance".to_string()].into_iter().collect(),
            emotional_tags: ["fear".to_string()].into_iter().collect(),
            patterns: BTreeSet::new(),
            significance: 0.6,
            confidence: 0.8,
            insight_type: InsightType::Observation,
            status: InsightStatus::Raw,
            source_ids: [doc_id.to_string()].into_iter().collect(),
            excerpts: vec![excerpt.to_string()],
            pass_count: 1,
            earliest_source_date: None,
            latest_source_date: None,
            case_id: None,
            run_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn grounded_excerpt_passes_citation_check() {
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(NO_CONTRADICTION));
        let (engine, pool) = setup(provider).await;

        seed_document(&pool, "d1", "I kept quiet.   I put the REPORT off again this week.").await;
        let insight = base_insight("d1", "I put the report off again");
        insights::create(&pool, &insight).await.expect("insight");

        let report = engine.critique_insight(&insight.id).await.expect("critique");
        assert_eq!(report.ungrounded_excerpts, 0);
        assert_ne!(report.outcome, CritiqueOutcome::Rejected);
    }

    #[tokio::test]
    async fn fabricated_excerpt_downgrades_and_tags() {
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(NO_CONTRADICTION));
        let (engine, pool) = setup(provider).await;

        seed_document(&pool, "d1", "Nothing like that was ever written here.").await;
        let insight = base_insight("d1", "I put the report off again");
        insights::create(&pool, &insight).await.expect("insight");

        let report = engine.critique_insight(&insight.id).await.expect("critique");
        assert_eq!(report.ungrounded_excerpts, 1);

        let stored = insights::get(&pool, &insight.id).await.expect("get").expect("found");
        assert!(stored.confidence < 0.8);
        assert!(stored.patterns.contains("ungrounded"));
    }

    #[tokio::test]
    async fn wildly_overclaimed_significance_recalibrated() {
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(NO_CONTRADICTION));
        let (engine, pool) = setup(provider).await;

        seed_document(&pool, "d1", "brief note").await;
        let mut insight = base_insight("d1", "brief note");
        insight.summary = "Big claim".to_string();
        insight.themes = ["niche".to_string(), "rare".to_string()].into_iter().collect();
        insight.emotional_tags.clear();
        insight.significance = 0.95;
        insights::create(&pool, &insight).await.expect("insight");

        let report = engine.critique_insight(&insight.id).await.expect("critique");
        assert!(report.recalibrated);

        let stored = insights::get(&pool, &insight.id).await.expect("get").expect("found");
        assert!(stored.significance < 0.95);
    }

    #[tokio::test]
    async fn contradiction_creates_edge_and_decays_both() {
        let verdict = r#"{"contradiction": true, "reason": "opposite claims"}"#;
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(verdict));
        let (engine, pool) = setup(provider).await;

        seed_document(&pool, "d1", "They avoid conflict. They seek out conflict.").await;

        let a = base_insight("d1", "They avoid conflict");
        let mut b = base_insight("d1", "They seek out conflict");
        b.id = new_id();
        b.summary = "They actively seek out difficult conversations".to_string();
        insights::create(&pool, &a).await.expect("a");
        insights::create(&pool, &b).await.expect("b");

        let report = engine.critique_insight(&a.id).await.expect("critique");
        assert_eq!(report.contradictions, vec![b.id.clone()]);

        let edges = entities::relationships_for(&pool, &a.id).await.expect("edges");
        assert!(edges.iter().any(|e| e.relation_type == CONTRADICTS && e.to_id == b.id));

        let stored_b = insights::get(&pool, &b.id).await.expect("get").expect("found");
        assert!(stored_b.confidence < 0.8);
    }

    #[tokio::test]
    async fn confidence_floor_rejects() {
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(NO_CONTRADICTION));
        let (engine, pool) = setup(provider).await;

        seed_document(&pool, "d1", "unrelated content entirely").await;
        let mut insight = base_insight("d1", "fabricated excerpt one");
        insight.excerpts.push("fabricated excerpt two".to_string());
        insight.confidence = 0.4; // two ungrounded hits: 0.4 * 0.7 * 0.7 < 0.25
        insights::create(&pool, &insight).await.expect("insight");

        let report = engine.critique_insight(&insight.id).await.expect("critique");
        assert_eq!(report.outcome, CritiqueOutcome::Rejected);

        let stored = insights::get(&pool, &insight.id).await.expect("get").expect("found");
        assert_eq!(stored.status, InsightStatus::Rejected);
    }

    #[tokio::test]
    async fn reflexion_runs_once_then_is_final() {
        let refined = r#"{
            "insights": [
                {
                    "summary": "Grounded observation this time",
                    "themes": ["work"],
                    "significance": 0.6,
                    "confidence": 0.8,
                    "excerpt": "the content of the document"
                }
            ]
        }"#;
        let provider =
            Arc::new(MockProvider::new("anthropic", "m").with_default_response(refined));
        let (engine, pool) = setup(provider).await;

        seed_document(
            &pool,
            "d1",
            "the content of the document goes on long enough to pass the word count gate easily today",
        )
        .await;
        let mut insight = base_insight("d1", "never appeared");
        insight.status = InsightStatus::Rejected;
        insights::create(&pool, &insight).await.expect("insight");

        let router = Arc::new(
            ProviderRouter::new(
                vec![Arc::new(MockProvider::new("anthropic", "m").with_default_response(refined))
                    as Arc<dyn crate::llm::LlmProvider>],
                2,
                5_000,
                pool.clone(),
            )
            .expect("router"),
        );
        let llm = Arc::new(ResponseCache::new(
            Box::new(KvCacheStore::new(pool.clone(), None)),
            router,
            pool.clone(),
        ));
        let extractor = Extractor::new(pool.clone(), llm, ExtractionConfig::default());

        let first = engine
            .refine_rejected(&insight.id, &extractor)
            .await
            .expect("reflexion");
        let outcome = first.expect("ran");
        assert_eq!(outcome.created.len(), 1);

        // Second attempt is refused: the decision is final
        let second = engine
            .refine_rejected(&insight.id, &extractor)
            .await
            .expect("reflexion");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn reflexion_skips_non_rejected() {
        let provider = Arc::new(MockProvider::new("anthropic", "m"));
        let (engine, pool) = setup(provider.clone()).await;

        seed_document(&pool, "d1", "content here").await;
        let insight = base_insight("d1", "content here");
        insights::create(&pool, &insight).await.expect("insight");

        let router =
            Arc::new(ProviderRouter::new(vec![provider], 2, 5_000, pool.clone()).expect("router"));
        let llm = Arc::new(ResponseCache::new(
            Box::new(KvCacheStore::new(pool.clone(), None)),
            router,
            pool.clone(),
        ));
        let extractor = Extractor::new(pool.clone(), llm, ExtractionConfig::default());

        let result = engine
            .refine_rejected(&insight.id, &extractor)
            .await
            .expect("reflexion");
        assert!(result.is_none());
    }

    #[test]
    fn heuristic_blends_factors() {
        let corpus: BTreeSet<String> =
            ["work".to_string(), "avoidance".to_string()].into_iter().collect();
        let insight = base_insight("d1", "x");
        let h = heuristic_significance(&insight, &corpus);
        assert!(h > 0.0 && h <= 1.0);

        // Same insight with unknown themes scores lower
        let mut alien = base_insight("d1", "x");
        alien.themes = ["astrology".to_string(), "submarines".to_string()].into_iter().collect();
        assert!(heuristic_significance(&alien, &corpus) < h);
    }

    #[test]
    fn normalise_for_match_collapses_whitespace_and_case() {
        assert_eq!(
            normalise_for_match("  The   REPORT\n\twas late "),
            "the report was late"
        );
    }
}
