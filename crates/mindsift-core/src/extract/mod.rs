//! Tier 1: LLM insight extraction from documents.
//!
//! Takes a document (with its Tier 0 signals) and produces zero or more
//! persisted insights. Candidates below the quality floors are dropped;
//! near-duplicates of existing insights are merged rather than inserted.
//! A single document's failure never aborts a batch: the document is
//! only stamped `processed_at` on success and the queue retries the rest.

pub mod parser;
pub mod prompt;
pub mod similarity;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::cache::ResponseCache;
use crate::config::ExtractionConfig;
use crate::error::{RouterError, StorageError};
use crate::llm::{GenerationParams, LlmRequest};
use crate::model::{new_id, Document, Insight, InsightStatus};
use crate::storage::{documents, insights, DbPool};

use parser::CandidateInsight;
use similarity::SimilarityWeights;

/// Errors from the extraction tier.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The model's response did not parse against the schema, even
    /// after the stricter retry.
    #[error("bad model output: {message}")]
    BadModelOutput {
        /// What failed to parse.
        message: String,
    },

    /// Router exhaustion; retryable at queue level.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// Storage-layer error.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// What one extraction run produced.
#[derive(Debug, Default)]
pub struct ExtractOutcome {
    /// Ids of newly created insights.
    pub created: Vec<String>,
    /// `(incoming_id, target_id)` pairs for merged candidates.
    pub merged: Vec<(String, String)>,
    /// Candidates dropped below the quality floors.
    pub dropped_low_quality: u32,
    /// The document was skipped by the word-count gate.
    pub gated: bool,
}

/// The Tier 1 extractor.
pub struct Extractor {
    pool: DbPool,
    llm: std::sync::Arc<ResponseCache>,
    config: ExtractionConfig,
}

impl Extractor {
    /// Create an extractor.
    pub fn new(
        pool: DbPool,
        llm: std::sync::Arc<ResponseCache>,
        config: ExtractionConfig,
    ) -> Self {
        Self { pool, llm, config }
    }

    /// Run extraction for one document and persist the results.
    ///
    /// On success the document is stamped `processed_at`.
    pub async fn extract_document(
        &self,
        document: &Document,
        case_id: Option<&str>,
        run_id: Option<&str>,
    ) -> Result<ExtractOutcome, ExtractError> {
        self.run(document, case_id, run_id, None).await
    }

    /// Reflexion pass: re-extract with critique notes in the prompt.
    pub async fn refine_document(
        &self,
        document: &Document,
        case_id: Option<&str>,
        run_id: Option<&str>,
        critique_notes: &str,
    ) -> Result<ExtractOutcome, ExtractError> {
        self.run(document, case_id, run_id, Some(critique_notes)).await
    }

    async fn run(
        &self,
        document: &Document,
        case_id: Option<&str>,
        run_id: Option<&str>,
        critique_notes: Option<&str>,
    ) -> Result<ExtractOutcome, ExtractError> {
        let word_count = document.content.split_whitespace().count();
        if word_count < self.config.min_content_words {
            tracing::debug!(
                document = %document.id,
                word_count,
                "document below word-count gate, skipping"
            );
            documents::mark_processed(&self.pool, &document.id).await?;
            return Ok(ExtractOutcome {
                gated: true,
                ..ExtractOutcome::default()
            });
        }

        let content = prompt::truncate_content(&document.content, self.config.max_content_chars);
        let themes = self.known_themes(case_id).await?;
        let signals_summary = document
            .signals
            .as_ref()
            .map(crate::signals::Signals::summarise_for_prompt);

        let user_prompt = match critique_notes {
            Some(notes) => prompt::build_refine_prompt(
                notes,
                content,
                self.config.max_insights_per_document,
            ),
            None => prompt::build_extraction_prompt(
                None,
                &themes,
                signals_summary.as_deref(),
                content,
                self.config.max_insights_per_document,
            ),
        };

        let system = match critique_notes {
            Some(_) => prompt::REFINE_SYSTEM,
            None => prompt::EXTRACTION_SYSTEM,
        };
        let parsed = self.call_and_parse(&user_prompt, system).await?;

        // Cancellation may have arrived while the model call was in
        // flight. The response is already cached; drop the DB effects.
        if let Some(case_id) = case_id {
            if crate::storage::cases::is_cancel_requested(&self.pool, case_id).await? {
                tracing::debug!(case_id, document = %document.id, "case cancelled, dropping extraction");
                return Ok(ExtractOutcome::default());
            }
        }

        let mut outcome = ExtractOutcome::default();
        let candidates: Vec<CandidateInsight> = parsed
            .insights
            .into_iter()
            .take(self.config.max_insights_per_document)
            .collect();

        for candidate in candidates {
            if candidate.confidence < self.config.min_confidence
                || candidate.significance < self.config.min_significance
            {
                tracing::debug!(
                    summary = %candidate.summary,
                    significance = candidate.significance,
                    confidence = candidate.confidence,
                    "candidate below quality floor"
                );
                outcome.dropped_low_quality += 1;
                continue;
            }

            let incoming = self.to_insight(candidate, document, case_id, run_id);
            self.persist(incoming, case_id, &mut outcome).await?;
        }

        documents::mark_processed(&self.pool, &document.id).await?;
        tracing::info!(
            document = %document.id,
            created = outcome.created.len(),
            merged = outcome.merged.len(),
            dropped = outcome.dropped_low_quality,
            "document extracted"
        );
        Ok(outcome)
    }

    /// Call the router (through the cache) and parse; one stricter retry
    /// on malformed output.
    async fn call_and_parse(
        &self,
        user_prompt: &str,
        system: &str,
    ) -> Result<parser::ParsedExtraction, ExtractError> {
        let request = LlmRequest {
            prompt: user_prompt.to_string(),
            system: Some(system.to_string()),
            params: GenerationParams {
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
                model: Some(self.config.model.clone()),
            },
            purpose: "extract".to_string(),
        };

        let response = self.llm.generate(&request).await?;
        match parser::parse_extraction(&response.content) {
            Ok(parsed) => Ok(parsed),
            Err(first_err) => {
                tracing::warn!(error = %first_err, "malformed extraction output, retrying strict");
                let retry = LlmRequest {
                    system: Some(prompt::STRICT_SYSTEM.to_string()),
                    ..request
                };
                let response = self.llm.generate(&retry).await?;
                parser::parse_extraction(&response.content)
            }
        }
    }

    fn to_insight(
        &self,
        candidate: CandidateInsight,
        document: &Document,
        case_id: Option<&str>,
        run_id: Option<&str>,
    ) -> Insight {
        let now = Utc::now();
        let source_date = document_date(document);

        Insight {
            id: new_id(),
            summary: candidate.summary,
            themes: candidate.themes.into_iter().collect(),
            emotional_tags: candidate.emotional_tags.into_iter().collect(),
            patterns: candidate.patterns.into_iter().collect(),
            significance: candidate.significance,
            confidence: candidate.confidence,
            insight_type: candidate.insight_type,
            status: InsightStatus::Raw,
            source_ids: [document.id.clone()].into_iter().collect(),
            excerpts: candidate.excerpt.into_iter().collect(),
            pass_count: 1,
            earliest_source_date: Some(source_date),
            latest_source_date: Some(source_date),
            case_id: case_id.map(str::to_string),
            run_id: run_id.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    /// Insert the insight, or merge it into the best near-duplicate.
    async fn persist(
        &self,
        incoming: Insight,
        case_id: Option<&str>,
        outcome: &mut ExtractOutcome,
    ) -> Result<(), ExtractError> {
        let candidates = insights::similar_candidates(&self.pool, &incoming.themes, case_id, 200)
            .await?
            .into_iter()
            .filter(|c| c.id != incoming.id)
            .collect::<Vec<_>>();

        let weights = SimilarityWeights {
            themes: self.config.similarity_theme_weight,
            patterns: self.config.similarity_pattern_weight,
            summary: self.config.similarity_summary_weight,
        };

        if let Some((index, score)) = similarity::find_best_match(
            &incoming,
            &candidates,
            weights,
            self.config.similarity_threshold,
        ) {
            let target = similarity::merge_insights(&candidates[index], &incoming);
            insights::merge(&self.pool, &target, &incoming, score).await?;
            outcome.merged.push((incoming.id, target.id));
        } else {
            insights::create(&self.pool, &incoming).await?;
            outcome.created.push(incoming.id);
        }
        Ok(())
    }

    /// Theme vocabulary already in the store, for naming consistency.
    async fn known_themes(&self, case_id: Option<&str>) -> Result<Vec<String>, StorageError> {
        let active = insights::active(&self.pool, case_id, None).await?;
        let mut themes: BTreeSet<String> = BTreeSet::new();
        for insight in active {
            themes.extend(insight.themes);
        }
        Ok(themes.into_iter().take(30).collect())
    }
}

/// The best-effort source date of a document: a `date` metadata field
/// when the parser provided one, otherwise the ingest time.
fn document_date(document: &Document) -> DateTime<Utc> {
    document
        .metadata
        .get("date")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or(document.created_at, |d| d.with_timezone(&Utc))
}
