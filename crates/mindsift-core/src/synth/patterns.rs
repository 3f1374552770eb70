//! Tier 2: pattern generation over insight clusters.
//!
//! Each surviving cluster is summarised for the model, which names the
//! pattern and scores its strength. Passes repeat up to the configured
//! limit; a pass that adds too few new insight-to-pattern connections
//! terminates the loop early.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::cache::ResponseCache;
use crate::config::CorrelationConfig;
use crate::llm::{strip_json_fences, GenerationParams, LlmRequest};
use crate::model::{new_id, Pattern, PatternType};
use crate::storage::{insights, patterns, DbPool};

use super::cluster::{self, ClusterStrategy, InsightCluster};
use super::SynthError;

/// What a correlation run produced.
#[derive(Debug, Default)]
pub struct CorrelationOutcome {
    /// Ids of patterns created.
    pub created: Vec<String>,
    /// Ids of existing patterns extended with new insights.
    pub extended: Vec<String>,
    /// Clusters below the size floor, discarded before prompting.
    pub discarded_clusters: u32,
    /// Passes actually run.
    pub passes: u32,
}

/// The Tier 2 synthesis engine.
pub struct SynthEngine {
    pool: DbPool,
    llm: std::sync::Arc<ResponseCache>,
    config: CorrelationConfig,
}

#[derive(Deserialize)]
struct RawPattern {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    pattern_type: String,
    strength: f64,
    #[serde(default)]
    metadata: serde_json::Value,
}

const PATTERN_SYSTEM: &str = "You find behavioural and emotional patterns across related \
observations about one person. Respond with JSON only, matching the requested schema.";

impl SynthEngine {
    /// Create a Tier 2 engine.
    pub fn new(
        pool: DbPool,
        llm: std::sync::Arc<ResponseCache>,
        config: CorrelationConfig,
    ) -> Self {
        Self { pool, llm, config }
    }

    /// Run correlation over the active insights of a case (or run).
    ///
    /// Pattern creation observes a snapshot of the insights loaded at
    /// the start of each pass.
    pub async fn run_correlation(
        &self,
        case_id: Option<&str>,
        run_id: Option<&str>,
    ) -> Result<CorrelationOutcome, SynthError> {
        let mut outcome = CorrelationOutcome::default();
        let strategy = ClusterStrategy::parse(&self.config.strategy);

        let mut covered: BTreeSet<String> = patterns::list(&self.pool, case_id)
            .await?
            .into_iter()
            .flat_map(|p| p.insight_ids)
            .collect();

        for pass in 0..self.config.max_passes {
            let active = insights::active(&self.pool, case_id, run_id).await?;
            let total = active.len();
            if total < self.config.min_cluster {
                tracing::debug!(total, "too few active insights for correlation");
                break;
            }

            let all_clusters = cluster::cluster(
                &active,
                strategy,
                self.config.min_cluster,
                self.config.time_bucket_days,
            );
            outcome.passes = pass + 1;

            let mut new_connections = 0usize;
            for insight_cluster in all_clusters {
                let members: BTreeSet<String> = insight_cluster
                    .insights
                    .iter()
                    .map(|i| i.id.clone())
                    .collect();
                let fresh: Vec<&String> =
                    members.iter().filter(|id| !covered.contains(*id)).collect();
                if fresh.is_empty() {
                    continue;
                }
                new_connections += fresh.len();

                let existing = self.overlapping_pattern(case_id, &members).await?;
                match existing {
                    Some(pattern) => {
                        let mut grown = pattern.insight_ids.clone();
                        grown.extend(members.iter().cloned());
                        patterns::extend(&self.pool, &pattern.id, &grown, pattern.strength)
                            .await?;
                        tracing::debug!(pattern = %pattern.id, added = fresh.len(), "pattern extended");
                        outcome.extended.push(pattern.id);
                    }
                    None => {
                        let pattern = self
                            .generate_pattern(&insight_cluster, case_id, run_id)
                            .await?;
                        patterns::insert(&self.pool, &pattern).await?;
                        outcome.created.push(pattern.id);
                    }
                }
                covered.extend(members);
            }

            let yield_fraction = new_connections as f64 / total.max(1) as f64;
            if yield_fraction < self.config.yield_threshold {
                tracing::debug!(pass, yield_fraction, "correlation yield below threshold");
                break;
            }
        }

        tracing::info!(
            created = outcome.created.len(),
            extended = outcome.extended.len(),
            passes = outcome.passes,
            "correlation finished"
        );
        Ok(outcome)
    }

    /// An existing pattern sharing at least half of the cluster's insights.
    async fn overlapping_pattern(
        &self,
        case_id: Option<&str>,
        members: &BTreeSet<String>,
    ) -> Result<Option<Pattern>, SynthError> {
        let existing = patterns::list(&self.pool, case_id).await?;
        Ok(existing.into_iter().find(|p| {
            let overlap = p.insight_ids.intersection(members).count();
            overlap * 2 >= members.len()
        }))
    }

    /// Ask the model to name and score one cluster's pattern.
    async fn generate_pattern(
        &self,
        insight_cluster: &InsightCluster,
        case_id: Option<&str>,
        run_id: Option<&str>,
    ) -> Result<Pattern, SynthError> {
        let mut listing = String::new();
        for insight in &insight_cluster.insights {
            listing.push_str(&format!("- {}\n", insight.summary));
            for excerpt in insight.excerpts.iter().take(1) {
                listing.push_str(&format!("  quote: \"{excerpt}\"\n"));
            }
        }

        let prompt = format!(
            "These observations about one person cluster together \
             (dominant themes: {}).\n\n{listing}\n\
             Name the underlying pattern. Respond with JSON only:\n\
             {{\"name\": \"short name\", \"description\": \"what the pattern is\", \
             \"pattern_type\": \"cognitive | emotional | relational | transitional | other\", \
             \"strength\": 0.0, \"metadata\": {{}}}}",
            insight_cluster.dominant_themes.join(", ")
        );

        let request = LlmRequest {
            prompt,
            system: Some(PATTERN_SYSTEM.to_string()),
            params: GenerationParams {
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
                model: Some(self.config.model.clone()),
            },
            purpose: "correlate".to_string(),
        };

        let response = self.llm.generate(&request).await?;
        let raw: RawPattern = serde_json::from_str(strip_json_fences(&response.content))
            .map_err(|e| SynthError::BadModelOutput {
                message: format!("pattern response did not match schema: {e}"),
            })?;

        Ok(Pattern {
            id: new_id(),
            name: raw.name.trim().to_string(),
            summary: raw.description.trim().to_string(),
            description: raw.description.trim().to_string(),
            pattern_type: PatternType::parse(&raw.pattern_type),
            insight_ids: insight_cluster.insights.iter().map(|i| i.id.clone()).collect(),
            strength: raw.strength.clamp(0.0, 1.0),
            metadata: serde_json::json!({
                "cohesion": insight_cluster.cohesion_score,
                "dominant_themes": insight_cluster.dominant_themes,
                "model_metadata": raw.metadata,
            }),
            case_id: case_id.map(str::to_string),
            run_id: run_id.map(str::to_string),
            created_at: chrono::Utc::now(),
        })
    }
}
