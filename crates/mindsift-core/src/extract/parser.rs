//! Strict parsing of the extraction model's JSON output.
//!
//! The model is asked for a fixed schema. Unrecognised fields are
//! dropped; missing required fields fail the parse, which the extractor
//! surfaces as `BadModelOutput` (one stricter retry permitted).

use serde::Deserialize;

use crate::llm::strip_json_fences;
use crate::model::InsightType;

use super::ExtractError;

/// One parsed candidate insight, scores clamped into range.
#[derive(Debug, Clone)]
pub struct CandidateInsight {
    pub summary: String,
    pub themes: Vec<String>,
    pub emotional_tags: Vec<String>,
    pub patterns: Vec<String>,
    pub significance: f64,
    pub confidence: f64,
    pub insight_type: InsightType,
    pub excerpt: Option<String>,
}

/// The full parsed extraction response.
#[derive(Debug)]
pub struct ParsedExtraction {
    pub insights: Vec<CandidateInsight>,
    pub content_quality: Option<String>,
}

#[derive(Deserialize)]
struct RawResponse {
    insights: Vec<RawInsight>,
    #[serde(default)]
    meta: Option<RawMeta>,
}

#[derive(Deserialize)]
struct RawInsight {
    summary: String,
    #[serde(default)]
    themes: Vec<String>,
    #[serde(default)]
    emotional_tags: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
    significance: f64,
    confidence: f64,
    #[serde(default)]
    insight_type: String,
    #[serde(default)]
    excerpt: Option<String>,
}

#[derive(Deserialize)]
struct RawMeta {
    #[serde(default)]
    content_quality: Option<String>,
}

/// Parse a model response against the extraction schema.
pub fn parse_extraction(content: &str) -> Result<ParsedExtraction, ExtractError> {
    let cleaned = strip_json_fences(content);
    let raw: RawResponse =
        serde_json::from_str(cleaned).map_err(|e| ExtractError::BadModelOutput {
            message: format!("extraction response did not match schema: {e}"),
        })?;

    let insights = raw
        .insights
        .into_iter()
        .filter(|i| !i.summary.trim().is_empty())
        .map(|i| CandidateInsight {
            summary: i.summary.trim().to_string(),
            themes: normalise_tags(i.themes),
            emotional_tags: normalise_tags(i.emotional_tags),
            patterns: normalise_tags(i.patterns),
            significance: i.significance.clamp(0.0, 1.0),
            confidence: i.confidence.clamp(0.0, 1.0),
            insight_type: InsightType::parse(&i.insight_type),
            excerpt: i.excerpt.filter(|e| !e.trim().is_empty()),
        })
        .collect();

    Ok(ParsedExtraction {
        insights,
        content_quality: raw.meta.and_then(|m| m.content_quality),
    })
}

fn normalise_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}
