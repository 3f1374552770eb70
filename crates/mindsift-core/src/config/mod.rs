//! Configuration management for the Mindsift engine.
//!
//! Two-layer configuration loading:
//! 1. Built-in defaults (every field has one)
//! 2. TOML config file (`~/.mindsift/config.toml` or an explicit path)
//!
//! All thresholds and limits are tunable. The defaults are sensible
//! starting points; `Config::for_testing()` lowers the quality floors so
//! small fixtures survive the filters.

mod defaults;
mod validation;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the Mindsift engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Tier 0 signal extraction settings.
    #[serde(default)]
    pub signals: SignalsConfig,

    /// Tier 1 insight extraction settings.
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Critique engine settings.
    #[serde(default)]
    pub critique: CritiqueConfig,

    /// Tier 2 clustering and pattern settings.
    #[serde(default)]
    pub correlation: CorrelationConfig,

    /// Tier 3 synthesis settings.
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// LLM provider router settings.
    #[serde(default)]
    pub router: RouterConfig,

    /// LLM response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Work queue and worker pool settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Data storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Tier 0 signal extraction settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalsConfig {
    /// Whether to run Tier 0 on ingest.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Exclamations + all-caps + emotion hits per 100 words to flag `high_emotion`.
    #[serde(default = "default_high_emotion_per_100_words")]
    pub high_emotion_per_100_words: f64,

    /// Self-inquiry questions to flag `self_reflective`.
    #[serde(default = "default_self_reflective_min_questions")]
    pub self_reflective_min_questions: u32,

    /// Past-tense temporal references per 100 words to flag `narrative`.
    #[serde(default = "default_narrative_past_per_100_words")]
    pub narrative_past_per_100_words: f64,

    /// Hedge + absolute hits per 100 words to flag `analytical`.
    #[serde(default = "default_analytical_per_100_words")]
    pub analytical_per_100_words: f64,
}

/// Tier 1 insight extraction settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    /// Model for extraction calls (low-cost, high-volume).
    #[serde(default = "default_extraction_model")]
    pub model: String,

    /// Sampling temperature. Lower = more consistent.
    #[serde(default = "default_extraction_temperature")]
    pub temperature: f32,

    /// Max response tokens per extraction call.
    #[serde(default = "default_extraction_max_tokens")]
    pub max_tokens: u32,

    /// Documents per batch.
    #[serde(default = "default_extraction_batch_size")]
    pub batch_size: u32,

    /// Max refinement (reflexion) passes per document.
    #[serde(default = "default_extraction_max_passes")]
    pub max_passes: u32,

    /// Truncate document content beyond this many characters.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Skip documents shorter than this many words.
    #[serde(default = "default_min_content_words")]
    pub min_content_words: usize,

    /// Discard insights below this confidence.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Discard insights below this significance.
    #[serde(default = "default_min_significance")]
    pub min_significance: f64,

    /// Merge insights scoring above this similarity.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Weight of theme Jaccard in the similarity score.
    #[serde(default = "default_similarity_theme_weight")]
    pub similarity_theme_weight: f64,

    /// Weight of pattern Jaccard in the similarity score.
    #[serde(default = "default_similarity_pattern_weight")]
    pub similarity_pattern_weight: f64,

    /// Weight of summary TF-IDF cosine in the similarity score.
    #[serde(default = "default_similarity_summary_weight")]
    pub similarity_summary_weight: f64,

    /// Cap on insights extracted from a single document.
    #[serde(default = "default_max_insights_per_document")]
    pub max_insights_per_document: usize,
}

/// Critique engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CritiqueConfig {
    /// Whether critique runs after extraction.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Insights falling below this confidence after critique are rejected.
    #[serde(default = "default_confidence_floor")]
    pub confidence_floor: f64,

    /// Allowed deviation between claimed and heuristic significance
    /// before recalibration kicks in.
    #[serde(default = "default_calibration_band")]
    pub calibration_band: f64,

    /// Cap on LLM contradiction comparisons per insight, picked by
    /// most-theme-overlap.
    #[serde(default = "default_contradiction_max_pairs")]
    pub contradiction_max_pairs_per_insight: usize,
}

/// Tier 2 clustering and pattern settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorrelationConfig {
    /// Model for pattern synthesis calls.
    #[serde(default = "default_correlation_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_correlation_temperature")]
    pub temperature: f32,

    /// Max response tokens per pattern call.
    #[serde(default = "default_correlation_max_tokens")]
    pub max_tokens: u32,

    /// Clustering strategy: "theme", "time", "entity", or "auto".
    #[serde(default = "default_correlation_strategy")]
    pub strategy: String,

    /// Discard clusters smaller than this.
    #[serde(default = "default_correlation_min_cluster")]
    pub min_cluster: usize,

    /// Max correlation loop iterations.
    #[serde(default = "default_correlation_max_passes")]
    pub max_passes: u32,

    /// Stop iterating when new connections fall below this fraction.
    #[serde(default = "default_correlation_yield_threshold")]
    pub yield_threshold: f64,

    /// Width of a time-clustering bucket in days.
    #[serde(default = "default_time_bucket_days")]
    pub time_bucket_days: i64,
}

/// Tier 3 synthesis settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SynthesisConfig {
    /// Model for synthesis calls.
    #[serde(default = "default_synthesis_model")]
    pub model: String,

    /// Sampling temperature.
    #[serde(default = "default_synthesis_temperature")]
    pub temperature: f32,

    /// Max response tokens per synthesis call.
    #[serde(default = "default_synthesis_max_tokens")]
    pub max_tokens: u32,

    /// Minimum patterns before Tier 3 runs.
    #[serde(default = "default_synthesis_min_patterns")]
    pub min_patterns: usize,

    /// Minimum mean pattern strength before Tier 3 runs.
    #[serde(default = "default_synthesis_significance_threshold")]
    pub significance_threshold: f64,
}

/// LLM provider router settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterConfig {
    /// Ordered provider preference. Unconfigured names are skipped.
    #[serde(default = "default_provider_preference")]
    pub provider_preference: Vec<String>,

    /// Retry attempts per provider for transient errors.
    #[serde(default = "default_router_max_retries")]
    pub max_retries: u32,

    /// Wall-clock timeout per LLM call in milliseconds.
    #[serde(default = "default_router_timeout_ms")]
    pub timeout_ms: u64,

    /// Anthropic provider credentials and model.
    #[serde(default)]
    pub anthropic: ProviderConfig,

    /// OpenAI-compatible provider credentials and model.
    #[serde(default)]
    pub openai: ProviderConfig,

    /// Ollama (local) provider settings; no API key required.
    #[serde(default)]
    pub ollama: ProviderConfig,
}

/// Credentials and model selection for one provider.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// API key. A provider without a key is considered unconfigured
    /// (except ollama, which needs only a base URL).
    #[serde(default)]
    pub api_key: Option<String>,

    /// Default model for this provider.
    #[serde(default)]
    pub model: String,

    /// Override URL for custom or local endpoints.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// LLM response cache settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Cache backend: "fs" (sharded files) or "kv" (cache_entries table).
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    /// Directory for the filesystem backend.
    #[serde(default = "default_cache_dir")]
    pub dir: String,

    /// Entry time-to-live in seconds. 0 = never expires.
    #[serde(default)]
    pub ttl_secs: u64,
}

/// Work queue and worker pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Number of worker tasks. 0 = number of CPU cores.
    #[serde(default)]
    pub worker_count: usize,

    /// Lease duration for a claimed item in milliseconds.
    #[serde(default = "default_queue_lease_ms")]
    pub lease_ms: u64,

    /// Attempts before an item is marked failed.
    #[serde(default = "default_queue_max_attempts")]
    pub max_attempts: u32,

    /// Base seconds of the idle poll interval.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,

    /// Max random jitter added to the idle poll interval, in seconds.
    #[serde(default = "default_poll_jitter_seconds")]
    pub poll_jitter_seconds: u64,
}

/// Data storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// --- Default value functions for serde ---

fn default_true() -> bool {
    true
}
fn default_high_emotion_per_100_words() -> f64 {
    3.0
}
fn default_self_reflective_min_questions() -> u32 {
    2
}
fn default_narrative_past_per_100_words() -> f64 {
    4.0
}
fn default_analytical_per_100_words() -> f64 {
    3.0
}
fn default_extraction_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_extraction_temperature() -> f32 {
    0.3
}
fn default_extraction_max_tokens() -> u32 {
    2000
}
fn default_extraction_batch_size() -> u32 {
    10
}
fn default_extraction_max_passes() -> u32 {
    3
}
fn default_max_content_chars() -> usize {
    8000
}
fn default_min_content_words() -> usize {
    10
}
fn default_min_confidence() -> f64 {
    0.3
}
fn default_min_significance() -> f64 {
    0.2
}
fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_similarity_theme_weight() -> f64 {
    0.4
}
fn default_similarity_pattern_weight() -> f64 {
    0.2
}
fn default_similarity_summary_weight() -> f64 {
    0.4
}
fn default_max_insights_per_document() -> usize {
    5
}
fn default_confidence_floor() -> f64 {
    0.25
}
fn default_calibration_band() -> f64 {
    0.3
}
fn default_contradiction_max_pairs() -> usize {
    8
}
fn default_correlation_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_correlation_temperature() -> f32 {
    0.4
}
fn default_correlation_max_tokens() -> u32 {
    3000
}
fn default_correlation_strategy() -> String {
    "auto".to_string()
}
fn default_correlation_min_cluster() -> usize {
    3
}
fn default_correlation_max_passes() -> u32 {
    2
}
fn default_correlation_yield_threshold() -> f64 {
    0.05
}
fn default_time_bucket_days() -> i64 {
    182
}
fn default_synthesis_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_synthesis_temperature() -> f32 {
    0.5
}
fn default_synthesis_max_tokens() -> u32 {
    4000
}
fn default_synthesis_min_patterns() -> usize {
    1
}
fn default_synthesis_significance_threshold() -> f64 {
    0.5
}
fn default_provider_preference() -> Vec<String> {
    vec!["anthropic".to_string(), "openai".to_string()]
}
fn default_router_max_retries() -> u32 {
    2
}
fn default_router_timeout_ms() -> u64 {
    30_000
}
fn default_cache_backend() -> String {
    "fs".to_string()
}
fn default_cache_dir() -> String {
    "~/.mindsift/cache".to_string()
}
fn default_queue_lease_ms() -> u64 {
    60_000
}
fn default_queue_max_attempts() -> u32 {
    3
}
fn default_poll_interval_seconds() -> u64 {
    2
}
fn default_poll_jitter_seconds() -> u64 {
    1
}
fn default_db_path() -> String {
    "~/.mindsift/mindsift.db".to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// With an explicit path, a missing file is an error. With no path,
    /// the default location is tried and defaults are used if absent.
    pub fn load(config_path: Option<&str>) -> Result<Config, ConfigError> {
        let (path, explicit) = Self::resolve_config_path(config_path);

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                toml::from_str::<Config>(&contents).map_err(|e| ConfigError::ParseError { source: e })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if explicit {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    });
                }
                Ok(Config::default())
            }
            Err(_) => Err(ConfigError::FileNotFound {
                path: path.display().to_string(),
            }),
        }
    }

    /// Load configuration and validate it, returning all validation errors at once.
    pub fn load_and_validate(config_path: Option<&str>) -> Result<Config, Vec<ConfigError>> {
        let config = Config::load(config_path).map_err(|e| vec![e])?;
        config.validate()?;
        Ok(config)
    }

    /// Config tuned for tests: low quality floors, small batches.
    pub fn for_testing() -> Config {
        let mut config = Config::default();
        config.extraction.min_confidence = 0.1;
        config.extraction.min_significance = 0.1;
        config.extraction.batch_size = 5;
        config.queue.worker_count = 1;
        config.queue.poll_interval_seconds = 0;
        config.queue.poll_jitter_seconds = 0;
        config
    }

    /// Config tuned for production: higher quality floors.
    pub fn for_production() -> Config {
        let mut config = Config::default();
        config.extraction.min_confidence = 0.5;
        config.extraction.min_significance = 0.4;
        config
    }

    fn resolve_config_path(config_path: Option<&str>) -> (PathBuf, bool) {
        if let Some(path) = config_path {
            return (PathBuf::from(path), true);
        }
        let default = dirs::home_dir()
            .map(|h| h.join(".mindsift").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".mindsift/config.toml"));
        (default, false)
    }
}
