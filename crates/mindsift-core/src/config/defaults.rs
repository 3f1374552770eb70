//! Whole-struct `Default` impls for configuration sections.
//!
//! Field-level serde defaults live next to the struct definitions; these
//! impls exist so `Config::default()` produces a fully usable engine
//! configuration without a config file.

use super::{
    CacheConfig, CorrelationConfig, CritiqueConfig, ExtractionConfig, QueueConfig, RouterConfig,
    SignalsConfig, StorageConfig, SynthesisConfig,
};

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            high_emotion_per_100_words: 3.0,
            self_reflective_min_questions: 2,
            narrative_past_per_100_words: 4.0,
            analytical_per_100_words: 3.0,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            model: super::default_extraction_model(),
            temperature: 0.3,
            max_tokens: 2000,
            batch_size: 10,
            max_passes: 3,
            max_content_chars: 8000,
            min_content_words: 10,
            min_confidence: 0.3,
            min_significance: 0.2,
            similarity_threshold: 0.7,
            similarity_theme_weight: 0.4,
            similarity_pattern_weight: 0.2,
            similarity_summary_weight: 0.4,
            max_insights_per_document: 5,
        }
    }
}

impl Default for CritiqueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_floor: 0.25,
            calibration_band: 0.3,
            contradiction_max_pairs_per_insight: 8,
        }
    }
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            model: super::default_correlation_model(),
            temperature: 0.4,
            max_tokens: 3000,
            strategy: "auto".to_string(),
            min_cluster: 3,
            max_passes: 2,
            yield_threshold: 0.05,
            time_bucket_days: 182,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: super::default_synthesis_model(),
            temperature: 0.5,
            max_tokens: 4000,
            min_patterns: 1,
            significance_threshold: 0.5,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            provider_preference: super::default_provider_preference(),
            max_retries: 2,
            timeout_ms: 30_000,
            anthropic: super::ProviderConfig::default(),
            openai: super::ProviderConfig::default(),
            ollama: super::ProviderConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: "fs".to_string(),
            dir: super::default_cache_dir(),
            ttl_secs: 0,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            lease_ms: 60_000,
            max_attempts: 3,
            poll_interval_seconds: 2,
            poll_jitter_seconds: 1,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: super::default_db_path(),
        }
    }
}
