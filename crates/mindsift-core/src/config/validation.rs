//! Configuration validation.
//!
//! Collects every problem rather than stopping at the first, so a user
//! can fix a config file in one round trip.

use super::Config;
use crate::error::ConfigError;

impl Config {
    /// Validate the configuration, returning all errors found (not just the first).
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        let ex = &self.extraction;
        let weight_sum =
            ex.similarity_theme_weight + ex.similarity_pattern_weight + ex.similarity_summary_weight;
        if (weight_sum - 1.0).abs() > 1e-6 {
            errors.push(ConfigError::InvalidValue {
                field: "extraction.similarity_*_weight".to_string(),
                message: format!("weights must sum to 1.0, got {weight_sum}"),
            });
        }
        for (field, value) in [
            ("extraction.min_confidence", ex.min_confidence),
            ("extraction.min_significance", ex.min_significance),
            ("extraction.similarity_threshold", ex.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                errors.push(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("must be between 0.0 and 1.0, got {value}"),
                });
            }
        }
        if ex.max_content_chars == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "extraction.max_content_chars".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if ex.max_passes == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "extraction.max_passes".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if !matches!(
            self.correlation.strategy.as_str(),
            "theme" | "time" | "entity" | "auto"
        ) {
            errors.push(ConfigError::InvalidValue {
                field: "correlation.strategy".to_string(),
                message: format!(
                    "must be theme, time, entity, or auto, got '{}'",
                    self.correlation.strategy
                ),
            });
        }
        if self.correlation.min_cluster == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "correlation.min_cluster".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.synthesis.min_patterns == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "synthesis.min_patterns".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.router.provider_preference.is_empty() {
            errors.push(ConfigError::MissingField {
                field: "router.provider_preference".to_string(),
            });
        }
        if self.router.timeout_ms == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "router.timeout_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }

        if !matches!(self.cache.backend.as_str(), "fs" | "kv") {
            errors.push(ConfigError::InvalidValue {
                field: "cache.backend".to_string(),
                message: format!("must be fs or kv, got '{}'", self.cache.backend),
            });
        }

        if self.queue.lease_ms == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "queue.lease_ms".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.queue.max_attempts == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "queue.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
