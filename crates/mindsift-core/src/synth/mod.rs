//! Tier 2 and Tier 3: pattern synthesis over insights, and higher-order
//! synthesis over patterns.
//!
//! This is where recursive insight happens: isolated observations are
//! clustered into named patterns, and patterns are folded into narrative
//! syntheses.

pub mod cluster;
pub mod patterns;
pub mod synthesizer;

pub use cluster::{ClusterStrategy, InsightCluster};
pub use patterns::{CorrelationOutcome, SynthEngine};
pub use synthesizer::{Synthesizer, SynthesisOutcome};

use crate::error::{RouterError, StorageError};

/// Errors from the synthesis tiers.
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    /// The model's response did not parse against the schema.
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
