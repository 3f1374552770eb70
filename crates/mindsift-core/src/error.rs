//! Error types for the Mindsift core library.
//!
//! Each subsystem has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors. Tier-level
//! composite errors live with their modules (`extract`, `critique`, `synth`,
//! `pipeline`).

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration field is absent.
    #[error("missing required config field: {field}")]
    MissingField {
        /// The name of the missing field.
        field: String,
    },

    /// A configuration field has an unacceptable value.
    #[error("invalid value for config field '{field}': {message}")]
    InvalidValue {
        /// The name of the invalid field.
        field: String,
        /// A description of why the value is invalid.
        message: String,
    },

    /// The configuration file does not exist at the specified path.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// The path that was searched.
        path: String,
    },

    /// TOML deserialization failed.
    #[error("failed to parse config file: {source}")]
    ParseError {
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// Errors from interacting with LLM providers.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP request to the LLM endpoint failed.
    #[error("LLM HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// LLM API returned an error response.
    #[error("LLM API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// LLM provider rate limit hit.
    #[error("LLM rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The call exceeded the configured wall-clock timeout.
    #[error("LLM call timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that was exceeded, in milliseconds.
        timeout_ms: u64,
    },

    /// LLM response could not be parsed.
    #[error("failed to parse LLM response: {0}")]
    Parse(String),

    /// No LLM provider configured.
    #[error("no LLM provider configured")]
    NotConfigured,
}

impl LlmError {
    /// Whether this error is worth retrying on the same provider.
    ///
    /// Network failures, rate limits, timeouts, and 5xx responses are
    /// transient. Auth failures, missing models, and malformed requests
    /// are provider-fatal and skip straight to the next provider.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Request(_) | LlmError::RateLimited { .. } | LlmError::Timeout { .. } => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Parse(_) | LlmError::NotConfigured => false,
        }
    }
}

/// Errors from the provider router.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// No provider in the preference chain is configured.
    #[error("no LLM providers configured")]
    NoProvidersConfigured,

    /// Every provider in the chain failed or is cooling down.
    ///
    /// Carries one error string per provider attempted or skipped.
    /// Callers treat this as retryable at queue level.
    #[error("all LLM providers failed: {}", errors.join("; "))]
    AllProvidersFailed {
        /// Per-provider error descriptions, in chain order.
        errors: Vec<String>,
    },
}

/// Errors from SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to SQLite database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },
}

/// Errors from the LLM response cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Filesystem I/O failed.
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cached entry could not be serialized or deserialized.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database-backed cache failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the entity registry and graph.
#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// A relationship endpoint does not exist in the registry.
    #[error("entity not found: {id}")]
    EntityNotFound {
        /// The id that failed to resolve.
        id: String,
    },

    /// Merging an entity into itself (directly or via a merge chain).
    #[error("cannot merge entity {id} into itself")]
    SelfMerge {
        /// The offending entity id.
        id: String,
    },

    /// LLM-based validation failed (router exhaustion or bad output).
    #[error("entity validation failed: {0}")]
    Validation(String),

    /// Storage-layer error.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
