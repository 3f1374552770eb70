//! Multi-provider router with automatic failover.
//!
//! Tries each configured provider in preference order until one
//! succeeds. Per-provider circuit breakers take repeatedly failing
//! providers out of rotation for a cooldown window; transient errors are
//! retried with exponential backoff; every call is bounded by a
//! wall-clock timeout that cancels retries. Successful calls are priced
//! and appended to the cost ledger.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use super::{pricing, LlmProvider, LlmRequest, LlmResponse};
use crate::error::{LlmError, RouterError};
use crate::storage::{cost_ledger, DbPool};

/// Consecutive failures before a provider is placed in cooldown.
const FAILURE_THRESHOLD: u32 = 3;

/// How long a tripped provider stays out of rotation.
const COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct ProviderHealth {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

/// Routes LLM requests across providers with automatic failover.
///
/// The router is stateless per call; circuit-breaker state is shared
/// behind a mutex and safe under concurrent access. No ordering between
/// concurrent calls is promised.
pub struct ProviderRouter {
    chain: Vec<Arc<dyn LlmProvider>>,
    health: Mutex<HashMap<String, ProviderHealth>>,
    max_retries: u32,
    timeout: Duration,
    retry_min: Duration,
    retry_max: Duration,
    pool: DbPool,
}

impl ProviderRouter {
    /// Create a router over an ordered provider chain.
    ///
    /// Errors if the chain is empty (no providers configured).
    pub fn new(
        chain: Vec<Arc<dyn LlmProvider>>,
        max_retries: u32,
        timeout_ms: u64,
        pool: DbPool,
    ) -> Result<Self, RouterError> {
        if chain.is_empty() {
            return Err(RouterError::NoProvidersConfigured);
        }

        let health = chain
            .iter()
            .map(|p| (p.name().to_string(), ProviderHealth::default()))
            .collect();

        tracing::info!(
            chain = %chain.iter().map(|p| p.name()).collect::<Vec<_>>().join(" -> "),
            "provider router initialized"
        );

        Ok(Self {
            chain,
            health: Mutex::new(health),
            max_retries: max_retries.max(1),
            timeout: Duration::from_millis(timeout_ms),
            retry_min: Duration::from_secs(2),
            retry_max: Duration::from_secs(10),
            pool,
        })
    }

    /// Override the retry backoff window (tests use millisecond delays).
    #[must_use]
    pub fn with_retry_window(mut self, min: Duration, max: Duration) -> Self {
        self.retry_min = min;
        self.retry_max = max;
        self
    }

    /// The identity used for cache keying: the first provider in the
    /// chain and the model the request would run with on it.
    pub fn primary_identity(&self, request: &LlmRequest) -> (String, String) {
        let provider = &self.chain[0];
        let model = request
            .params
            .model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string());
        (provider.name().to_string(), model)
    }

    /// Generate a response with automatic failover.
    ///
    /// Tries each healthy provider in chain order. Transient errors are
    /// retried on the same provider; provider-fatal errors skip ahead.
    /// When every provider fails or is cooling down, returns
    /// `AllProvidersFailed` with the per-provider error list.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, RouterError> {
        let mut errors = Vec::new();

        for provider in &self.chain {
            let name = provider.name();

            if !self.is_healthy(name) {
                tracing::debug!(provider = name, "skipping provider in cooldown");
                errors.push(format!("{name}: in cooldown"));
                continue;
            }

            match self.call_with_retry(provider.as_ref(), request).await {
                Ok(response) => {
                    self.mark_success(name);
                    self.record_cost(name, request, &response).await;
                    tracing::debug!(
                        provider = name,
                        model = %response.model,
                        total_tokens = response.usage.total_tokens(),
                        "provider succeeded"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    tracing::warn!(provider = name, error = %err, "provider failed");
                    errors.push(format!("{name}: {err}"));
                    self.mark_failure(name);
                }
            }
        }

        Err(RouterError::AllProvidersFailed { errors })
    }

    /// Call one provider, retrying transient errors with exponential
    /// backoff. A wall-clock timeout bounds each attempt and cancels
    /// further retries when it fires.
    async fn call_with_retry(
        &self,
        provider: &dyn LlmProvider,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.backoff_delay(attempt, last_error.as_ref())).await;
            }

            let call = provider.generate(request.prompt.as_str(), request.system.as_deref(), &request.params);
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => {
                    // Timeout cancels retries for this provider
                    return Err(LlmError::Timeout {
                        timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
            };

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() => {
                    tracing::debug!(
                        provider = provider.name(),
                        attempt,
                        error = %err,
                        "transient provider error"
                    );
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error.unwrap_or(LlmError::NotConfigured))
    }

    fn backoff_delay(&self, attempt: u32, last_error: Option<&LlmError>) -> Duration {
        // Rate-limit hints win, clamped into the backoff window
        if let Some(LlmError::RateLimited { retry_after_secs }) = last_error {
            return Duration::from_secs(*retry_after_secs)
                .clamp(self.retry_min, self.retry_max);
        }

        let exp = self
            .retry_min
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.retry_max);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.retry_min.as_millis().max(1) / 4);
        exp + Duration::from_millis(u64::try_from(jitter_ms).unwrap_or(0))
    }

    async fn record_cost(&self, provider: &str, request: &LlmRequest, response: &LlmResponse) {
        let price = pricing::lookup(provider, &response.model);
        let cost = price.cost_cents(response.usage.input_tokens, response.usage.output_tokens);

        if let Err(err) = cost_ledger::append(
            &self.pool,
            provider,
            &response.model,
            response.usage.input_tokens,
            response.usage.output_tokens,
            cost,
            &request.purpose,
            false,
        )
        .await
        {
            tracing::warn!(error = %err, "failed to append cost ledger row");
        }
    }

    fn is_healthy(&self, name: &str) -> bool {
        let mut health = self.health.lock().expect("health lock");
        let Some(entry) = health.get_mut(name) else {
            return true;
        };
        match entry.cooldown_until {
            None => true,
            Some(until) if Instant::now() > until => {
                entry.consecutive_failures = 0;
                entry.cooldown_until = None;
                true
            }
            Some(_) => false,
        }
    }

    fn mark_failure(&self, name: &str) {
        let mut health = self.health.lock().expect("health lock");
        let entry = health.entry(name.to_string()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= FAILURE_THRESHOLD {
            entry.cooldown_until = Some(Instant::now() + COOLDOWN);
            tracing::warn!(
                provider = name,
                failures = entry.consecutive_failures,
                "provider placed in cooldown"
            );
        }
    }

    fn mark_success(&self, name: &str) {
        let mut health = self.health.lock().expect("health lock");
        let entry = health.entry(name.to_string()).or_default();
        entry.consecutive_failures = 0;
        entry.cooldown_until = None;
    }

    /// Current consecutive-failure count for a provider (diagnostics).
    pub fn failure_count(&self, name: &str) -> u32 {
        self.health
            .lock()
            .expect("health lock")
            .get(name)
            .map_or(0, |h| h.consecutive_failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockProvider, ScriptStep};
    use crate::storage::init_test_db;

    fn test_router(chain: Vec<Arc<dyn LlmProvider>>, pool: DbPool) -> ProviderRouter {
        ProviderRouter::new(chain, 2, 5_000, pool)
            .expect("router")
            .with_retry_window(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn failover_to_second_provider() {
        let pool = init_test_db().await.expect("init db");
        let failing = Arc::new(MockProvider::failing("anthropic", "claude-sonnet", 500));
        let working = Arc::new(
            MockProvider::new("openai", "gpt-4o-mini").with_default_response("from openai"),
        );

        let router = test_router(vec![failing.clone(), working.clone()], pool.clone());
        let response = router
            .generate(&LlmRequest::new("hello", "extract"))
            .await
            .expect("generate");

        assert_eq!(response.content, "from openai");
        assert_eq!(router.failure_count("anthropic"), 1);

        // One ledger row tagged with the working provider's model
        let rows = cost_ledger::recent(&pool, 10).await.expect("ledger");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model, "gpt-4o-mini");
        assert_eq!(rows[0].provider, "openai");
        assert!(!rows[0].cached);
    }

    #[tokio::test]
    async fn all_providers_failed_lists_errors() {
        let pool = init_test_db().await.expect("init db");
        let a = Arc::new(MockProvider::failing("anthropic", "m", 500));
        let b = Arc::new(MockProvider::failing("openai", "m", 503));

        let router = test_router(vec![a, b], pool);
        let err = router
            .generate(&LlmRequest::new("hello", "extract"))
            .await
            .unwrap_err();

        match err {
            RouterError::AllProvidersFailed { errors } => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].starts_with("anthropic:"));
                assert!(errors[1].starts_with("openai:"));
            }
            other => panic!("expected AllProvidersFailed, got: {other}"),
        }
    }

    #[tokio::test]
    async fn transient_error_retried_same_provider() {
        let pool = init_test_db().await.expect("init db");
        let flaky = Arc::new(MockProvider::new("openai", "m").with_script(vec![
            ScriptStep::ApiError(500),
            ScriptStep::Ok("recovered".to_string()),
        ]));

        let router = test_router(vec![flaky.clone()], pool);
        let response = router
            .generate(&LlmRequest::new("hello", "extract"))
            .await
            .expect("generate");

        assert_eq!(response.content, "recovered");
        assert_eq!(flaky.call_count(), 2);
        assert_eq!(router.failure_count("openai"), 0);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let pool = init_test_db().await.expect("init db");
        let auth_broken = Arc::new(MockProvider::failing("openai", "m", 401));

        let router = test_router(vec![auth_broken.clone()], pool);
        let err = router
            .generate(&LlmRequest::new("hello", "extract"))
            .await
            .unwrap_err();

        assert!(matches!(err, RouterError::AllProvidersFailed { .. }));
        assert_eq!(auth_broken.call_count(), 1);
        assert_eq!(router.failure_count("openai"), 1);
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_three_failures() {
        let pool = init_test_db().await.expect("init db");
        let failing = Arc::new(MockProvider::failing("anthropic", "m", 500));

        let router = test_router(vec![failing.clone()], pool);
        for _ in 0..3 {
            let _ = router.generate(&LlmRequest::new("hello", "extract")).await;
        }
        let calls_when_tripped = failing.call_count();

        // Within the cooldown the provider is never reached
        for _ in 0..5 {
            let err = router
                .generate(&LlmRequest::new("hello", "extract"))
                .await
                .unwrap_err();
            match err {
                RouterError::AllProvidersFailed { errors } => {
                    assert_eq!(errors, vec!["anthropic: in cooldown".to_string()]);
                }
                other => panic!("expected AllProvidersFailed, got: {other}"),
            }
        }
        assert_eq!(failing.call_count(), calls_when_tripped);
    }

    #[tokio::test]
    async fn timeout_cancels_retries_and_fails_over() {
        let pool = init_test_db().await.expect("init db");
        let slow = Arc::new(
            MockProvider::new("anthropic", "m").with_delay(Duration::from_secs(5)),
        );
        let fast =
            Arc::new(MockProvider::new("openai", "m").with_default_response("quick answer"));

        let router = ProviderRouter::new(vec![slow.clone(), fast], 2, 50, pool)
            .expect("router")
            .with_retry_window(Duration::from_millis(1), Duration::from_millis(5));

        let response = router
            .generate(&LlmRequest::new("hello", "extract"))
            .await
            .expect("generate");

        assert_eq!(response.content, "quick answer");
        // The slow provider was tried once; the timeout cancelled retries
        assert_eq!(slow.call_count(), 1);
        assert_eq!(router.failure_count("anthropic"), 1);
    }

    #[tokio::test]
    async fn empty_chain_is_an_error() {
        let pool = init_test_db().await.expect("init db");
        assert!(matches!(
            ProviderRouter::new(Vec::new(), 2, 1000, pool),
            Err(RouterError::NoProvidersConfigured)
        ));
    }

    #[tokio::test]
    async fn primary_identity_uses_first_provider_and_override() {
        let pool = init_test_db().await.expect("init db");
        let a = Arc::new(MockProvider::new("anthropic", "claude-sonnet"));
        let router = test_router(vec![a], pool);

        let mut request = LlmRequest::new("p", "extract");
        assert_eq!(
            router.primary_identity(&request),
            ("anthropic".to_string(), "claude-sonnet".to_string())
        );

        request.params.model = Some("claude-haiku".to_string());
        assert_eq!(
            router.primary_identity(&request),
            ("anthropic".to_string(), "claude-haiku".to_string())
        );
    }
}
