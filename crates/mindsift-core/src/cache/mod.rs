//! Content-addressed cache of LLM responses.
//!
//! Read-through memoization in front of the provider router: the same
//! (provider, model, prompt, params) never pays for tokens twice. Cache
//! hits still append a zero-cost ledger row tagged `cached`, so the
//! ledger remains a complete call history. Concurrent callers for the
//! same key share one router call (single-flight).

mod fs;
mod kv;

pub use fs::FsCacheStore;
pub use kv::KvCacheStore;

use std::collections::HashMap;
use std::sync::Arc;

use blake2::{Blake2b512, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::error::{CacheError, RouterError};
use crate::llm::router::ProviderRouter;
use crate::llm::{LlmRequest, LlmResponse};
use crate::storage::{cost_ledger, DbPool};

/// A cached LLM response with its storage metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub provider: String,
    pub model: String,
    pub response: LlmResponse,
    pub created_at: DateTime<Utc>,
    pub hits: u32,
}

/// A durable cache backend. Entries are atomic-per-key; `get` bumps the
/// hit counter.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live (non-expired) entry and increment its hit counter.
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError>;

    /// Store an entry, replacing any existing one.
    async fn put(&self, key: &str, entry: &CachedResponse) -> Result<(), CacheError>;
}

/// Compute the content-addressed cache key.
///
/// Prompt normalisation strips trailing whitespace only; everything else
/// is bit-exact.
pub fn cache_key(
    provider: &str,
    model: &str,
    prompt: &str,
    system: Option<&str>,
    temperature: f32,
    max_tokens: u32,
) -> String {
    let mut hasher = Blake2b512::new();
    hasher.update(provider.as_bytes());
    hasher.update([0x1f]);
    hasher.update(model.as_bytes());
    hasher.update([0x1f]);
    hasher.update(prompt.trim_end().as_bytes());
    hasher.update([0x1f]);
    hasher.update(system.unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(temperature.to_le_bytes());
    hasher.update(max_tokens.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Read-through cache wrapping the provider router.
pub struct ResponseCache {
    store: Box<dyn CacheStore>,
    router: Arc<ProviderRouter>,
    pool: DbPool,
    inflight: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ResponseCache {
    /// Create a cache over an explicit backend.
    pub fn new(store: Box<dyn CacheStore>, router: Arc<ProviderRouter>, pool: DbPool) -> Self {
        Self {
            store,
            router,
            pool,
            inflight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Create a cache with the backend selected by config (`fs` or `kv`).
    pub fn from_config(
        config: &CacheConfig,
        router: Arc<ProviderRouter>,
        pool: DbPool,
    ) -> Result<Self, CacheError> {
        let ttl_secs = (config.ttl_secs > 0).then_some(config.ttl_secs);
        let store: Box<dyn CacheStore> = match config.backend.as_str() {
            "kv" => Box::new(KvCacheStore::new(pool.clone(), ttl_secs)),
            _ => Box::new(FsCacheStore::new(&config.dir, ttl_secs)?),
        };
        Ok(Self::new(store, router, pool))
    }

    /// Generate through the cache: hit short-circuits the router; miss
    /// calls it and stores the result. Callers racing on the same key
    /// block on one in-flight call and share its response.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, RouterError> {
        let (provider, model) = self.router.primary_identity(request);
        let key = cache_key(
            &provider,
            &model,
            &request.prompt,
            request.system.as_deref(),
            request.params.temperature,
            request.params.max_tokens,
        );

        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(key.clone()).or_default().clone()
        };
        let result = {
            let _guard = key_lock.lock().await;
            self.generate_locked(&key, &provider, request).await
        };

        // Drop the per-key lock entry once no other caller holds it
        {
            let mut inflight = self.inflight.lock().await;
            if Arc::strong_count(&key_lock) == 2 {
                inflight.remove(&key);
            }
        }

        result
    }

    async fn generate_locked(
        &self,
        key: &str,
        provider: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse, RouterError> {
        match self.store.get(key).await {
            Ok(Some(cached)) => {
                tracing::debug!(key = &key[..12], purpose = %request.purpose, "cache hit");
                self.record_hit(&cached, request).await;
                return Ok(cached.response);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "cache read failed, treating as miss");
            }
        }

        let response = self.router.generate(request).await?;

        let entry = CachedResponse {
            provider: provider.to_string(),
            model: response.model.clone(),
            response: response.clone(),
            created_at: Utc::now(),
            hits: 0,
        };
        if let Err(err) = self.store.put(key, &entry).await {
            tracing::warn!(error = %err, "cache write failed");
        }

        Ok(response)
    }

    async fn record_hit(&self, cached: &CachedResponse, request: &LlmRequest) {
        if let Err(err) = cost_ledger::append(
            &self.pool,
            &cached.provider,
            &cached.model,
            cached.response.usage.input_tokens,
            cached.response.usage.output_tokens,
            0.0,
            &request.purpose,
            true,
        )
        .await
        {
            tracing::warn!(error = %err, "failed to append cached-call ledger row");
        }
    }
}
