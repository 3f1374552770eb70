//! Key-value cache backend on the `cache_entries` table.

use std::time::Duration;

use chrono::Utc;

use super::{CacheStore, CachedResponse};
use crate::error::CacheError;
use crate::storage::{cache_entries, DbPool};

/// Cache entries stored in SQLite alongside the rest of the engine state.
pub struct KvCacheStore {
    pool: DbPool,
    ttl: Option<Duration>,
}

impl KvCacheStore {
    /// `ttl_secs` of `None` means entries never expire.
    pub fn new(pool: DbPool, ttl_secs: Option<u64>) -> Self {
        Self {
            pool,
            ttl: ttl_secs.map(Duration::from_secs),
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for KvCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let Some(body) = cache_entries::get_and_touch(&self.pool, key).await? else {
            return Ok(None);
        };
        let entry: CachedResponse = serde_json::from_str(&body)?;
        Ok(Some(entry))
    }

    async fn put(&self, key: &str, entry: &CachedResponse) -> Result<(), CacheError> {
        let expires_at = self.ttl.map(|ttl| {
            (Utc::now() + chrono::Duration::seconds(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)))
                .to_rfc3339()
        });
        cache_entries::put(
            &self.pool,
            key,
            &entry.provider,
            &entry.model,
            &serde_json::to_string(entry)?,
            expires_at.as_deref(),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, TokenUsage};
    use crate::storage::init_test_db;

    fn sample_entry() -> CachedResponse {
        CachedResponse {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            response: LlmResponse {
                content: "kv hello".to_string(),
                usage: TokenUsage::default(),
                model: "gpt-4o-mini".to_string(),
            },
            created_at: Utc::now(),
            hits: 0,
        }
    }

    #[tokio::test]
    async fn round_trip_through_table() {
        let pool = init_test_db().await.expect("init db");
        let store = KvCacheStore::new(pool.clone(), None);

        assert!(store.get("key1").await.expect("get").is_none());
        store.put("key1", &sample_entry()).await.expect("put");

        let entry = store.get("key1").await.expect("get").expect("entry");
        assert_eq!(entry.response.content, "kv hello");

        assert_eq!(cache_entries::hits(&pool, "key1").await.expect("hits"), 1);
    }

    #[tokio::test]
    async fn ttl_flows_into_expiry() {
        let pool = init_test_db().await.expect("init db");
        let store = KvCacheStore::new(pool.clone(), Some(0));

        store.put("key1", &sample_entry()).await.expect("put");
        // Zero TTL expires immediately
        assert!(store.get("key1").await.expect("get").is_none());
    }
}
