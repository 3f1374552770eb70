//! Filesystem cache backend.
//!
//! One JSON file per key, directory-sharded by the first two hex chars
//! of the key. Writes go to a temp file in the same shard directory and
//! are renamed into place, so readers never observe a partial entry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;

use super::{CacheStore, CachedResponse};
use crate::error::CacheError;

/// Durable cache entries as sharded JSON files.
pub struct FsCacheStore {
    dir: PathBuf,
    ttl: Option<Duration>,
}

impl FsCacheStore {
    /// Create the store, creating the cache directory if needed.
    /// `ttl_secs` of `None` means entries never expire.
    pub fn new(dir: &str, ttl_secs: Option<u64>) -> Result<Self, CacheError> {
        let dir = expand_dir(dir);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            ttl: ttl_secs.map(Duration::from_secs),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let shard = &key[..2.min(key.len())];
        self.dir.join(shard).join(format!("{key}.json"))
    }
}

fn expand_dir(dir: &str) -> PathBuf {
    if let Some(rest) = dir.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(dir)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), std::io::Error> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
        uuid::Uuid::new_v4()
    ));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

#[async_trait::async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CachedResponse>, CacheError> {
        let path = self.entry_path(key);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut entry: CachedResponse = serde_json::from_slice(&contents)?;

        if let Some(ttl) = self.ttl {
            let age = Utc::now().signed_duration_since(entry.created_at);
            if age.num_seconds() >= i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX) {
                return Ok(None);
            }
        }

        entry.hits += 1;
        write_atomic(&path, &serde_json::to_vec(&entry)?)?;
        Ok(Some(entry))
    }

    async fn put(&self, key: &str, entry: &CachedResponse) -> Result<(), CacheError> {
        write_atomic(&self.entry_path(key), &serde_json::to_vec(entry)?)?;
        Ok(())
    }
}
