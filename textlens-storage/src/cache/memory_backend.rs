//! Process-local cache backend.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheEntry, CacheError, CacheResult, CacheStats};

/// Hash map behind a lock. Used by tests and when no cache path is configured.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let found = self
            .entries
            .read()
            .map_err(|_| CacheError::LockPoisoned)?
            .get(key)
            .cloned();
        self.record(|stats| {
            if found.is_some() {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        });
        Ok(found)
    }

    async fn store(&self, key: &CacheKey, payload: Vec<u8>) -> CacheResult<Option<Vec<u8>>> {
        let size = payload.len() as u64;
        let previous = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned)?
            .insert(
                key.clone(),
                CacheEntry {
                    payload,
                    cached_at: Utc::now(),
                },
            )
            .map(|entry| entry.payload);
        self.record(|stats| {
            match &previous {
                Some(old) => {
                    stats.memory_bytes = stats.memory_bytes.saturating_sub(old.len() as u64)
                }
                None => stats.entry_count += 1,
            }
            stats.memory_bytes += size;
        });
        Ok(previous)
    }

    async fn evict(&self, key: &CacheKey) -> CacheResult<bool> {
        let removed = self
            .entries
            .write()
            .map_err(|_| CacheError::LockPoisoned)?
            .remove(key);
        if let Some(entry) = &removed {
            self.record(|stats| {
                stats.entry_count = stats.entry_count.saturating_sub(1);
                stats.memory_bytes = stats
                    .memory_bytes
                    .saturating_sub(entry.payload.len() as u64);
                stats.evictions += 1;
            });
        }
        Ok(removed.is_some())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.stats
            .read()
            .map(|stats| stats.clone())
            .map_err(|_| CacheError::LockPoisoned)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use textlens_core::{ArtifactId, Sentiment};

    fn key(id: i64) -> CacheKey {
        CacheKey::for_kind::<Sentiment>(ArtifactId::new(id))
    }

    #[tokio::test]
    async fn test_store_get_evict() {
        let backend = InMemoryCacheBackend::new();
        assert!(backend.get(&key(1)).await.unwrap().is_none());

        assert_eq!(backend.store(&key(1), b"one".to_vec()).await.unwrap(), None);
        let entry = backend.get(&key(1)).await.unwrap().unwrap();
        assert_eq!(entry.payload, b"one".to_vec());

        assert!(backend.evict(&key(1)).await.unwrap());
        assert!(!backend.evict(&key(1)).await.unwrap());
        assert!(backend.get(&key(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_returns_previous_payload() {
        let backend = InMemoryCacheBackend::new();
        backend.store(&key(2), b"old".to_vec()).await.unwrap();
        let previous = backend.store(&key(2), b"new".to_vec()).await.unwrap();
        assert_eq!(previous, Some(b"old".to_vec()));
    }

    #[tokio::test]
    async fn test_stats_track_usage() {
        let backend = InMemoryCacheBackend::new();
        backend.store(&key(1), b"abc".to_vec()).await.unwrap();
        backend.store(&key(1), b"abcd".to_vec()).await.unwrap();
        backend.get(&key(1)).await.unwrap();
        backend.get(&key(9)).await.unwrap();
        backend.evict(&key(1)).await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 0);
        assert_eq!(stats.memory_bytes, 0);
        assert_eq!(stats.evictions, 1);
    }
}
