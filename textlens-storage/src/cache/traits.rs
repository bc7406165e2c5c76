//! Cache backend trait and shared value types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::key::CacheKey;

/// Error type for cache backend operations.
///
/// None of these ever reach a client; the read-through layer logs them and
/// falls back to the Artifact Store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to open or create the backing environment.
    #[error("Failed to open cache environment: {0}")]
    EnvOpen(String),

    /// Transaction or backend call failed.
    #[error("Cache transaction error: {0}")]
    Transaction(String),

    /// Stored bytes could not be decoded.
    #[error("Cache deserialization error: {0}")]
    Deserialization(String),

    /// A value could not be encoded.
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// An internal lock was poisoned by a panicking writer.
    #[error("Cache lock poisoned")]
    LockPoisoned,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Raw bytes held under one key, with the time they were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub payload: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

/// Key-value store used as the Fast Cache.
///
/// Values are opaque bytes. Entries never expire on their own; they live
/// until overwritten or evicted.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Bytes stored under `key`, if any.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    /// Store `payload` under `key`, returning the bytes it replaced.
    async fn store(&self, key: &CacheKey, payload: Vec<u8>) -> CacheResult<Option<Vec<u8>>>;

    /// Remove `key`. Returns whether an entry was present.
    async fn evict(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Usage counters.
    async fn stats(&self) -> CacheResult<CacheStats>;

    /// Short backend name for logs and readiness output.
    fn name(&self) -> &'static str;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate payload bytes held.
    pub memory_bytes: u64,
    /// Number of explicit evictions.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
