//! LMDB-backed cache.
//!
//! Uses the heed crate to keep cached artifacts in a memory-mapped file that
//! survives process restarts and can be shared by several workers on one
//! host.
//!
//! LMDB transactions block the calling thread (a write transaction waits on
//! the environment's writer lock), so every operation runs on the blocking
//! pool.
//!
//! # Value Layout
//!
//! `[cached_at millis: 8 bytes LE][payload]`

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheEntry, CacheError, CacheResult, CacheStats};

const TIMESTAMP_LEN: usize = 8;
const BYTES_PER_MB: usize = 1024 * 1024;

fn txn_error(e: heed::Error) -> CacheError {
    CacheError::Transaction(e.to_string())
}

fn encode_value(cached_at: DateTime<Utc>, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(TIMESTAMP_LEN + payload.len());
    bytes.extend_from_slice(&cached_at.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

fn decode_value(bytes: &[u8]) -> CacheResult<CacheEntry> {
    if bytes.len() < TIMESTAMP_LEN {
        return Err(CacheError::Deserialization(format!(
            "entry of {} bytes is shorter than its header",
            bytes.len()
        )));
    }
    let (header, payload) = bytes.split_at(TIMESTAMP_LEN);
    let millis: [u8; TIMESTAMP_LEN] = header
        .try_into()
        .map_err(|_| CacheError::Deserialization("Invalid timestamp".into()))?;
    let cached_at =
        DateTime::from_timestamp_millis(i64::from_le_bytes(millis)).unwrap_or_else(Utc::now);
    Ok(CacheEntry {
        payload: payload.to_vec(),
        cached_at,
    })
}

/// LMDB map size for `max_size_mb`, or an error when it does not fit.
fn map_size(max_size_mb: usize) -> CacheResult<usize> {
    max_size_mb
        .checked_mul(BYTES_PER_MB)
        .filter(|bytes| *bytes > 0)
        .ok_or_else(|| {
            CacheError::EnvOpen(format!(
                "map size of {} MiB is out of range",
                max_size_mb
            ))
        })
}

/// Handles a blocking task needs. `Env` is reference counted and
/// `Database` is a plain handle, so cloning is cheap.
#[derive(Clone)]
struct LmdbHandles {
    env: Env,
    db: Database<Bytes, Bytes>,
    counters: Arc<RwLock<CacheStats>>,
}

impl LmdbHandles {
    fn record(&self, update: impl FnOnce(&mut CacheStats)) {
        if let Ok(mut counters) = self.counters.write() {
            update(&mut counters);
        }
    }

    fn get(&self, encoded_key: &[u8]) -> CacheResult<Option<CacheEntry>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        match self.db.get(&rtxn, encoded_key) {
            Ok(Some(bytes)) => {
                self.record(|c| c.hits += 1);
                decode_value(bytes).map(Some)
            }
            Ok(None) => {
                self.record(|c| c.misses += 1);
                Ok(None)
            }
            Err(e) => {
                self.record(|c| c.misses += 1);
                Err(txn_error(e))
            }
        }
    }

    fn put(&self, encoded_key: &[u8], value: &[u8]) -> CacheResult<Option<Vec<u8>>> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let previous = match self.db.get(&wtxn, encoded_key).map_err(txn_error)? {
            Some(bytes) => decode_value(bytes).ok().map(|entry| entry.payload),
            None => None,
        };
        self.db.put(&mut wtxn, encoded_key, value).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(previous)
    }

    fn delete(&self, encoded_key: &[u8]) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let removed = self.db.delete(&mut wtxn, encoded_key).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)?;

        if removed {
            self.record(|c| c.evictions += 1);
        }
        Ok(removed)
    }

    fn stats(&self) -> CacheResult<CacheStats> {
        let mut stats = self
            .counters
            .read()
            .map(|c| c.clone())
            .map_err(|_| CacheError::LockPoisoned)?;

        let rtxn = self.env.read_txn().map_err(txn_error)?;
        stats.entry_count = self.db.len(&rtxn).map_err(txn_error)?;
        let mut bytes = 0u64;
        for item in self.db.iter(&rtxn).map_err(txn_error)? {
            let (_, value) = item.map_err(txn_error)?;
            bytes += value.len().saturating_sub(TIMESTAMP_LEN) as u64;
        }
        stats.memory_bytes = bytes;
        Ok(stats)
    }
}

/// LMDB-backed Fast Cache.
///
/// # Example
///
/// ```ignore
/// let backend = LmdbCacheBackend::new("/var/cache/textlens", 256)?;
/// backend.store(&CacheKey::for_kind::<Summary>(id), bytes).await?;
/// ```
pub struct LmdbCacheBackend {
    handles: LmdbHandles,
}

impl std::fmt::Debug for LmdbCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbCacheBackend")
            .field("path", &self.handles.env.path())
            .finish()
    }
}

impl LmdbCacheBackend {
    /// Open (or create) a cache environment in `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the map size overflows, the directory cannot be
    /// created or the LMDB environment cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> CacheResult<Self> {
        let map_size = map_size(max_size_mb)?;
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| CacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| CacheError::EnvOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        Ok(Self {
            handles: LmdbHandles {
                env,
                db,
                counters: Arc::new(RwLock::new(CacheStats::default())),
            },
        })
    }

    /// Run `op` on the blocking pool.
    async fn blocking<T, F>(&self, op: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&LmdbHandles) -> CacheResult<T> + Send + 'static,
    {
        let handles = self.handles.clone();
        tokio::task::spawn_blocking(move || op(&handles))
            .await
            .map_err(|e| CacheError::Transaction(format!("LMDB task failed: {}", e)))?
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let encoded_key = key.encode();
        self.blocking(move |lmdb| lmdb.get(&encoded_key)).await
    }

    async fn store(&self, key: &CacheKey, payload: Vec<u8>) -> CacheResult<Option<Vec<u8>>> {
        let encoded_key = key.encode();
        let value = encode_value(Utc::now(), &payload);
        self.blocking(move |lmdb| lmdb.put(&encoded_key, &value)).await
    }

    async fn evict(&self, key: &CacheKey) -> CacheResult<bool> {
        let encoded_key = key.encode();
        self.blocking(move |lmdb| lmdb.delete(&encoded_key)).await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.blocking(|lmdb| lmdb.stats()).await
    }

    fn name(&self) -> &'static str {
        "lmdb"
    }
}
