//! Read-through lookup over the Fast Cache and the Artifact Store.
//!
//! The cache is best-effort in both directions. A failing or corrupt cache
//! never fails a request: reads fall through to the store and writes are
//! logged and dropped. Ownership is re-checked on every cache hit, since a
//! cached entry carries no access control of its own.
//!
//! Backfills are guarded by [`WatermarkTable`]: a row read before a
//! concurrent update or delete is never written back over that mutation.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use textlens_core::{
    Artifact, ArtifactFilter, ArtifactId, ArtifactKind, ConfigError, OwnerId, TextlensError,
    TextlensResult,
};

use super::key::CacheKey;
use super::traits::{CacheBackend, CacheResult, CacheStats};
use super::watermark::{Watermark, WatermarkTable};
use crate::store::ArtifactStore;

/// What happens to a cached entry after its row changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheWritePolicy {
    /// Write the new row through after an update and evict after a delete.
    #[default]
    Refresh,
    /// Leave cached entries untouched. Reads may return the pre-update row
    /// until the entry is replaced by some other path.
    Lazy,
}

impl FromStr for CacheWritePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refresh" => Ok(Self::Refresh),
            "lazy" => Ok(Self::Lazy),
            other => Err(ConfigError::InvalidValue {
                field: "TEXTLENS_CACHE_WRITE_POLICY".to_string(),
                value: other.to_string(),
                reason: "expected refresh or lazy".to_string(),
            }),
        }
    }
}

/// Configuration for the read-through cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Post-mutation behaviour.
    pub write_policy: CacheWritePolicy,
    /// Evict entries that fail to decode instead of leaving them in place.
    pub evict_undecodable: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            write_policy: CacheWritePolicy::Refresh,
            evict_undecodable: true,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_policy(mut self, policy: CacheWritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    pub fn with_evict_undecodable(mut self, enabled: bool) -> Self {
        self.evict_undecodable = enabled;
        self
    }
}

/// Who a lookup is performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Only rows owned by this owner are visible.
    Owner(OwnerId),
    /// Every row is visible. Internal callers only.
    Unrestricted,
}

impl Access {
    pub fn permits<K: ArtifactKind>(&self, artifact: &Artifact<K>) -> bool {
        match self {
            Access::Owner(owner) => artifact.is_owned_by(*owner),
            Access::Unrestricted => true,
        }
    }

    fn scope(&self, filter: ArtifactFilter) -> ArtifactFilter {
        match self {
            Access::Owner(owner) => filter.owned_by(*owner),
            Access::Unrestricted => filter,
        }
    }
}

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Cache,
    Store,
}

/// Result of a lookup, tagged with where it came from.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    source: ReadSource,
    /// When the cached copy was written. `None` for store reads.
    cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheRead<T> {
    pub fn from_cache(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            source: ReadSource::Cache,
            cached_at: Some(cached_at),
        }
    }

    pub fn from_store(value: T) -> Self {
        Self {
            value,
            source: ReadSource::Store,
            cached_at: None,
        }
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    pub fn was_cache_hit(&self) -> bool {
        self.source == ReadSource::Cache
    }

    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        self.cached_at
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Read-through cache shared by every artifact kind.
///
/// Typed values are stored as JSON of the whole [`Artifact`], owner
/// included, so a hit can be access-checked without touching the store.
#[derive(Clone)]
pub struct ReadThroughCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    watermarks: Arc<WatermarkTable>,
}

impl std::fmt::Debug for ReadThroughCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl ReadThroughCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            backend,
            config,
            watermarks: Arc::new(WatermarkTable::default()),
        }
    }

    pub fn with_defaults(backend: Arc<dyn CacheBackend>) -> Self {
        Self::new(backend, CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        self.backend.stats().await
    }

    /// Fetch an artifact by id, cache first.
    ///
    /// On a miss the store is queried with the access scope applied and the
    /// row is backfilled into the cache. A row that is absent and a row owned
    /// by someone else both yield `NotFound`.
    pub async fn lookup<K, S>(
        &self,
        id: ArtifactId,
        access: Access,
        store: &S,
    ) -> TextlensResult<CacheRead<Artifact<K>>>
    where
        K: ArtifactKind,
        S: ArtifactStore<K> + ?Sized,
    {
        if let Some((artifact, cached_at)) = self.cached::<K>(id).await {
            if access.permits(&artifact) {
                tracing::debug!(kind = K::NAME, id = %id, "Cache hit");
                return Ok(CacheRead::from_cache(artifact, cached_at));
            }
            tracing::debug!(kind = K::NAME, id = %id, "Cached entry not visible to requester");
        }

        let mark = self.watermarks.current(&CacheKey::for_kind::<K>(id));
        let artifact = store
            .get(&access.scope(ArtifactFilter::by_id(id)))
            .await?
            .ok_or(TextlensError::NotFound { kind: K::NAME })?;

        self.backfill(&artifact, mark).await;
        Ok(CacheRead::from_store(artifact))
    }

    /// Watermark of an artifact's key, to be taken before reading the store.
    pub fn watermark<K: ArtifactKind>(&self, id: ArtifactId) -> Watermark {
        self.watermarks.current(&CacheKey::for_kind::<K>(id))
    }

    /// Cache a row read from the store, unless its key was mutated after
    /// `mark` was taken.
    ///
    /// A mutation landing while the write is in flight is caught by the
    /// second check, and the entry just written is evicted again.
    pub async fn backfill<K: ArtifactKind>(&self, artifact: &Artifact<K>, mark: Watermark) -> bool {
        if self.watermarks.changed_since(mark) {
            tracing::debug!(kind = K::NAME, id = %artifact.id, "Row changed during read, skipping backfill");
            return false;
        }
        self.put(artifact).await;
        if self.watermarks.changed_since(mark) {
            tracing::debug!(kind = K::NAME, id = %artifact.id, "Row changed during backfill, evicting");
            self.evict::<K>(artifact.id).await;
            return false;
        }
        true
    }

    /// The cached copy of an artifact, if one exists and decodes.
    pub async fn cached<K: ArtifactKind>(
        &self,
        id: ArtifactId,
    ) -> Option<(Artifact<K>, DateTime<Utc>)> {
        let key = CacheKey::for_kind::<K>(id);
        let entry = match self.backend.get(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, using store");
                return None;
            }
        };

        match serde_json::from_slice::<Artifact<K>>(&entry.payload) {
            Ok(artifact) if artifact.id == id => Some((artifact, entry.cached_at)),
            Ok(artifact) => {
                tracing::warn!(key = %key, found = %artifact.id, "Cached entry has the wrong id");
                self.discard(&key).await;
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cached entry failed to decode");
                self.discard(&key).await;
                None
            }
        }
    }

    /// Write an artifact into the cache, ignoring failures.
    ///
    /// Returns whether an entry was replaced.
    pub async fn put<K: ArtifactKind>(&self, artifact: &Artifact<K>) -> bool {
        let key = CacheKey::for_kind::<K>(artifact.id);
        let payload = match serde_json::to_vec(artifact) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode artifact for cache");
                return false;
            }
        };
        match self.backend.store(&key, payload).await {
            Ok(previous) => previous.is_some(),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache write failed");
                false
            }
        }
    }

    /// Remove an artifact from the cache, ignoring failures.
    pub async fn evict<K: ArtifactKind>(&self, id: ArtifactId) -> bool {
        let key = CacheKey::for_kind::<K>(id);
        match self.backend.evict(&key).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache eviction failed");
                false
            }
        }
    }

    /// Bring the cache in line with a freshly updated row, per policy.
    ///
    /// The watermark advances under either policy so in-flight backfills of
    /// the old row are dropped.
    pub async fn after_update<K: ArtifactKind>(&self, artifact: &Artifact<K>) {
        self.watermarks.advance(&CacheKey::for_kind::<K>(artifact.id));
        if self.config.write_policy == CacheWritePolicy::Refresh {
            self.put(artifact).await;
        }
    }

    /// Bring the cache in line with a deleted row, per policy.
    pub async fn after_delete<K: ArtifactKind>(&self, id: ArtifactId) {
        self.watermarks.advance(&CacheKey::for_kind::<K>(id));
        if self.config.write_policy == CacheWritePolicy::Refresh {
            self.evict::<K>(id).await;
        }
    }

    async fn discard(&self, key: &CacheKey) {
        if !self.config.evict_undecodable {
            return;
        }
        if let Err(e) = self.backend.evict(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to evict bad cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory_backend::InMemoryCacheBackend;
    use crate::cache::traits::{CacheEntry, CacheError};
    use crate::memory::MemoryArtifactStore;
    use async_trait::async_trait;
    use textlens_core::{NewArtifact, Sentiment, StorageError, StorageResult, Summary};

    /// Backend whose every call fails.
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
            Err(CacheError::Transaction("down".to_string()))
        }

        async fn store(&self, _key: &CacheKey, _payload: Vec<u8>) -> CacheResult<Option<Vec<u8>>> {
            Err(CacheError::Transaction("down".to_string()))
        }

        async fn evict(&self, _key: &CacheKey) -> CacheResult<bool> {
            Err(CacheError::Transaction("down".to_string()))
        }

        async fn stats(&self) -> CacheResult<CacheStats> {
            Err(CacheError::Transaction("down".to_string()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    /// Store whose reads always fail.
    struct FailingStore;

    #[async_trait]
    impl ArtifactStore<Sentiment> for FailingStore {
        async fn get(&self, _filter: &ArtifactFilter) -> StorageResult<Option<Artifact<Sentiment>>> {
            Err(StorageError::Backend {
                reason: "unreachable".to_string(),
            })
        }

        async fn filter(&self, _filter: &ArtifactFilter) -> StorageResult<Vec<Artifact<Sentiment>>> {
            Ok(Vec::new())
        }

        async fn create(&self, _fields: NewArtifact<Sentiment>) -> StorageResult<Artifact<Sentiment>> {
            Err(StorageError::Backend {
                reason: "unreachable".to_string(),
            })
        }

        async fn update(
            &self,
            _filter: &ArtifactFilter,
            _patch: textlens_core::ArtifactPatch<Sentiment>,
        ) -> StorageResult<u64> {
            Ok(0)
        }

        async fn delete(&self, _filter: &ArtifactFilter) -> StorageResult<u64> {
            Ok(0)
        }
    }

    async fn seeded(owner: i64, text: &str) -> (MemoryArtifactStore<Sentiment>, Artifact<Sentiment>) {
        let store = MemoryArtifactStore::<Sentiment>::new();
        let artifact = store
            .create(NewArtifact {
                owner_id: Some(OwnerId::new(owner)),
                source_text: text.to_string(),
                result: vec![0.75],
            })
            .await
            .unwrap();
        (store, artifact)
    }

    fn memory_cache() -> (Arc<InMemoryCacheBackend>, ReadThroughCache) {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = ReadThroughCache::with_defaults(backend.clone());
        (backend, cache)
    }

    #[tokio::test]
    async fn test_miss_reads_store_then_backfills() {
        let (store, artifact) = seeded(1, "I love this.").await;
        let (_backend, cache) = memory_cache();
        let access = Access::Owner(OwnerId::new(1));

        let first = cache
            .lookup::<Sentiment, _>(artifact.id, access, &store)
            .await
            .unwrap();
        assert!(!first.was_cache_hit());
        assert_eq!(first.value(), &artifact);

        let second = cache
            .lookup::<Sentiment, _>(artifact.id, access, &store)
            .await
            .unwrap();
        assert!(second.was_cache_hit());
        assert!(second.cached_at().is_some());
        assert_eq!(second.into_value(), artifact);
    }

    #[tokio::test]
    async fn test_hit_for_other_owner_is_not_found() {
        let (store, artifact) = seeded(1, "private").await;
        let (_backend, cache) = memory_cache();
        cache.put(&artifact).await;

        let err = cache
            .lookup::<Sentiment, _>(artifact.id, Access::Owner(OwnerId::new(2)), &store)
            .await
            .unwrap_err();
        assert_eq!(err, TextlensError::NotFound { kind: "sentiment" });
    }

    #[tokio::test]
    async fn test_absent_row_is_not_found_and_not_cached() {
        let store = MemoryArtifactStore::<Sentiment>::new();
        let (backend, cache) = memory_cache();
        let err = cache
            .lookup::<Sentiment, _>(ArtifactId::new(404), Access::Unrestricted, &store)
            .await
            .unwrap_err();
        assert!(matches!(err, TextlensError::NotFound { .. }));
        assert_eq!(backend.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_store() {
        let (store, artifact) = seeded(3, "text").await;
        let cache = ReadThroughCache::with_defaults(Arc::new(BrokenBackend));
        let read = cache
            .lookup::<Sentiment, _>(artifact.id, Access::Owner(OwnerId::new(3)), &store)
            .await
            .unwrap();
        assert_eq!(read.source(), ReadSource::Store);
        assert!(!cache.put(&artifact).await);
        assert!(!cache.evict::<Sentiment>(artifact.id).await);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_persistence() {
        let (_backend, cache) = memory_cache();
        let err = cache
            .lookup::<Sentiment, _>(ArtifactId::new(1), Access::Unrestricted, &FailingStore)
            .await
            .unwrap_err();
        assert!(matches!(err, TextlensError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_evicted_and_read_through() {
        let (store, artifact) = seeded(1, "text").await;
        let (backend, cache) = memory_cache();
        let key = CacheKey::for_kind::<Sentiment>(artifact.id);
        backend.store(&key, b"not json".to_vec()).await.unwrap();

        let read = cache
            .lookup::<Sentiment, _>(artifact.id, Access::Owner(OwnerId::new(1)), &store)
            .await
            .unwrap();
        assert!(!read.was_cache_hit());

        let repaired = backend.get(&key).await.unwrap().unwrap();
        let decoded: Artifact<Sentiment> = serde_json::from_slice(&repaired.payload).unwrap();
        assert_eq!(decoded, artifact);
    }

    #[tokio::test]
    async fn test_entries_of_other_kinds_are_ignored() {
        let (_store, artifact) = seeded(1, "text").await;
        let (_backend, cache) = memory_cache();
        cache.put(&artifact).await;
        assert!(cache.cached::<Summary>(artifact.id).await.is_none());
        assert!(cache.cached::<Sentiment>(artifact.id).await.is_some());
    }

    #[tokio::test]
    async fn test_refresh_policy_writes_through_and_evicts() {
        let (_store, mut artifact) = seeded(1, "text").await;
        let (_backend, cache) = memory_cache();
        cache.put(&artifact).await;

        artifact.result = vec![-1.0];
        cache.after_update(&artifact).await;
        let (cached, _) = cache.cached::<Sentiment>(artifact.id).await.unwrap();
        assert_eq!(cached.result, vec![-1.0]);

        cache.after_delete::<Sentiment>(artifact.id).await;
        assert!(cache.cached::<Sentiment>(artifact.id).await.is_none());
    }

    #[tokio::test]
    async fn test_lazy_policy_leaves_entries_alone() {
        let (_store, mut artifact) = seeded(1, "text").await;
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = ReadThroughCache::new(
            backend,
            CacheConfig::new().with_write_policy(CacheWritePolicy::Lazy),
        );
        cache.put(&artifact).await;

        let original = artifact.result.clone();
        artifact.result = vec![-1.0];
        cache.after_update(&artifact).await;
        let (cached, _) = cache.cached::<Sentiment>(artifact.id).await.unwrap();
        assert_eq!(cached.result, original);

        cache.after_delete::<Sentiment>(artifact.id).await;
        assert!(cache.cached::<Sentiment>(artifact.id).await.is_some());
    }

    #[tokio::test]
    async fn test_backfill_after_delete_is_dropped() {
        let (_store, artifact) = seeded(1, "text").await;
        let (backend, cache) = memory_cache();

        let mark = cache.watermark::<Sentiment>(artifact.id);
        cache.after_delete::<Sentiment>(artifact.id).await;

        assert!(!cache.backfill(&artifact, mark).await);
        assert_eq!(backend.stats().await.unwrap().entry_count, 0);
    }

    #[tokio::test]
    async fn test_backfill_does_not_overwrite_refreshed_row() {
        let (_store, artifact) = seeded(1, "before").await;
        let (_backend, cache) = memory_cache();

        let mark = cache.watermark::<Sentiment>(artifact.id);
        let mut updated = artifact.clone();
        updated.source_text = "after".to_string();
        cache.after_update(&updated).await;

        assert!(!cache.backfill(&artifact, mark).await);
        let (cached, _) = cache.cached::<Sentiment>(artifact.id).await.unwrap();
        assert_eq!(cached.source_text, "after");
    }

    #[tokio::test]
    async fn test_clones_share_watermarks() {
        let (_store, artifact) = seeded(1, "text").await;
        let (_backend, cache) = memory_cache();
        let writer = cache.clone();

        let mark = cache.watermark::<Sentiment>(artifact.id);
        writer.after_delete::<Sentiment>(artifact.id).await;
        assert!(!cache.backfill(&artifact, mark).await);
    }

    #[test]
    fn test_write_policy_parsing() {
        assert_eq!("refresh".parse(), Ok(CacheWritePolicy::Refresh));
        assert_eq!(" LAZY ".parse(), Ok(CacheWritePolicy::Lazy));
        assert!("eager".parse::<CacheWritePolicy>().is_err());
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new()
            .with_write_policy(CacheWritePolicy::Lazy)
            .with_evict_undecodable(false);
        assert_eq!(config.write_policy, CacheWritePolicy::Lazy);
        assert!(!config.evict_undecodable);
    }
}
