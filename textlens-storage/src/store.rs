//! The Artifact Store contract.

use async_trait::async_trait;
use textlens_core::{
    Artifact, ArtifactFilter, ArtifactKind, ArtifactPatch, NewArtifact, StorageResult,
};

/// Durable, authoritative storage for one artifact kind.
///
/// Every mutating operation is atomic: it either commits in full or rolls
/// back and returns an error. Implementations must reject a second row with
/// the same natural key (owner, source text) with
/// [`textlens_core::StorageError::UniqueViolation`].
#[async_trait]
pub trait ArtifactStore<K: ArtifactKind>: Send + Sync {
    /// At most one row matching `filter`. The lowest id wins when several do.
    async fn get(&self, filter: &ArtifactFilter) -> StorageResult<Option<Artifact<K>>>;

    /// Every row matching `filter`, ordered by id.
    async fn filter(&self, filter: &ArtifactFilter) -> StorageResult<Vec<Artifact<K>>>;

    /// Insert a row. The store assigns the id and both timestamps.
    async fn create(&self, fields: NewArtifact<K>) -> StorageResult<Artifact<K>>;

    /// Apply `patch` to every matching row and return how many were changed.
    async fn update(&self, filter: &ArtifactFilter, patch: ArtifactPatch<K>) -> StorageResult<u64>;

    /// Remove every matching row and return how many were removed.
    async fn delete(&self, filter: &ArtifactFilter) -> StorageResult<u64>;

    /// Verify the store can serve requests.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
