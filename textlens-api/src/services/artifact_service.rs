//! Artifact lifecycle: lookup, idempotent create, update and delete.
//!
//! One [`ArtifactService`] exists per artifact kind. It owns no data itself;
//! the store, the cache and the compute function are injected.

use std::sync::Arc;

use textlens_compute::ComputeFunction;
use textlens_core::{
    Artifact, ArtifactFilter, ArtifactId, ArtifactKind, ArtifactPatch, NaturalKey, NewArtifact,
    OwnerId, Requester, TextlensError, TextlensResult,
};
use textlens_storage::{Access, ArtifactStore, CacheRead, ReadThroughCache};

use super::single_flight::SingleFlight;

/// A result computed for an anonymous caller. Never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EphemeralResult<K: ArtifactKind> {
    pub source_text: String,
    pub result: K::Output,
}

/// What `create_or_get` did.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome<K: ArtifactKind> {
    /// The owner already had a row for this text. Nothing was computed.
    Existing(Artifact<K>),
    /// A new row was computed and stored.
    Created(Artifact<K>),
    /// Anonymous caller: computed, not stored.
    Ephemeral(EphemeralResult<K>),
}

impl<K: ArtifactKind> CreateOutcome<K> {
    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }

    /// The stored row, if there is one.
    pub fn artifact(&self) -> Option<&Artifact<K>> {
        match self {
            CreateOutcome::Existing(artifact) | CreateOutcome::Created(artifact) => Some(artifact),
            CreateOutcome::Ephemeral(_) => None,
        }
    }
}

/// Service for one artifact kind.
pub struct ArtifactService<K: ArtifactKind> {
    store: Arc<dyn ArtifactStore<K>>,
    cache: ReadThroughCache,
    compute: Arc<dyn ComputeFunction<K>>,
    flights: SingleFlight,
}

impl<K: ArtifactKind> std::fmt::Debug for ArtifactService<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactService")
            .field("kind", &K::NAME)
            .field("cache", &self.cache)
            .field("model", &self.compute.model_id())
            .finish()
    }
}

impl<K: ArtifactKind> ArtifactService<K> {
    pub fn new(
        store: Arc<dyn ArtifactStore<K>>,
        cache: ReadThroughCache,
        compute: Arc<dyn ComputeFunction<K>>,
    ) -> Self {
        Self {
            store,
            cache,
            compute,
            flights: SingleFlight::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore<K>> {
        &self.store
    }

    pub fn cache(&self) -> &ReadThroughCache {
        &self.cache
    }

    /// Creates currently waiting on or holding a natural key.
    pub fn creates_in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Read-through lookup by id, restricted to the requester's own rows.
    pub async fn get_by_id(
        &self,
        requester: Requester,
        id: ArtifactId,
    ) -> TextlensResult<CacheRead<Artifact<K>>> {
        let owner = requester.require_owner()?;
        self.cache
            .lookup(id, Access::Owner(owner), self.store.as_ref())
            .await
    }

    /// Return the caller's existing row for `source_text`, or compute and
    /// store one.
    ///
    /// Anonymous callers always get a fresh, unstored computation.
    pub async fn create_or_get(
        &self,
        requester: Requester,
        source_text: String,
    ) -> TextlensResult<CreateOutcome<K>> {
        let Some(owner) = requester.owner() else {
            let result = self.compute.compute(&source_text).await?;
            tracing::debug!(kind = K::NAME, "Computed ephemeral result");
            return Ok(CreateOutcome::Ephemeral(EphemeralResult {
                source_text,
                result,
            }));
        };

        let key = NaturalKey::new(owner, source_text);
        let _flight = self.flights.acquire(key.digest()).await;

        if let Some(existing) = self.find_by_natural_key(&key).await? {
            tracing::debug!(kind = K::NAME, id = %existing.id, "Reusing existing result");
            return Ok(CreateOutcome::Existing(existing));
        }

        let result = self.compute.compute(&key.source_text).await?;
        let fields = NewArtifact {
            owner_id: Some(owner),
            source_text: key.source_text.clone(),
            result,
        };

        match self.store.create(fields).await {
            Ok(artifact) => {
                tracing::info!(kind = K::NAME, id = %artifact.id, owner = %owner, "Artifact created");
                Ok(CreateOutcome::Created(artifact))
            }
            Err(e) if e.is_unique_violation() => {
                // Another process inserted the same key first. Its row is the answer.
                match self.find_by_natural_key(&key).await? {
                    Some(existing) => {
                        tracing::debug!(
                            kind = K::NAME,
                            id = %existing.id,
                            "Create lost a race, returning the winning row"
                        );
                        Ok(CreateOutcome::Existing(existing))
                    }
                    None => Err(e.into()),
                }
            }
            Err(e) => {
                tracing::error!(kind = K::NAME, error = %e, "Failed to store artifact");
                Err(e.into())
            }
        }
    }

    /// Recompute an owned artifact from revised text.
    ///
    /// `NotFound` if the row is absent or not the requester's. `NotModified`
    /// if it disappeared between the check and the write.
    pub async fn update(
        &self,
        requester: Requester,
        id: ArtifactId,
        updated_text: String,
    ) -> TextlensResult<Artifact<K>> {
        let owner = requester.require_owner()?;
        self.require_owned(id, owner).await?;

        let result = self.compute.compute(&updated_text).await?;
        let filter = ArtifactFilter::by_id(id).owned_by(owner);
        let updated = self
            .store
            .update(&filter, ArtifactPatch::recomputed(updated_text, result))
            .await?;
        if updated == 0 {
            tracing::debug!(kind = K::NAME, id = %id, "Update matched no rows");
            return Err(TextlensError::NotModified { kind: K::NAME, id });
        }

        let artifact = self
            .store
            .get(&filter)
            .await?
            .ok_or(TextlensError::NotFound { kind: K::NAME })?;
        self.cache.after_update(&artifact).await;

        tracing::info!(kind = K::NAME, id = %id, owner = %owner, "Artifact updated");
        Ok(artifact)
    }

    /// Remove an owned artifact.
    pub async fn delete(&self, requester: Requester, id: ArtifactId) -> TextlensResult<()> {
        let owner = requester.require_owner()?;
        self.require_owned(id, owner).await?;

        let removed = self
            .store
            .delete(&ArtifactFilter::by_id(id).owned_by(owner))
            .await?;
        if removed == 0 {
            return Err(TextlensError::NotFound { kind: K::NAME });
        }
        self.cache.after_delete::<K>(id).await;

        tracing::info!(kind = K::NAME, id = %id, owner = %owner, "Artifact deleted");
        Ok(())
    }

    /// Remove every artifact `owner` holds and evict each from the cache.
    ///
    /// Used when the owner's account is deleted.
    pub async fn purge_owner(&self, owner: OwnerId) -> TextlensResult<u64> {
        let filter = ArtifactFilter::new().owned_by(owner);
        let doomed = self.store.filter(&filter).await?;
        let removed = self.store.delete(&filter).await?;
        for artifact in &doomed {
            self.cache.after_delete::<K>(artifact.id).await;
        }

        tracing::info!(kind = K::NAME, owner = %owner, removed, "Owner's artifacts purged");
        Ok(removed)
    }

    async fn find_by_natural_key(&self, key: &NaturalKey) -> TextlensResult<Option<Artifact<K>>> {
        Ok(self.store.get(&ArtifactFilter::by_natural_key(key)).await?)
    }

    /// Ownership check against the store, never the cache.
    async fn require_owned(&self, id: ArtifactId, owner: OwnerId) -> TextlensResult<Artifact<K>> {
        self.store
            .get(&ArtifactFilter::by_id(id))
            .await?
            .filter(|artifact| artifact.is_owned_by(owner))
            .ok_or(TextlensError::NotFound { kind: K::NAME })
    }
}
