//! Artifacts and the typed predicates used to query them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{TextlensError, TextlensResult};
use crate::kind::ArtifactKind;
use crate::{ArtifactId, OwnerId, Timestamp};

// ============================================================================
// ARTIFACT
// ============================================================================

/// A persisted derived result.
///
/// This is also the cached projection: the Fast Cache stores a serialized copy
/// of exactly this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Artifact<K: ArtifactKind> {
    pub id: ArtifactId,
    pub owner_id: Option<OwnerId>,
    pub source_text: String,
    pub result: K::Output,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl<K: ArtifactKind> Artifact<K> {
    /// Whether `owner` may see and mutate this artifact.
    pub fn is_owned_by(&self, owner: OwnerId) -> bool {
        self.owner_id == Some(owner)
    }
}

/// Fields supplied to `create`; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArtifact<K: ArtifactKind> {
    pub owner_id: Option<OwnerId>,
    pub source_text: String,
    pub result: K::Output,
}

/// Field changes applied by `update`. `None` leaves a column untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPatch<K: ArtifactKind> {
    pub source_text: Option<String>,
    pub result: Option<K::Output>,
}

impl<K: ArtifactKind> ArtifactPatch<K> {
    /// Patch produced by re-running the Compute Function on revised text.
    pub fn recomputed(source_text: String, result: K::Output) -> Self {
        Self {
            source_text: Some(source_text),
            result: Some(result),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source_text.is_none() && self.result.is_none()
    }

    /// Apply the patch in place and bump `updated_at`.
    pub fn apply_to(&self, artifact: &mut Artifact<K>, now: Timestamp) {
        if let Some(source_text) = &self.source_text {
            artifact.source_text = source_text.clone();
        }
        if let Some(result) = &self.result {
            artifact.result = result.clone();
        }
        artifact.updated_at = now;
    }
}

// ============================================================================
// QUERY PREDICATES
// ============================================================================

/// Exact-match conjunction of field predicates.
///
/// An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactFilter {
    pub id: Option<ArtifactId>,
    pub owner_id: Option<OwnerId>,
    pub source_text: Option<String>,
}

impl ArtifactFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: ArtifactId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_natural_key(key: &NaturalKey) -> Self {
        Self {
            id: None,
            owner_id: Some(key.owner_id),
            source_text: Some(key.source_text.clone()),
        }
    }

    pub fn owned_by(mut self, owner_id: OwnerId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    pub fn with_source_text(mut self, source_text: impl Into<String>) -> Self {
        self.source_text = Some(source_text.into());
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.id.is_none() && self.owner_id.is_none() && self.source_text.is_none()
    }

    pub fn matches<K: ArtifactKind>(&self, artifact: &Artifact<K>) -> bool {
        self.id.map_or(true, |id| artifact.id == id)
            && self
                .owner_id
                .map_or(true, |owner| artifact.owner_id == Some(owner))
            && self
                .source_text
                .as_deref()
                .map_or(true, |text| artifact.source_text == text)
    }
}

/// Content key used to detect equivalent requests.
///
/// Scoped by owner: two users submitting identical text get independent rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NaturalKey {
    pub owner_id: OwnerId,
    pub source_text: String,
}

impl NaturalKey {
    pub fn new(owner_id: OwnerId, source_text: impl Into<String>) -> Self {
        Self {
            owner_id,
            source_text: source_text.into(),
        }
    }

    /// Fixed-width digest, suitable as an in-process coalescing key.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.owner_id.get().to_le_bytes());
        hasher.update([0u8]);
        hasher.update(self.source_text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

// ============================================================================
// REQUESTER
// ============================================================================

/// Identity resolved by the auth collaborator for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Requester {
    #[default]
    Anonymous,
    Owner(OwnerId),
}

impl Requester {
    pub fn owner(&self) -> Option<OwnerId> {
        match self {
            Requester::Anonymous => None,
            Requester::Owner(owner) => Some(*owner),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Requester::Owner(_))
    }

    /// The owner id, or `Unauthorized` for anonymous callers.
    pub fn require_owner(&self) -> TextlensResult<OwnerId> {
        self.owner().ok_or(TextlensError::Unauthorized)
    }
}
