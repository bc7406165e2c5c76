//! TEXTLENS Core - Artifact Types
//!
//! Pure data structures shared by every other crate: identifiers, the two
//! artifact kinds, user accounts, typed query predicates, and the error
//! taxonomy.
//! This crate contains no I/O.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub mod artifact;
pub mod error;
pub mod kind;
pub mod user;

pub use artifact::{
    Artifact, ArtifactFilter, ArtifactPatch, NaturalKey, NewArtifact, Requester,
};
pub use error::{
    ComputeError, ConfigError, StorageError, StorageResult, TextlensError, TextlensResult,
};
pub use kind::{ArtifactKind, Sentiment, Summary};
pub use user::{NewUser, User, UserFilter, UserPatch, USERS_TABLE, USER_KIND};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Surrogate key assigned by the Artifact Store on creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(i64);

impl ArtifactId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArtifactId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Id of the [`User`] that owns an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(i64);

impl OwnerId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OwnerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

// ============================================================================
// CONTENT HASHING
// ============================================================================

/// Hex-encoded SHA-256 of a source text.
///
/// Stored next to `source_text` so the natural-key uniqueness constraint can
/// be enforced on a fixed-width column.
pub fn content_hash(source_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_text.as_bytes());
    hex::encode(hasher.finalize())
}
