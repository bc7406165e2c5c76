//! Cache keys.

use std::borrow::Cow;
use std::fmt;

use textlens_core::{ArtifactId, ArtifactKind};

/// Key of one cached artifact: the kind's prefix followed by the decimal id.
///
/// Prefixes keep kinds apart so sentiment 7 and summary 7 never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    prefix: Cow<'static, str>,
    id: ArtifactId,
}

impl CacheKey {
    pub fn new(prefix: impl Into<Cow<'static, str>>, id: ArtifactId) -> Self {
        Self {
            prefix: prefix.into(),
            id,
        }
    }

    /// Key for an artifact of kind `K`.
    pub fn for_kind<K: ArtifactKind>(id: ArtifactId) -> Self {
        Self::new(K::CACHE_PREFIX, id)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    /// Byte form used by binary backends.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.id)
    }
}
