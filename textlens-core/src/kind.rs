//! Artifact kinds.
//!
//! Every protocol in the workspace is written once, generically over
//! [`ArtifactKind`]. A kind fixes the shape of the computed result and the
//! names it is stored and cached under.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A family of derived artifacts sharing one result type.
///
/// Implementors are zero-sized markers. The derive-friendly supertraits let
/// containers such as [`crate::Artifact`] derive their impls generically.
pub trait ArtifactKind: Debug + Clone + Copy + PartialEq + Eq + Send + Sync + 'static {
    /// The computed payload.
    type Output: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Human-readable name, used in errors, logs and route paths.
    const NAME: &'static str;

    /// Fast Cache key prefix.
    const CACHE_PREFIX: &'static str;

    /// Artifact Store table.
    const TABLE: &'static str;

    /// Field name the result is exposed under on the wire.
    const RESULT_FIELD: &'static str;

    /// Whether a result carries no payload at all.
    fn is_empty_output(output: &Self::Output) -> bool;
}

/// Per-sentence sentiment scores in [-1, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentiment {}

impl ArtifactKind for Sentiment {
    type Output = Vec<f64>;

    const NAME: &'static str = "sentiment";
    const CACHE_PREFIX: &'static str = "sentiment";
    const TABLE: &'static str = "sentiments";
    const RESULT_FIELD: &'static str = "sentiments";

    fn is_empty_output(output: &Self::Output) -> bool {
        output.is_empty()
    }
}

/// A condensed rendition of the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Summary {}

impl ArtifactKind for Summary {
    type Output = String;

    const NAME: &'static str = "summary";
    const CACHE_PREFIX: &'static str = "summary";
    const TABLE: &'static str = "summaries";
    const RESULT_FIELD: &'static str = "summarized_text";

    fn is_empty_output(output: &Self::Output) -> bool {
        output.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_use_distinct_cache_prefixes() {
        assert_ne!(Sentiment::CACHE_PREFIX, Summary::CACHE_PREFIX);
        assert_ne!(Sentiment::TABLE, Summary::TABLE);
    }

    #[test]
    fn test_empty_output_detection() {
        assert!(Sentiment::is_empty_output(&Vec::new()));
        assert!(!Sentiment::is_empty_output(&vec![0.5]));
        assert!(Summary::is_empty_output(&"   ".to_string()));
        assert!(!Summary::is_empty_output(&"Short.".to_string()));
    }
}
