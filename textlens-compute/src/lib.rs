//! TEXTLENS Compute - text to derived results
//!
//! The Compute Function is treated as an expensive black box by every caller.
//! This crate defines its interface and ships the default implementations:
//! a lexicon-driven sentiment scorer and an extractive summarizer, both built
//! on the same sentence segmentation.

use async_trait::async_trait;
use textlens_core::{ArtifactKind, ComputeError};

pub mod segment;
pub mod sentiment;
pub mod smoothing;
pub mod summary;

pub use segment::{normalize_whitespace, split_sentences, tokenize};
pub use sentiment::{ClassProbabilities, LexiconClassifier, SentenceClassifier, SentimentAnalyzer};
pub use smoothing::{ensemble_filter, moving_average};
pub use summary::ExtractiveSummarizer;

// ============================================================================
// COMPUTE FUNCTION TRAIT
// ============================================================================

/// Transformation from raw text to the result of one artifact kind.
///
/// Implementations must not block the async runtime; CPU-heavy work belongs
/// on `tokio::task::spawn_blocking`. Failures are reported, never retried.
#[async_trait]
pub trait ComputeFunction<K: ArtifactKind>: Send + Sync {
    /// Compute the result for `source_text`.
    async fn compute(&self, source_text: &str) -> Result<K::Output, ComputeError>;

    /// Identifier of the model behind this function, for logs.
    fn model_id(&self) -> &str;
}

/// Run blocking model work off the async executor.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, ComputeError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ComputeError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ComputeError::Aborted {
            reason: e.to_string(),
        })?
}
