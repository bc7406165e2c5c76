//! TEXTLENS Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Compute Function doubles that count invocations
//! - An instrumented Artifact Store with race injection
//! - Proptest generators and fixtures
//! - Assertions over `TextlensResult`

pub use textlens_core::{
    Artifact, ArtifactFilter, ArtifactId, ArtifactKind, ArtifactPatch, ComputeError, NewArtifact,
    OwnerId, Requester, Sentiment, StorageError, StorageResult, Summary, TextlensError,
    TextlensResult, Timestamp,
};
pub use textlens_storage::{ArtifactStore, MemoryArtifactStore};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use textlens_compute::ComputeFunction;

// ============================================================================
// COMPUTE DOUBLES
// ============================================================================

type ComputeFn<K> = dyn Fn(&str) -> Result<<K as ArtifactKind>::Output, ComputeError> + Send + Sync;

/// Compute Function double that records how often it ran.
///
/// An optional delay holds each call open so concurrent requests overlap.
pub struct CountingCompute<K: ArtifactKind> {
    func: Arc<ComputeFn<K>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl<K: ArtifactKind> CountingCompute<K> {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&str) -> Result<K::Output, ComputeError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// A double that always fails with `error`.
    pub fn failing(error: ComputeError) -> Self {
        Self::new(move |_| Err(error.clone()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CountingCompute<Sentiment> {
    /// A flat `0.5` for every period-separated sentence.
    pub fn sentiment() -> Self {
        Self::new(|text| {
            let sentences = text.split('.').filter(|s| !s.trim().is_empty()).count();
            if sentences == 0 {
                return Err(ComputeError::EmptyInput);
            }
            Ok(vec![0.5; sentences])
        })
    }
}

impl CountingCompute<Summary> {
    /// The first sentence of the text.
    pub fn summary() -> Self {
        Self::new(|text| {
            let first = text.split_inclusive('.').next().unwrap_or("").trim();
            if first.is_empty() {
                return Err(ComputeError::EmptyInput);
            }
            Ok(first.to_string())
        })
    }
}

#[async_trait]
impl<K: ArtifactKind> ComputeFunction<K> for CountingCompute<K> {
    async fn compute(&self, source_text: &str) -> Result<K::Output, ComputeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.func)(source_text)
    }

    fn model_id(&self) -> &str {
        "counting-mock"
    }
}

// ============================================================================
// INSTRUMENTED STORE
// ============================================================================

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct StoreCalls {
    pub gets: AtomicUsize,
    pub filters: AtomicUsize,
    pub creates: AtomicUsize,
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
}

impl StoreCalls {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

/// Memory store wrapper that counts calls and can simulate other writers.
///
/// Injected races fire once, on the next matching call:
/// - a conflicting create: another writer inserts the same natural key first
/// - a delete before update: the target row vanishes between check and write
/// - a held read: the next `get` returns only once the test releases it
pub struct InstrumentedStore<K: ArtifactKind> {
    inner: MemoryArtifactStore<K>,
    calls: StoreCalls,
    conflict_next_create: AtomicBool,
    delete_before_next_update: AtomicBool,
    fail_reads: AtomicBool,
    held_get: Mutex<Option<ReadGate>>,
}

struct ReadGate {
    reached: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// Test-side handle of a held read.
pub struct HeldRead {
    reached: oneshot::Receiver<()>,
    release: oneshot::Sender<()>,
}

impl HeldRead {
    /// Wait until the held `get` has read the store.
    pub async fn reached(&mut self) {
        let _ = (&mut self.reached).await;
    }

    /// Let the held `get` return what it read.
    pub fn release(self) {
        let _ = self.release.send(());
    }
}

impl<K: ArtifactKind> Default for InstrumentedStore<K> {
    fn default() -> Self {
        Self::new(MemoryArtifactStore::new())
    }
}

impl<K: ArtifactKind> InstrumentedStore<K> {
    pub fn new(inner: MemoryArtifactStore<K>) -> Self {
        Self {
            inner,
            calls: StoreCalls::default(),
            conflict_next_create: AtomicBool::new(false),
            delete_before_next_update: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            held_get: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &MemoryArtifactStore<K> {
        &self.inner
    }

    pub fn calls(&self) -> &StoreCalls {
        &self.calls
    }

    pub fn inject_conflicting_create(&self) {
        self.conflict_next_create.store(true, Ordering::SeqCst);
    }

    pub fn inject_delete_before_update(&self) {
        self.delete_before_next_update.store(true, Ordering::SeqCst);
    }

    /// Hold the next `get` after it has read the store, so other writers can
    /// run between that read and whatever the caller does with the row.
    pub fn hold_next_get(&self) -> HeldRead {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        let gate = ReadGate {
            reached: reached_tx,
            release: release_rx,
        };
        if let Ok(mut held) = self.held_get.lock() {
            *held = Some(gate);
        }
        HeldRead {
            reached: reached_rx,
            release: release_tx,
        }
    }

    fn take_gate(&self) -> Option<ReadGate> {
        self.held_get.lock().ok().and_then(|mut held| held.take())
    }

    /// Make every read fail with a backend error until switched off.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                reason: "injected read failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<K: ArtifactKind> ArtifactStore<K> for InstrumentedStore<K> {
    async fn get(&self, filter: &ArtifactFilter) -> StorageResult<Option<Artifact<K>>> {
        self.calls.gets.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        let row = self.inner.get(filter).await;
        if let Some(gate) = self.take_gate() {
            let _ = gate.reached.send(());
            let _ = gate.release.await;
        }
        row
    }

    async fn filter(&self, filter: &ArtifactFilter) -> StorageResult<Vec<Artifact<K>>> {
        self.calls.filters.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        self.inner.filter(filter).await
    }

    async fn create(&self, fields: NewArtifact<K>) -> StorageResult<Artifact<K>> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        if self.conflict_next_create.swap(false, Ordering::SeqCst) {
            self.inner.create(fields.clone()).await?;
        }
        self.inner.create(fields).await
    }

    async fn update(&self, filter: &ArtifactFilter, patch: ArtifactPatch<K>) -> StorageResult<u64> {
        self.calls.updates.fetch_add(1, Ordering::SeqCst);
        if self.delete_before_next_update.swap(false, Ordering::SeqCst) {
            self.inner.delete(filter).await?;
        }
        self.inner.update(filter, patch).await
    }

    async fn delete(&self, filter: &ArtifactFilter) -> StorageResult<u64> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(filter).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.check_reads()?;
        self.inner.health_check().await
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TEXTLENS types.

    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    pub fn arb_artifact_id() -> impl Strategy<Value = ArtifactId> {
        (1i64..1_000_000).prop_map(ArtifactId::new)
    }

    pub fn arb_owner_id() -> impl Strategy<Value = OwnerId> {
        (1i64..10_000).prop_map(OwnerId::new)
    }

    pub fn arb_requester() -> impl Strategy<Value = Requester> {
        prop_oneof![
            Just(Requester::Anonymous),
            arb_owner_id().prop_map(Requester::Owner),
        ]
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_600_000_000i64..1_900_000_000).prop_map(|secs| {
            Utc.timestamp_opt(secs, 0)
                .single()
                .unwrap_or_else(Utc::now)
        })
    }

    /// One to five capitalized sentences.
    pub fn arb_source_text() -> impl Strategy<Value = String> {
        proptest::collection::vec("[A-Z][a-z]{1,8}( [a-z]{1,8}){0,6}[.!?]", 1..5)
            .prop_map(|sentences| sentences.join(" "))
    }

    pub fn arb_scores() -> impl Strategy<Value = Vec<f64>> {
        proptest::collection::vec(-1.0f64..=1.0, 1..12)
    }

    pub fn arb_sentiment_artifact() -> impl Strategy<Value = Artifact<Sentiment>> {
        (
            arb_artifact_id(),
            proptest::option::of(arb_owner_id()),
            arb_source_text(),
            arb_scores(),
            arb_timestamp(),
        )
            .prop_map(|(id, owner_id, source_text, result, created_at)| Artifact {
                id,
                owner_id,
                source_text,
                result,
                created_at,
                updated_at: created_at,
            })
    }

    pub fn arb_summary_artifact() -> impl Strategy<Value = Artifact<Summary>> {
        (
            arb_artifact_id(),
            proptest::option::of(arb_owner_id()),
            arb_source_text(),
            arb_timestamp(),
        )
            .prop_map(|(id, owner_id, source_text, created_at)| {
                let result = source_text.split_inclusive('.').next().unwrap_or("").to_string();
                Artifact {
                    id,
                    owner_id,
                    source_text,
                    result,
                    created_at,
                    updated_at: created_at,
                }
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made values for common scenarios.

    use super::*;

    pub const LOVE_HATE: &str = "I love this. I hate that.";

    pub const ARTICLE: &str = "Caching keeps hot results close. \
        The weather was mild on Tuesday. \
        A cache avoids repeated model work. \
        Lunch was pasta.";

    pub fn owner(id: i64) -> OwnerId {
        OwnerId::new(id)
    }

    pub fn requester(id: i64) -> Requester {
        Requester::Owner(OwnerId::new(id))
    }

    pub fn new_sentiment(owner_id: Option<OwnerId>, text: &str) -> NewArtifact<Sentiment> {
        NewArtifact {
            owner_id,
            source_text: text.to_string(),
            result: vec![0.5],
        }
    }

    pub fn new_summary(owner_id: Option<OwnerId>, text: &str) -> NewArtifact<Summary> {
        NewArtifact {
            owner_id,
            source_text: text.to_string(),
            result: text.split_inclusive('.').next().unwrap_or("").to_string(),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over `TextlensResult`.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &TextlensResult<T>, kind: &str) {
        match result {
            Err(TextlensError::NotFound { kind: k }) => {
                assert_eq!(*k, kind, "Wrong kind in NotFound error");
            }
            other => panic!("Expected NotFound for {}, got: {:?}", kind, other),
        }
    }

    #[track_caller]
    pub fn assert_not_modified<T: std::fmt::Debug>(result: &TextlensResult<T>) {
        match result {
            Err(TextlensError::NotModified { .. }) => {}
            other => panic!("Expected NotModified, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unauthorized<T: std::fmt::Debug>(result: &TextlensResult<T>) {
        match result {
            Err(TextlensError::Unauthorized) => {}
            other => panic!("Expected Unauthorized, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_persistence_error<T: std::fmt::Debug>(result: &TextlensResult<T>) {
        match result {
            Err(TextlensError::Persistence(_)) => {}
            other => panic!("Expected Persistence error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_compute_error<T: std::fmt::Debug>(result: &TextlensResult<T>) {
        match result {
            Err(TextlensError::Compute(_)) => {}
            other => panic!("Expected Compute error, got: {:?}", other),
        }
    }
}
