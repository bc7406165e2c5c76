//! Fast Cache layer.
//!
//! The cache is an optimization only: it never holds anything the Artifact
//! Store does not also hold, and every cache failure degrades to a store
//! read instead of failing the request.
//!
//! Backends are byte-level and object-safe so they can be swapped at
//! runtime. Typed (de)serialization and the read-through protocol live in
//! [`ReadThroughCache`].
//!
//! # Example
//!
//! ```ignore
//! let cache = ReadThroughCache::with_defaults(Arc::new(InMemoryCacheBackend::new()));
//! let read = cache.lookup::<Sentiment, _>(id, Access::Owner(owner), &store).await?;
//! if read.was_cache_hit() {
//!     tracing::debug!("served from cache");
//! }
//! ```

pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod read_through;
pub mod traits;
pub mod watermark;

pub use key::CacheKey;
pub use lmdb_backend::LmdbCacheBackend;
pub use memory_backend::InMemoryCacheBackend;
pub use read_through::{Access, CacheConfig, CacheRead, CacheWritePolicy, ReadSource, ReadThroughCache};
pub use traits::{CacheBackend, CacheEntry, CacheError, CacheResult, CacheStats};
pub use watermark::{Watermark, WatermarkTable};
