//! TEXTLENS Storage - Artifact Store and Fast Cache
//!
//! Defines the persistence abstractions for artifacts and users, in-memory
//! stores for tests and single-process deployments, and the cache layer
//! that sits in front of the artifact store. The PostgreSQL stores live in
//! textlens-api.

pub mod cache;
pub mod memory;
pub mod store;
pub mod user_store;

pub use cache::{
    Access, CacheBackend, CacheConfig, CacheEntry, CacheError, CacheKey, CacheRead, CacheResult,
    CacheStats, CacheWritePolicy, InMemoryCacheBackend, LmdbCacheBackend, ReadSource,
    ReadThroughCache, Watermark, WatermarkTable,
};
pub use memory::MemoryArtifactStore;
pub use store::ArtifactStore;
pub use user_store::{MemoryUserStore, UserStore};
