//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use textlens_compute::{ComputeFunction, ExtractiveSummarizer, SentimentAnalyzer};
use textlens_core::{ArtifactKind, Sentiment, Summary};
use textlens_storage::{
    ArtifactStore, CacheBackend, InMemoryCacheBackend, LmdbCacheBackend, MemoryArtifactStore,
    MemoryUserStore, ReadThroughCache, UserStore,
};

use crate::config::{ApiConfig, CacheBackendKind, ServiceConfig, StoreKind};
use crate::db::{apply_schema, DbConfig, PgArtifactStore, PgUserStore};
use crate::error::{ApiError, ApiResult};
use crate::services::{ArtifactService, UserService};

macro_rules! impl_from_ref {
    ($type:ty, $field:ident) => {
        impl axum::extract::FromRef<AppState> for $type {
            fn from_ref(state: &AppState) -> Self {
                state.$field.clone()
            }
        }
    };
}

/// Application-wide state shared across all routes.
///
/// Both services share one read-through cache; kinds are kept apart by
/// their key prefixes.
#[derive(Debug, Clone)]
pub struct AppState {
    pub sentiments: Arc<ArtifactService<Sentiment>>,
    pub summaries: Arc<ArtifactService<Summary>>,
    pub users: Arc<UserService>,
    pub cache: ReadThroughCache,
    pub start_time: Instant,
}

impl_from_ref!(Arc<ArtifactService<Sentiment>>, sentiments);
impl_from_ref!(Arc<ArtifactService<Summary>>, summaries);
impl_from_ref!(Arc<UserService>, users);
impl_from_ref!(ReadThroughCache, cache);
impl_from_ref!(Instant, start_time);

impl AppState {
    pub fn new(
        sentiments: ArtifactService<Sentiment>,
        summaries: ArtifactService<Summary>,
        user_store: Arc<dyn UserStore>,
        cache: ReadThroughCache,
    ) -> Self {
        let sentiments = Arc::new(sentiments);
        let summaries = Arc::new(summaries);
        let users = UserService::new(user_store, sentiments.clone(), summaries.clone());
        Self {
            sentiments,
            summaries,
            users: Arc::new(users),
            cache,
            start_time: Instant::now(),
        }
    }

    /// In-memory stores and the built-in models.
    pub fn in_memory(cache: ReadThroughCache) -> Self {
        Self::with_stores(
            Arc::new(MemoryArtifactStore::<Sentiment>::new()),
            Arc::new(MemoryArtifactStore::<Summary>::new()),
            Arc::new(MemoryUserStore::new()),
            cache,
        )
    }

    fn with_stores(
        sentiment_store: Arc<dyn ArtifactStore<Sentiment>>,
        summary_store: Arc<dyn ArtifactStore<Summary>>,
        user_store: Arc<dyn UserStore>,
        cache: ReadThroughCache,
    ) -> Self {
        let analyzer: Arc<dyn ComputeFunction<Sentiment>> = Arc::new(SentimentAnalyzer::default());
        let summarizer: Arc<dyn ComputeFunction<Summary>> =
            Arc::new(ExtractiveSummarizer::default());
        Self::new(
            ArtifactService::new(sentiment_store, cache.clone(), analyzer),
            ArtifactService::new(summary_store, cache.clone(), summarizer),
            user_store,
            cache,
        )
    }

    /// Build the state the configuration asks for.
    pub async fn from_config(api: &ApiConfig, service: &ServiceConfig) -> ApiResult<Self> {
        let backend: Arc<dyn CacheBackend> = match api.cache_backend {
            CacheBackendKind::Memory => Arc::new(InMemoryCacheBackend::new()),
            CacheBackendKind::Lmdb => {
                let lmdb = LmdbCacheBackend::new(&api.cache_path, api.cache_max_mb).map_err(|e| {
                    ApiError::internal_error(format!("Failed to open LMDB cache: {}", e))
                })?;
                Arc::new(lmdb)
            }
        };
        let cache = ReadThroughCache::new(backend, service.cache_config());

        let state = match api.store {
            StoreKind::Memory => Self::in_memory(cache),
            StoreKind::Postgres => {
                let pool = DbConfig::from_env().create_pool()?;
                apply_schema(&pool).await?;
                Self::with_stores(
                    Arc::new(PgArtifactStore::<Sentiment>::new(pool.clone())),
                    Arc::new(PgArtifactStore::<Summary>::new(pool.clone())),
                    Arc::new(PgUserStore::new(pool)),
                    cache,
                )
            }
        };

        tracing::info!(
            store = ?api.store,
            cache = state.cache.backend_name(),
            write_policy = ?service.write_policy,
            "Application state ready"
        );
        Ok(state)
    }

    /// The user table behind [`UserService`].
    pub fn user_store(&self) -> Arc<dyn UserStore> {
        self.users.store().clone()
    }

    /// The service for kind `K`.
    pub fn service<K: ArtifactKind>(&self) -> Arc<ArtifactService<K>>
    where
        Arc<ArtifactService<K>>: axum::extract::FromRef<AppState>,
    {
        <Arc<ArtifactService<K>> as axum::extract::FromRef<AppState>>::from_ref(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use textlens_core::{NewUser, Requester};

    #[tokio::test]
    async fn test_from_config_with_lmdb_cache() {
        let dir = tempfile::tempdir().unwrap();
        let api = ApiConfig {
            cache_backend: CacheBackendKind::Lmdb,
            cache_path: dir.path().join("cache"),
            cache_max_mb: 8,
            ..ApiConfig::default()
        };
        let state = AppState::from_config(&api, &ServiceConfig::default())
            .await
            .unwrap();
        assert_eq!(state.cache.backend_name(), "lmdb");

        let user = state
            .user_store()
            .create(NewUser::new("member", "member@example.com", "hash"))
            .await
            .unwrap();
        let owner = Requester::Owner(user.id);
        let created = state
            .service::<Sentiment>()
            .create_or_get(owner, "Good.".to_string())
            .await
            .unwrap();
        let id = created.artifact().unwrap().id;

        state.service::<Sentiment>().get_by_id(owner, id).await.unwrap();
        let read = state.service::<Sentiment>().get_by_id(owner, id).await.unwrap();
        assert!(read.was_cache_hit());
    }

    #[tokio::test]
    async fn test_in_memory_state_is_healthy() {
        let cache = ReadThroughCache::with_defaults(Arc::new(InMemoryCacheBackend::new()));
        let state = AppState::in_memory(cache);
        assert_eq!(state.service::<Summary>().cache().backend_name(), "memory");
        state.service::<Sentiment>().store().health_check().await.unwrap();
        state.service::<Summary>().store().health_check().await.unwrap();
        state.user_store().health_check().await.unwrap();
    }
}
