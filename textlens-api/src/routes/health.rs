//! Health endpoints, mounted under `/health` outside auth.
//!
//! `/ping` only proves the process answers. `/ready` checks both artifact
//! stores and the user store, then reads the cache counters. A failing store
//! makes the service unready (503); a failing cache only degrades it since
//! reads fall through.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use textlens_core::{ArtifactKind, Sentiment, StorageResult, Summary, USERS_TABLE};
use textlens_storage::CacheStats;

use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Outcome of one store check.
#[derive(Debug, Clone, Serialize)]
pub struct StoreCheck {
    pub status: Readiness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheCheck {
    pub backend: &'static str,
    pub status: Readiness,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CacheStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_rate: Option<f64>,
}

/// Body of `GET /health/ready`.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    pub status: Readiness,
    /// Keyed by artifact kind, plus `users`.
    pub stores: BTreeMap<&'static str, StoreCheck>,
    pub cache: CacheCheck,
    pub version: &'static str,
    pub uptime_secs: u64,
}

impl ReadinessReport {
    /// Worst store status, softened to `Degraded` at most by the cache.
    fn overall(stores: &BTreeMap<&'static str, StoreCheck>, cache: &CacheCheck) -> Readiness {
        let worst_store = stores
            .values()
            .map(|check| check.status)
            .max()
            .unwrap_or(Readiness::Healthy);
        let cache_status = cache.status.min(Readiness::Degraded);
        worst_store.max(cache_status)
    }
}

/// GET /health/ping
pub async fn ping() -> &'static str {
    "pong"
}

/// GET /health/ready
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    let mut stores = BTreeMap::new();
    stores.insert(
        Sentiment::NAME,
        check_store(Sentiment::NAME, state.sentiments.store().health_check()).await,
    );
    stores.insert(
        Summary::NAME,
        check_store(Summary::NAME, state.summaries.store().health_check()).await,
    );
    let users = state.user_store();
    stores.insert(
        USERS_TABLE,
        check_store(USERS_TABLE, users.health_check()).await,
    );

    let cache = check_cache(&state).await;
    let status = ReadinessReport::overall(&stores, &cache);
    let report = ReadinessReport {
        status,
        stores,
        cache,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
    };

    let code = match status {
        Readiness::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(report))
}

async fn check_store(
    name: &'static str,
    health_check: impl Future<Output = StorageResult<()>>,
) -> StoreCheck {
    let started = Instant::now();
    match health_check.await {
        Ok(()) => StoreCheck {
            status: Readiness::Healthy,
            latency_ms: Some(started.elapsed().as_millis() as u64),
            error: None,
        },
        Err(e) => {
            tracing::error!(store = name, error = %e, "Store health check failed");
            StoreCheck {
                status: Readiness::Unhealthy,
                latency_ms: None,
                error: Some(format!("{} store is not reachable", name)),
            }
        }
    }
}

async fn check_cache(state: &AppState) -> CacheCheck {
    let backend = state.cache.backend_name();
    match state.cache.stats().await {
        Ok(stats) => CacheCheck {
            backend,
            status: Readiness::Healthy,
            hit_rate: Some(stats.hit_rate()),
            stats: Some(stats),
        },
        Err(e) => {
            tracing::warn!(backend, error = %e, "Cache stats unavailable");
            CacheCheck {
                backend,
                status: Readiness::Degraded,
                stats: None,
                hit_rate: None,
            }
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/ready", get(readiness))
}
