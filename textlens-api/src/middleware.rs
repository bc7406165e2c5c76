//! Axum Middleware for Authentication and Rate Limiting
//!
//! `auth_middleware` resolves every request to a [`Requester`] and stores it
//! in the request extensions. A missing token is an anonymous caller; a
//! present but invalid one, or one whose account is gone, is rejected with
//! 401. `rate_limit_middleware` throttles mutating requests per owner, or
//! per client IP for anonymous callers, and must run after authentication.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use textlens_core::{OwnerId, Requester, UserFilter};
use textlens_storage::UserStore;

use crate::auth::{authenticate, AuthConfig};
use crate::config::ApiConfig;
use crate::error::ApiError;

// ============================================================================
// AUTHENTICATION
// ============================================================================

#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
    /// Tokens are only honoured while their account exists.
    pub users: Arc<dyn UserStore>,
}

impl AuthMiddlewareState {
    pub fn new(auth_config: Arc<AuthConfig>, users: Arc<dyn UserStore>) -> Self {
        Self { auth_config, users }
    }
}

impl std::fmt::Debug for AuthMiddlewareState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMiddlewareState")
            .field("auth_config", &self.auth_config)
            .finish_non_exhaustive()
    }
}

/// Resolve the caller and inject it into request extensions.
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let requester = authenticate(&state.auth_config, request.headers())?;
    if let Some(owner) = requester.owner() {
        if state.users.get(&UserFilter::by_id(owner)).await?.is_none() {
            tracing::debug!(owner = %owner, "Token for a removed account");
            return Err(ApiError::unauthorized("User not found"));
        }
    }
    request.extensions_mut().insert(requester);
    Ok(next.run(request).await)
}

/// Typed extractor for the caller resolved by [`auth_middleware`].
///
/// Extraction fails with 500 if the middleware was not applied to the route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequesterExtractor(pub Requester);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequesterExtractor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Requester>()
            .copied()
            .map(RequesterExtractor)
            .ok_or_else(|| {
                tracing::error!("Route reached without auth_middleware");
                ApiError::from_code(crate::error::ErrorCode::InternalError)
            })
    }
}

impl std::ops::Deref for RequesterExtractor {
    type Target = Requester;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Checks between sweeps of idle buckets.
const PRUNE_EVERY: u64 = 1024;

/// Who a rate limit bucket belongs to.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    /// Authenticated caller.
    Owner(OwnerId),
    /// Anonymous caller, by client address.
    Ip(IpAddr),
}

/// State for rate limiting middleware.
///
/// One keyed limiter holds every bucket. Buckets that have fully refilled
/// carry no information and are dropped every [`PRUNE_EVERY`] checks, so
/// the table only holds callers seen within the last refill period.
#[derive(Clone)]
pub struct RateLimitState {
    config: Arc<ApiConfig>,
    limiter: Arc<DefaultKeyedRateLimiter<RateLimitKey>>,
    checks: Arc<AtomicU64>,
}

impl RateLimitState {
    pub fn new(config: ApiConfig) -> Self {
        let per_minute = NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.rate_limit_burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(per_minute).allow_burst(burst);
        Self {
            config: Arc::new(config),
            limiter: Arc::new(RateLimiter::dashmap(quota)),
            checks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of callers with a live bucket.
    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }

    /// Drop buckets that have refilled completely.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    fn check(&self, key: &RateLimitKey) -> Result<(), governor::NotUntil<<DefaultClock as Clock>::Instant>> {
        if self.checks.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
            tracing::debug!(tracked = self.tracked_keys(), "Pruned idle rate limit buckets");
        }
        self.limiter.check_key(key)
    }
}

impl std::fmt::Debug for RateLimitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitState")
            .field("enabled", &self.config.rate_limit_enabled)
            .field("per_minute", &self.config.rate_limit_per_minute)
            .field("burst", &self.config.rate_limit_burst)
            .field("trust_proxy_headers", &self.config.trust_proxy_headers)
            .field("tracked_keys", &self.tracked_keys())
            .finish()
    }
}

/// Rejection carrying the wait, in whole seconds.
#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let error = ApiError::too_many_requests(Some(self.retry_after));
        let mut response = error.into_response();
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(self.retry_after));
        response
    }
}

fn header_ip(request: &Request, name: &str) -> Option<IpAddr> {
    let value = request.headers().get(name)?.to_str().ok()?;
    // A forwarded chain lists the original client first.
    value.split(',').next()?.trim().parse().ok()
}

/// Client address for anonymous buckets.
///
/// Proxy headers are client-controlled, so they are read only when the
/// deployment sits behind a proxy that sets them. Otherwise the socket
/// peer address is used.
fn client_ip(request: &Request, trust_proxy_headers: bool) -> IpAddr {
    let forwarded = trust_proxy_headers
        .then(|| header_ip(request, "x-forwarded-for").or_else(|| header_ip(request, "x-real-ip")))
        .flatten();
    forwarded
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        })
        .unwrap_or(IpAddr::from([0, 0, 0, 0]))
}

fn is_mutating(method: &Method) -> bool {
    method == Method::POST || method == Method::PUT || method == Method::DELETE
}

/// Throttle POST, PUT and DELETE. Reads pass through untouched.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !state.config.rate_limit_enabled || !is_mutating(request.method()) {
        return Ok(next.run(request).await);
    }

    let key = match request.extensions().get::<Requester>().and_then(Requester::owner) {
        Some(owner) => RateLimitKey::Owner(owner),
        None => RateLimitKey::Ip(client_ip(&request, state.config.trust_proxy_headers)),
    };

    match state.check(&key) {
        Ok(()) => {
            let mut response = next.run(request).await;
            if let Ok(limit) = HeaderValue::from_str(&state.config.rate_limit_per_minute.to_string()) {
                response.headers_mut().insert("x-ratelimit-limit", limit);
            }
            Ok(response)
        }
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1);
            tracing::debug!(key = ?key, retry_after, "Request rate limited");
            Err(RateLimitError { retry_after })
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::generate_jwt_token;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::{body::Body, middleware, routing::get, Router};
    use std::time::Duration;
    use textlens_core::NewUser;
    use textlens_storage::MemoryUserStore;
    use tower::ServiceExt;

    const SECRET: &str = "middleware_test_secret_long_enough_1234";

    fn auth_config() -> Arc<AuthConfig> {
        Arc::new(AuthConfig::default().with_secret(SECRET))
    }

    /// A user table holding one member, id 1.
    async fn users() -> Arc<MemoryUserStore> {
        let store = MemoryUserStore::new();
        store
            .create(NewUser::new("member", "member@example.com", "hash"))
            .await
            .unwrap();
        Arc::new(store)
    }

    async fn whoami(RequesterExtractor(requester): RequesterExtractor) -> String {
        match requester.owner() {
            Some(owner) => owner.to_string(),
            None => "anonymous".to_string(),
        }
    }

    async fn app(limits: ApiConfig) -> Router {
        let users: Arc<dyn UserStore> = users().await;
        Router::new()
            .route("/", get(whoami).post(whoami))
            .layer(middleware::from_fn_with_state(
                RateLimitState::new(limits),
                rate_limit_middleware,
            ))
            .layer(middleware::from_fn_with_state(
                AuthMiddlewareState::new(auth_config(), users),
                auth_middleware,
            ))
    }

    fn behind_proxy() -> ApiConfig {
        ApiConfig {
            trust_proxy_headers: true,
            ..ApiConfig::default()
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn post_from(ip: &str) -> Request {
        HttpRequest::builder()
            .method(Method::POST)
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    fn with_token(owner: i64) -> Request {
        let token = generate_jwt_token(&auth_config(), OwnerId::new(owner)).unwrap();
        HttpRequest::builder()
            .uri("/")
            .header(header::COOKIE, format!("theme=dark; user_access_token={}", token))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_token_is_anonymous() {
        let request = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        let response = app(ApiConfig::default()).await.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_cookie_token_resolves_owner() {
        let response = app(ApiConfig::default())
            .await
            .oneshot(with_token(1))
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "1");
    }

    #[tokio::test]
    async fn test_token_for_unknown_account_is_rejected() {
        let response = app(ApiConfig::default())
            .await
            .oneshot(with_token(42))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_invalid_token_is_rejected() {
        let request = HttpRequest::builder()
            .uri("/")
            .header(header::AUTHORIZATION, "Bearer not.a.token")
            .body(Body::empty())
            .unwrap();
        let response = app(ApiConfig::default()).await.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_extractor_without_middleware_is_internal_error() {
        let router = Router::new().route("/", get(whoami));
        let request = HttpRequest::builder().uri("/").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_second_post_within_a_second_is_limited() {
        let router = app(behind_proxy()).await;

        let first = router.clone().oneshot(post_from("10.0.0.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert!(first.headers().contains_key("x-ratelimit-limit"));

        let second = router.clone().oneshot(post_from("10.0.0.1")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after = second.headers().get(header::RETRY_AFTER).unwrap();
        assert!(retry_after.to_str().unwrap().parse::<u64>().unwrap() >= 1);

        // A different client has its own bucket.
        let other = router.oneshot(post_from("10.0.0.2")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forged_forwarded_for_shares_one_bucket() {
        let router = app(ApiConfig::default()).await;

        let first = router.clone().oneshot(post_from("10.0.1.1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        // Without a trusted proxy the header is ignored, so rotating it
        // does not buy a fresh bucket.
        let second = router.oneshot(post_from("10.0.1.2")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_reads_are_not_limited() {
        let router = app(behind_proxy()).await;
        for _ in 0..3 {
            let request = HttpRequest::builder()
                .uri("/")
                .header("x-forwarded-for", "10.0.0.3")
                .body(Body::empty())
                .unwrap();
            let response = router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_disabled_limiter_passes_everything() {
        let router = app(ApiConfig {
            rate_limit_enabled: false,
            ..ApiConfig::default()
        })
        .await;
        for _ in 0..3 {
            let response = router.clone().oneshot(post_from("10.0.0.4")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_refilled_buckets_are_pruned() {
        // Ten per second, so a bucket refills in 100ms.
        let state = RateLimitState::new(ApiConfig {
            rate_limit_per_minute: 600,
            ..ApiConfig::default()
        });
        for n in 0..50u8 {
            let key = RateLimitKey::Ip(IpAddr::from([10, 0, 2, n]));
            assert!(state.check(&key).is_ok());
        }
        assert_eq!(state.tracked_keys(), 50);

        state.prune();
        assert_eq!(state.tracked_keys(), 50, "Busy buckets are kept");

        tokio::time::sleep(Duration::from_millis(300)).await;
        state.prune();
        assert_eq!(state.tracked_keys(), 0);
    }

    #[test]
    fn test_client_ip_reads_proxy_headers_only_when_trusted() {
        let request = HttpRequest::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .header("x-real-ip", "198.51.100.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request, true), "203.0.113.9".parse::<IpAddr>().unwrap());
        assert_eq!(client_ip(&request, false), IpAddr::from([0, 0, 0, 0]));

        let mut request = HttpRequest::builder()
            .header("x-real-ip", "198.51.100.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request, true), "198.51.100.1".parse::<IpAddr>().unwrap());

        let peer: SocketAddr = "192.0.2.7:5000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));
        assert_eq!(client_ip(&request, false), peer.ip());
    }
}
