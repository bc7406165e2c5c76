//! REST API Routes
//!
//! Layout:
//! - `GET /` welcome message
//! - `/health/*` unauthenticated health checks
//! - `/user/*` account routes; sign-up, sign-in and logout are public
//! - `/sentiment/text` and `/summary/text` artifact routes, behind auth and
//!   rate limiting

pub mod artifact;
pub mod health;
pub mod sentiment;
pub mod user;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::get,
    Json, Router,
};
use textlens_core::{Sentiment, Summary};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::config::ApiConfig;
use crate::middleware::{
    auth_middleware, rate_limit_middleware, AuthMiddlewareState, RateLimitState,
};
use crate::state::AppState;
use crate::types::MessageResponse;

/// GET / - Welcome message
pub async fn index() -> Json<MessageResponse> {
    Json(MessageResponse::new("Welcome!"))
}

/// Build the complete router.
///
/// Layer order, outermost first: trace, CORS, then on protected routes auth
/// followed by the rate limiter, so limits can be keyed by owner.
pub fn create_api_router(state: AppState, api_config: &ApiConfig, auth_config: AuthConfig) -> Router {
    let auth_config = Arc::new(auth_config);
    let auth = AuthMiddlewareState::new(auth_config.clone(), state.user_store());
    let limits = RateLimitState::new(api_config.clone());

    let user_routes = user::create_router(
        user::UserRouteState::new(state.users.clone(), auth_config),
        auth.clone(),
        limits.clone(),
    );

    let artifact_routes = Router::new()
        .nest(
            "/sentiment/text",
            artifact::create_router::<Sentiment>().merge(sentiment::create_router()),
        )
        .nest("/summary/text", artifact::create_router::<Summary>())
        .layer(from_fn_with_state(limits, rate_limit_middleware))
        .layer(from_fn_with_state(auth, auth_middleware));

    Router::new()
        .route("/", get(index))
        .nest("/health", health::create_router())
        .nest("/user", user_routes)
        .merge(artifact_routes)
        .with_state(state)
        .layer(build_cors_layer(api_config))
        .layer(TraceLayer::new_for_http())
}

/// Build the CORS layer from ApiConfig.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            header::RETRY_AFTER,
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(origins = ?config.cors_origins, "CORS: restricting origins");
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        // The session cookie only travels cross-origin with credentials on.
        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}
