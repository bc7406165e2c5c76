//! TEXTLENS API - REST Layer and Artifact Services
//!
//! Exposes sentiment and summary analysis over HTTP (Axum). Every artifact
//! request runs through an [`ArtifactService`]: reads go cache first, creates
//! are idempotent per owner and text, and mutations keep the cache in line
//! per the configured write policy. Accounts are managed by [`UserService`].
//! Rows live in PostgreSQL or in memory.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod types;

// Re-export commonly used types
pub use auth::{
    access_cookie, authenticate, cleared_cookie, generate_jwt_token, hash_password,
    validate_jwt_token, verify_password, AuthConfig, Claims, FixedClock, JwtClock, JwtSecret,
    SecretStrength, SystemClock, ACCESS_TOKEN_COOKIE,
};
pub use config::{ApiConfig, CacheBackendKind, ServiceConfig, StoreKind};
pub use db::{apply_schema, DbConfig, PgArtifactStore, PgUserStore};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use extractors::{PathId, ValidQuery};
pub use middleware::{
    auth_middleware, rate_limit_middleware, AuthMiddlewareState, RateLimitKey, RateLimitState,
    RequesterExtractor,
};
pub use routes::create_api_router;
pub use services::{ArtifactService, CreateOutcome, EphemeralResult, UserService};
pub use state::AppState;
pub use types::*;
