//! Authentication
//!
//! Turns request headers into a [`Requester`]. Sign-in issues HS256 JWTs
//! whose `sub` is the decimal user id and hands them out both in the body
//! and in the `user_access_token` cookie; requests may present either.
//! Passwords are stored as argon2id PHC strings.
//!
//! No token means anonymous. A token that does not verify is an error: it
//! is never quietly treated as anonymous.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use textlens_core::{ConfigError, OwnerId, Requester, TextlensError, TextlensResult};

use crate::error::{ApiError, ApiResult};

/// Cookie the account service stores the access token in.
pub const ACCESS_TOKEN_COOKIE: &str = "user_access_token";

const SECRET_ENV: &str = "TEXTLENS_JWT_SECRET";
const PLACEHOLDER_SECRET: &str = "textlens-dev-placeholder-secret";
const MIN_PRODUCTION_SECRET_LEN: usize = 32;
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Source of "now" for token expiry checks.
pub trait JwtClock: Send + Sync {
    fn now_epoch_secs(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl JwtClock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Pinned clock, for tests and token tooling.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl JwtClock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.0
    }
}

// ============================================================================
// SIGNING SECRET
// ============================================================================

/// HMAC key shared with the account service. Redacted in `Debug`.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

/// How much a configured secret can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretStrength {
    /// Nothing was configured; the built-in development key is in use.
    Placeholder,
    Short(usize),
    Strong,
}

impl JwtSecret {
    /// # Errors
    /// An empty secret is a missing-configuration error.
    pub fn new(secret: String) -> Result<Self, TextlensError> {
        if secret.is_empty() {
            return Err(TextlensError::Config(ConfigError::MissingRequired {
                field: SECRET_ENV.to_string(),
            }));
        }
        Ok(Self(SecretString::new(secret.into())))
    }

    fn placeholder() -> Self {
        Self(SecretString::new(PLACEHOLDER_SECRET.into()))
    }

    /// Blank or missing values fall back to the placeholder.
    fn or_placeholder(value: Option<String>) -> Self {
        value
            .filter(|s| !s.trim().is_empty())
            .and_then(|s| Self::new(s).ok())
            .unwrap_or_else(Self::placeholder)
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.expose().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    pub fn strength(&self) -> SecretStrength {
        match self.expose() {
            PLACEHOLDER_SECRET => SecretStrength::Placeholder,
            s if s.len() < MIN_PRODUCTION_SECRET_LEN => SecretStrength::Short(s.len()),
            _ => SecretStrength::Strong,
        }
    }
}

impl fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JwtSecret")
            .field(&format_args!("<redacted, {} bytes>", self.len()))
            .finish()
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Clone)]
pub struct AuthConfig {
    pub jwt_secret: JwtSecret,
    /// Lifetime of tokens minted by [`generate_jwt_token`].
    pub token_ttl_secs: i64,
    /// Grace period after `exp` before a token counts as expired.
    pub leeway_secs: i64,
    pub clock: Arc<dyn JwtClock>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: JwtSecret::placeholder(),
            token_ttl_secs: 60 * 60,
            leeway_secs: 60,
            clock: Arc::new(SystemClock),
        }
    }
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok()?.trim().parse().ok()
}

impl AuthConfig {
    /// Reads `TEXTLENS_JWT_SECRET`, `TEXTLENS_JWT_EXPIRATION_SECS` and
    /// `TEXTLENS_JWT_CLOCK_SKEW_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            jwt_secret: JwtSecret::or_placeholder(std::env::var(SECRET_ENV).ok()),
            token_ttl_secs: env_i64("TEXTLENS_JWT_EXPIRATION_SECS").unwrap_or(defaults.token_ttl_secs),
            leeway_secs: env_i64("TEXTLENS_JWT_CLOCK_SKEW_SECS").unwrap_or(defaults.leeway_secs),
            clock: defaults.clock,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.jwt_secret = JwtSecret::or_placeholder(Some(secret.into()));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn JwtClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Production refuses a placeholder or short secret. Other environments
    /// start anyway and log a warning.
    pub fn validate_for_environment(&self, environment: &str) -> Result<(), ConfigError> {
        let production = matches!(environment.to_ascii_lowercase().as_str(), "production" | "prod");

        let problem = match self.jwt_secret.strength() {
            SecretStrength::Strong => return Ok(()),
            SecretStrength::Placeholder => "is not set".to_string(),
            SecretStrength::Short(len) => format!(
                "is {} bytes, need at least {}",
                len, MIN_PRODUCTION_SECRET_LEN
            ),
        };

        if production {
            return Err(ConfigError::InsecureSecret {
                field: SECRET_ENV.to_string(),
                environment: environment.to_string(),
                reason: problem,
            });
        }
        tracing::warn!(environment, "Weak JWT secret: {} {}", SECRET_ENV, problem);
        Ok(())
    }
}

// ============================================================================
// CLAIMS AND TOKENS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Owner id, decimal.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(owner_id: OwnerId, ttl_secs: i64, clock: &dyn JwtClock) -> Self {
        let iat = clock.now_epoch_secs();
        Self {
            sub: owner_id.to_string(),
            iat,
            exp: iat + ttl_secs,
        }
    }

    pub fn owner_id(&self) -> ApiResult<OwnerId> {
        self.sub
            .parse()
            .map_err(|_| ApiError::invalid_token("Token subject is not a user id"))
    }
}

fn signature_only() -> Validation {
    let mut validation = Validation::new(ALGORITHM);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.required_spec_claims = ["exp", "sub"].iter().map(|c| c.to_string()).collect::<HashSet<_>>();
    validation
}

fn rejection(kind: &ErrorKind) -> ApiError {
    match kind {
        ErrorKind::InvalidSignature => ApiError::invalid_token("Token signature does not match"),
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
            ApiError::invalid_token("Token is malformed")
        }
        ErrorKind::MissingRequiredClaim(claim) => {
            ApiError::invalid_token(format!("Token lacks the '{}' claim", claim))
        }
        other => ApiError::invalid_token(format!("Token rejected: {:?}", other)),
    }
}

/// Check the signature, then expiry against the configured clock.
pub fn validate_jwt_token(config: &AuthConfig, token: &str) -> ApiResult<Claims> {
    let key = DecodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    let claims = decode::<Claims>(token, &key, &signature_only())
        .map_err(|e| rejection(e.kind()))?
        .claims;

    let now = config.clock.now_epoch_secs();
    if now < 0 {
        tracing::error!(now, "Clock reports a time before the epoch");
        return Err(ApiError::internal_error("Server clock is misconfigured"));
    }
    if claims.exp + config.leeway_secs < now {
        return Err(ApiError::token_expired());
    }
    Ok(claims)
}

/// Mint a token for `owner_id`.
pub fn generate_jwt_token(config: &AuthConfig, owner_id: OwnerId) -> ApiResult<String> {
    let claims = Claims::new(owner_id, config.token_ttl_secs, config.clock.as_ref());
    let key = EncodingKey::from_secret(config.jwt_secret.expose().as_bytes());
    encode(&Header::new(ALGORITHM), &claims, &key)
        .map_err(|e| ApiError::internal_error(format!("Could not sign token: {}", e)))
}

/// `Set-Cookie` value carrying a freshly minted token.
pub fn access_cookie(config: &AuthConfig, token: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={}",
        ACCESS_TOKEN_COOKIE,
        token,
        config.token_ttl_secs.max(0)
    )
}

/// `Set-Cookie` value that removes the access token cookie.
pub fn cleared_cookie() -> String {
    format!(
        "{}=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0",
        ACCESS_TOKEN_COOKIE
    )
}

// ============================================================================
// PASSWORDS
// ============================================================================

fn credentials_error(e: impl fmt::Display) -> TextlensError {
    TextlensError::Credentials {
        reason: e.to_string(),
    }
}

/// Hash `password` with a fresh salt. Runs on the blocking pool.
pub async fn hash_password(password: String) -> TextlensResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(credentials_error)
    })
    .await
    .map_err(credentials_error)?
}

/// Check `password` against a stored PHC string. Runs on the blocking pool.
///
/// A mismatch is `Ok(false)`. A stored hash that does not parse is an error.
pub async fn verify_password(password: String, stored_hash: String) -> TextlensResult<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&stored_hash).map_err(credentials_error)?;
        match Argon2::default().verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(credentials_error(e)),
        }
    })
    .await
    .map_err(credentials_error)?
}

// ============================================================================
// REQUEST RESOLUTION
// ============================================================================

fn bearer_token(headers: &HeaderMap) -> ApiResult<Option<String>> {
    let Some(raw) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let raw = raw
        .to_str()
        .map_err(|_| ApiError::invalid_token("Authorization header is not valid text"))?;
    match raw.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
            Ok(Some(token.trim().to_string()))
        }
        _ => Err(ApiError::invalid_token("Authorization header must use the Bearer scheme")),
    }
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find_map(|(name, value)| (name == ACCESS_TOKEN_COOKIE).then(|| value.trim_matches('"')))
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Raw token from the request, header first, then cookie.
pub fn extract_token(headers: &HeaderMap) -> ApiResult<Option<String>> {
    Ok(bearer_token(headers)?.or_else(|| cookie_token(headers)))
}

pub fn authenticate(config: &AuthConfig, headers: &HeaderMap) -> ApiResult<Requester> {
    let Some(token) = extract_token(headers)? else {
        return Ok(Requester::Anonymous);
    };
    let owner = validate_jwt_token(config, &token)?.owner_id()?;
    Ok(Requester::Owner(owner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use axum::http::HeaderValue;

    /// 2024-01-01 00:00:00 UTC
    const ISSUED_AT: i64 = 1_704_067_200;

    fn config_at(now: i64) -> AuthConfig {
        AuthConfig::default()
            .with_secret("unit-test-secret-of-reasonable-length")
            .with_clock(Arc::new(FixedClock(now)))
    }

    fn with_header(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_token_roundtrip() {
        let config = config_at(ISSUED_AT);
        let token = generate_jwt_token(&config, OwnerId::new(42)).unwrap();
        let claims = validate_jwt_token(&config, &token).unwrap();
        assert_eq!(claims.owner_id().unwrap(), OwnerId::new(42));
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_expiry_respects_leeway() {
        let token = generate_jwt_token(&config_at(ISSUED_AT), OwnerId::new(1)).unwrap();

        let within = config_at(ISSUED_AT + 3600 + 30);
        assert!(validate_jwt_token(&within, &token).is_ok());

        let past = config_at(ISSUED_AT + 3600 + 61);
        let err = validate_jwt_token(&past, &token).unwrap_err();
        assert_eq!(err.code, ErrorCode::TokenExpired);
    }

    #[test]
    fn test_foreign_signature_and_garbage_are_invalid() {
        let config = config_at(ISSUED_AT);
        let token = generate_jwt_token(&config, OwnerId::new(1)).unwrap();

        let other = config.clone().with_secret("another-secret-nobody-shares-with-us");
        assert_eq!(
            validate_jwt_token(&other, &token).unwrap_err().code,
            ErrorCode::InvalidToken
        );
        assert_eq!(
            validate_jwt_token(&config, "not-a-jwt").unwrap_err().code,
            ErrorCode::InvalidToken
        );
    }

    #[test]
    fn test_non_numeric_subject_is_rejected() {
        let claims = Claims {
            sub: "alice".to_string(),
            iat: 0,
            exp: 10,
        };
        assert_eq!(claims.owner_id().unwrap_err().code, ErrorCode::InvalidToken);
    }

    #[test]
    fn test_resolution_sources() {
        let config = config_at(ISSUED_AT);
        assert_eq!(
            authenticate(&config, &HeaderMap::new()).unwrap(),
            Requester::Anonymous
        );

        let token = generate_jwt_token(&config, OwnerId::new(7)).unwrap();
        let bearer = with_header(header::AUTHORIZATION, &format!("Bearer {}", token));
        assert_eq!(
            authenticate(&config, &bearer).unwrap(),
            Requester::Owner(OwnerId::new(7))
        );

        let cookie = with_header(
            header::COOKIE,
            &format!("theme=dark; {}={}", ACCESS_TOKEN_COOKIE, token),
        );
        assert_eq!(
            authenticate(&config, &cookie).unwrap(),
            Requester::Owner(OwnerId::new(7))
        );
    }

    #[test]
    fn test_bad_credentials_are_not_anonymous() {
        let config = config_at(ISSUED_AT);
        let forged = with_header(header::AUTHORIZATION, "Bearer forged");
        assert!(authenticate(&config, &forged).is_err());

        let basic = with_header(header::AUTHORIZATION, "Basic abc");
        assert_eq!(extract_token(&basic).unwrap_err().code, ErrorCode::InvalidToken);
    }

    #[test]
    fn test_empty_cookie_is_ignored() {
        let headers = with_header(header::COOKIE, &format!("{}=", ACCESS_TOKEN_COOKIE));
        assert_eq!(extract_token(&headers).unwrap(), None);
    }

    #[test]
    fn test_secret_strength_gates_production() {
        let config = AuthConfig::default();
        assert_eq!(config.jwt_secret.strength(), SecretStrength::Placeholder);
        assert!(matches!(
            config.validate_for_environment("production"),
            Err(ConfigError::InsecureSecret { ref field, .. }) if field == SECRET_ENV
        ));
        assert!(config.validate_for_environment("development").is_ok());

        let short = AuthConfig::default().with_secret("short");
        assert_eq!(short.jwt_secret.strength(), SecretStrength::Short(5));
        match short.validate_for_environment("PROD") {
            Err(ConfigError::InsecureSecret { environment, reason, .. }) => {
                assert_eq!(environment, "PROD");
                assert!(reason.contains("5 bytes"));
            }
            other => panic!("expected an insecure secret error, got {:?}", other),
        }

        let strong = AuthConfig::default().with_secret("x".repeat(MIN_PRODUCTION_SECRET_LEN));
        assert!(strong.validate_for_environment("production").is_ok());

        let blank = AuthConfig::default().with_secret("   ");
        assert_eq!(blank.jwt_secret.strength(), SecretStrength::Placeholder);
    }

    #[tokio::test]
    async fn test_password_hash_verifies_only_the_original() {
        let hash = hash_password("correct horse".to_string()).await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("correct horse"));

        assert!(verify_password("correct horse".to_string(), hash.clone())
            .await
            .unwrap());
        assert!(!verify_password("wrong horse".to_string(), hash.clone())
            .await
            .unwrap());

        let again = hash_password("correct horse".to_string()).await.unwrap();
        assert_ne!(hash, again, "every hash gets its own salt");
    }

    #[tokio::test]
    async fn test_unparsable_stored_hash_is_an_error() {
        let err = verify_password("anything".to_string(), "plaintext".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, TextlensError::Credentials { .. }));
    }

    #[test]
    fn test_cookies_are_http_only() {
        let config = config_at(ISSUED_AT);
        let cookie = access_cookie(&config, "abc");
        assert!(cookie.starts_with("user_access_token=abc;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cleared_cookie().contains("Max-Age=0"));
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let debug = format!("{:?}", AuthConfig::default().with_secret("super-secret-value"));
        assert!(!debug.contains("super-secret-value"));
        assert!(debug.contains("redacted"));
        assert!(JwtSecret::new(String::new()).is_err());
    }
}
