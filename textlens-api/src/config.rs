//! API Configuration Module
//!
//! Server, CORS, rate limiting and backend selection. Everything is read from
//! `TEXTLENS_*` environment variables with development-friendly defaults.
//! Numeric settings fall back to their default when unparsable; backend
//! selectors are strict, since a typo there would silently change where data
//! is kept.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use textlens_core::ConfigError;
use textlens_storage::{CacheConfig, CacheWritePolicy};

use crate::error::{ApiError, ApiResult};

fn parse_or<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    get(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn flag_or(get: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> bool {
    get(key)
        .map(|s| {
            let s = s.trim().to_lowercase();
            s == "true" || s == "1"
        })
        .unwrap_or(default)
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Which Fast Cache backend to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Lmdb,
}

impl FromStr for CacheBackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "lmdb" => Ok(Self::Lmdb),
            other => Err(ConfigError::InvalidValue {
                field: "TEXTLENS_CACHE_BACKEND".to_string(),
                value: other.to_string(),
                reason: "expected memory or lmdb".to_string(),
            }),
        }
    }
}

/// Which Artifact Store to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(ConfigError::InvalidValue {
                field: "TEXTLENS_STORE".to_string(),
                value: other.to_string(),
                reason: "expected memory or postgres".to_string(),
            }),
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// Server-level settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Interface to bind.
    pub bind_host: String,
    pub port: u16,

    /// Allowed CORS origins. Empty means allow all (dev mode).
    pub cors_origins: Vec<String>,
    pub cors_allow_credentials: bool,
    pub cors_max_age_secs: u64,

    /// Whether mutating routes are rate limited.
    pub rate_limit_enabled: bool,
    /// Sustained requests per minute per caller.
    pub rate_limit_per_minute: u32,
    /// Requests allowed back to back before the limit applies.
    pub rate_limit_burst: u32,
    /// Key anonymous callers by `X-Forwarded-For` / `X-Real-IP`. Only safe
    /// behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,

    pub cache_backend: CacheBackendKind,
    /// LMDB environment directory.
    pub cache_path: PathBuf,
    /// LMDB map size.
    pub cache_max_mb: usize,

    pub store: StoreKind,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,
            // One request per second per caller.
            rate_limit_enabled: true,
            rate_limit_per_minute: 60,
            rate_limit_burst: 1,
            trust_proxy_headers: false,
            cache_backend: CacheBackendKind::Memory,
            cache_path: PathBuf::from("./data/cache"),
            cache_max_mb: 256,
            store: StoreKind::Memory,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TEXTLENS_API_BIND`: Interface to bind (default: 0.0.0.0)
    /// - `PORT` or `TEXTLENS_API_PORT`: Port (default: 8000)
    /// - `TEXTLENS_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `TEXTLENS_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `TEXTLENS_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `TEXTLENS_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `TEXTLENS_RATE_LIMIT_PER_MINUTE`: Requests per minute per caller (default: 60)
    /// - `TEXTLENS_RATE_LIMIT_BURST`: Burst capacity (default: 1)
    /// - `TEXTLENS_TRUST_PROXY_HEADERS`: "true" to key by forwarded client IP (default: false)
    /// - `TEXTLENS_CACHE_BACKEND`: memory | lmdb (default: memory)
    /// - `TEXTLENS_CACHE_PATH`: LMDB directory (default: ./data/cache)
    /// - `TEXTLENS_CACHE_MAX_MB`: LMDB map size (default: 256)
    /// - `TEXTLENS_STORE`: memory | postgres (default: memory)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cors_origins = get("TEXTLENS_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cache_backend = match get("TEXTLENS_CACHE_BACKEND") {
            Some(value) => value.parse()?,
            None => defaults.cache_backend,
        };
        let store = match get("TEXTLENS_STORE") {
            Some(value) => value.parse()?,
            None => defaults.store,
        };

        Ok(Self {
            bind_host: get("TEXTLENS_API_BIND").unwrap_or(defaults.bind_host),
            port: get("PORT")
                .or_else(|| get("TEXTLENS_API_PORT"))
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.port),
            cors_origins,
            cors_allow_credentials: flag_or(&get, "TEXTLENS_CORS_ALLOW_CREDENTIALS", false),
            cors_max_age_secs: parse_or(&get, "TEXTLENS_CORS_MAX_AGE_SECS", defaults.cors_max_age_secs),
            rate_limit_enabled: get("TEXTLENS_RATE_LIMIT_ENABLED")
                .map(|s| s.trim().to_lowercase() != "false")
                .unwrap_or(true),
            rate_limit_per_minute: parse_or(
                &get,
                "TEXTLENS_RATE_LIMIT_PER_MINUTE",
                defaults.rate_limit_per_minute,
            ),
            rate_limit_burst: parse_or(&get, "TEXTLENS_RATE_LIMIT_BURST", defaults.rate_limit_burst),
            trust_proxy_headers: flag_or(&get, "TEXTLENS_TRUST_PROXY_HEADERS", false),
            cache_backend,
            cache_path: get("TEXTLENS_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_path),
            cache_max_mb: parse_or(&get, "TEXTLENS_CACHE_MAX_MB", defaults.cache_max_mb),
            store,
        })
    }

    /// The socket address to listen on.
    pub fn bind_addr(&self) -> ApiResult<SocketAddr> {
        let addr = format!("{}:{}", self.bind_host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
    }

    /// Check if running with strict CORS.
    pub fn is_production(&self) -> bool {
        !self.cors_origins.is_empty()
    }
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Settings for the artifact services.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// What the cache does after an update or delete.
    pub write_policy: CacheWritePolicy,
    /// Deployment environment name, used for security checks.
    pub environment: String,
}

impl ServiceConfig {
    /// - `TEXTLENS_CACHE_WRITE_POLICY`: refresh | lazy (default: refresh)
    /// - `TEXTLENS_ENVIRONMENT`: deployment name (default: development)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let write_policy = match get("TEXTLENS_CACHE_WRITE_POLICY") {
            Some(value) => value.parse()?,
            None => CacheWritePolicy::default(),
        };
        Ok(Self {
            write_policy,
            environment: get("TEXTLENS_ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
        })
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new().with_write_policy(self.write_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8000);
        assert!(config.cors_origins.is_empty());
        assert!(config.rate_limit_enabled);
        assert_eq!(config.rate_limit_per_minute, 60);
        assert_eq!(config.rate_limit_burst, 1);
        assert!(!config.trust_proxy_headers);
        assert_eq!(config.cache_backend, CacheBackendKind::Memory);
        assert_eq!(config.store, StoreKind::Memory);
        assert!(!config.is_production());
    }

    #[test]
    fn test_overrides_are_read() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("TEXTLENS_API_PORT", "9100"),
            ("TEXTLENS_CORS_ORIGINS", "https://a.example, ,https://b.example"),
            ("TEXTLENS_RATE_LIMIT_ENABLED", "false"),
            ("TEXTLENS_RATE_LIMIT_PER_MINUTE", "120"),
            ("TEXTLENS_TRUST_PROXY_HEADERS", "1"),
            ("TEXTLENS_CACHE_BACKEND", "LMDB"),
            ("TEXTLENS_CACHE_PATH", "/tmp/textlens"),
            ("TEXTLENS_STORE", "postgres"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.cors_origins.len(), 2);
        assert!(config.is_production());
        assert!(!config.rate_limit_enabled);
        assert_eq!(config.rate_limit_per_minute, 120);
        assert!(config.trust_proxy_headers);
        assert_eq!(config.cache_backend, CacheBackendKind::Lmdb);
        assert_eq!(config.cache_path, PathBuf::from("/tmp/textlens"));
        assert_eq!(config.store, StoreKind::Postgres);
    }

    #[test]
    fn test_port_env_takes_precedence() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("PORT", "7000"),
            ("TEXTLENS_API_PORT", "9100"),
        ]))
        .unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.bind_addr().unwrap().port(), 7000);
    }

    #[test]
    fn test_bad_numbers_fall_back_to_defaults() {
        let config =
            ApiConfig::from_lookup(lookup(&[("TEXTLENS_RATE_LIMIT_BURST", "lots")])).unwrap();
        assert_eq!(config.rate_limit_burst, 1);
    }

    #[test]
    fn test_unknown_backend_is_an_error() {
        let err = ApiConfig::from_lookup(lookup(&[("TEXTLENS_STORE", "mongo")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "TEXTLENS_STORE"));
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = ApiConfig {
            bind_host: "not an ip".to_string(),
            ..ApiConfig::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_service_config() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.write_policy, CacheWritePolicy::Refresh);
        assert_eq!(config.environment, "development");

        let config =
            ServiceConfig::from_lookup(lookup(&[("TEXTLENS_CACHE_WRITE_POLICY", "lazy")])).unwrap();
        assert_eq!(config.cache_config().write_policy, CacheWritePolicy::Lazy);

        assert!(
            ServiceConfig::from_lookup(lookup(&[("TEXTLENS_CACHE_WRITE_POLICY", "never")]))
                .is_err()
        );
    }
}
