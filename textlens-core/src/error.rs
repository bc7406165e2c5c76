//! Error types for TEXTLENS operations

use crate::ArtifactId;
use thiserror::Error;

/// Artifact Store errors.
///
/// Every variant is fatal to the operation that raised it. The store has
/// already rolled back whatever it started before one of these is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Unique constraint violated on {table}: {reason}")]
    UniqueViolation { table: String, reason: String },

    #[error("Foreign key constraint violated on {table}: {reason}")]
    ForeignKeyViolation { table: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage backend unavailable: {reason}")]
    Backend { reason: String },

    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// True when the failure is a natural-key uniqueness conflict.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StorageError::UniqueViolation { .. })
    }
}

/// Compute Function errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComputeError {
    #[error("Input contains no sentences")]
    EmptyInput,

    #[error("Model failure: {reason}")]
    Model { reason: String },

    #[error("Computation aborted: {reason}")]
    Aborted { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Insecure value for {field} in {environment}: {reason}")]
    InsecureSecret {
        field: String,
        environment: String,
        reason: String,
    },
}

/// Master error type for the artifact protocols.
///
/// `NotFound` deliberately covers both "absent" and "owned by someone else".
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TextlensError {
    #[error("{kind} not found")]
    NotFound { kind: &'static str },

    #[error("{kind} {id} was not modified")]
    NotModified { kind: &'static str, id: ArtifactId },

    #[error("Authentication required")]
    Unauthorized,

    #[error("{kind} with this {field} already exists")]
    AlreadyExists {
        kind: &'static str,
        field: &'static str,
    },

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Credential processing failed: {reason}")]
    Credentials { reason: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for TEXTLENS operations.
pub type TextlensResult<T> = Result<T, TextlensError>;

/// Result type alias for Artifact Store operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// TESTS
// =============================================================================
