//! Error Types for the TEXTLENS API
//!
//! Every handler returns [`ApiResult`]. Domain errors from the service layer
//! are translated here, once, into a JSON body and a status code. Internal
//! details (SQL errors, model failures) are logged and replaced by a generic
//! message before they reach the client.

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use textlens_core::{ComputeError, StorageError, TextlensError, USERS_TABLE, USER_KIND};

// ============================================================================
// ERROR CODES
// ============================================================================

/// Machine-readable reason carried in every error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // 401
    Unauthorized,
    InvalidToken,
    TokenExpired,
    InvalidCredentials,

    // 400 / 422
    InvalidInput,
    /// Well-formed text without a single sentence in it.
    UnprocessableText,

    // 404 / 304
    /// Absent, or owned by someone else. The two are not told apart.
    ArtifactNotFound,
    UserNotFound,
    /// The row vanished between the ownership check and the write.
    NotModified,

    // 409
    /// The owner already has a row for this text.
    DuplicateText,
    /// The owner id has no account row.
    UnknownOwner,
    /// Username or email is taken.
    DuplicateUser,

    // 429
    TooManyRequests,

    // 5xx
    InternalError,
    StoreFailure,
    StoreUnavailable,
    ComputeFailed,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        use ErrorCode::*;
        match self {
            Unauthorized | InvalidToken | TokenExpired | InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            InvalidInput => StatusCode::BAD_REQUEST,
            UnprocessableText => StatusCode::UNPROCESSABLE_ENTITY,
            ArtifactNotFound | UserNotFound => StatusCode::NOT_FOUND,
            NotModified => StatusCode::NOT_MODIFIED,
            DuplicateText | UnknownOwner | DuplicateUser => StatusCode::CONFLICT,
            TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            InternalError | StoreFailure | ComputeFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing text used when nothing more specific is safe to say.
    pub fn default_message(&self) -> &'static str {
        use ErrorCode::*;
        match self {
            Unauthorized => "You are not authorized",
            InvalidToken => "Access token could not be verified",
            TokenExpired => "Access token has expired",
            InvalidCredentials => "Invalid email or password",
            InvalidInput => "Request body is invalid",
            UnprocessableText => "Text contains no sentences to analyze",
            ArtifactNotFound => "No artifact with such id was found",
            UserNotFound => "Not found",
            NotModified => "Artifact was not modified",
            DuplicateText => "This text has already been analyzed",
            UnknownOwner => "Owner account does not exist",
            DuplicateUser => "User already exists",
            TooManyRequests => "Too many requests",
            InternalError => "Something went wrong",
            StoreFailure => "Could not read or write artifacts",
            StoreUnavailable => "Artifact store is unavailable",
            ComputeFailed => "Text analysis failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR
// ============================================================================

/// JSON error body: `{code, message, details?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn token_expired() -> Self {
        Self::from_code(ErrorCode::TokenExpired)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn artifact_not_found(kind: &str) -> Self {
        Self::new(ErrorCode::ArtifactNotFound, format!("No {} with such id was found", kind))
    }

    pub fn not_modified(kind: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotModified, format!("{} {} was not modified", kind, id))
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn store_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreFailure, message)
    }

    /// 429 body; the `retry-after` header is added by the rate limiter.
    pub fn too_many_requests(retry_after_secs: Option<u64>) -> Self {
        let mut err = Self::from_code(ErrorCode::TooManyRequests);
        if let Some(secs) = retry_after_secs {
            err.message = format!("Too many requests, retry in {}s", secs);
            err.details = Some(serde_json::json!({ "retry_after_secs": secs }));
        }
        err
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // 304 must not carry a body.
        if status == StatusCode::NOT_MODIFIED {
            return status.into_response();
        }
        (status, Json(self)).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl From<TextlensError> for ApiError {
    fn from(err: TextlensError) -> Self {
        match err {
            TextlensError::NotFound { kind } if kind == USER_KIND => {
                ApiError::from_code(ErrorCode::UserNotFound)
            }
            TextlensError::NotFound { kind } => ApiError::artifact_not_found(kind),
            TextlensError::NotModified { kind, id } => ApiError::not_modified(kind, id),
            TextlensError::Unauthorized => ApiError::from_code(ErrorCode::Unauthorized),
            TextlensError::AlreadyExists { kind, field } => ApiError::new(
                ErrorCode::DuplicateUser,
                format!("{} with this {} already exists", capitalized(kind), field),
            ),
            TextlensError::InvalidCredentials => ApiError::from_code(ErrorCode::InvalidCredentials),
            TextlensError::Credentials { reason } => {
                tracing::error!(reason = %reason, "Credential processing failed");
                ApiError::from_code(ErrorCode::InternalError)
            }
            TextlensError::Persistence(e) => e.into(),
            TextlensError::Compute(e) => e.into(),
            TextlensError::Config(e) => {
                tracing::error!(error = %e, "Configuration error surfaced in a request");
                ApiError::from_code(ErrorCode::InternalError)
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UniqueViolation { table, .. } if table == USERS_TABLE => {
                ApiError::from_code(ErrorCode::DuplicateUser)
            }
            StorageError::UniqueViolation { .. } => ApiError::from_code(ErrorCode::DuplicateText),
            StorageError::ForeignKeyViolation { .. } => {
                ApiError::from_code(ErrorCode::UnknownOwner)
            }
            other => {
                tracing::error!(error = %other, "Persistence failure");
                ApiError::from_code(ErrorCode::StoreFailure)
            }
        }
    }
}

impl From<ComputeError> for ApiError {
    fn from(err: ComputeError) -> Self {
        match err {
            ComputeError::EmptyInput => ApiError::from_code(ErrorCode::UnprocessableText),
            other => {
                tracing::error!(error = %other, "Compute failure");
                ApiError::from_code(ErrorCode::ComputeFailed)
            }
        }
    }
}

impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        tracing::error!(error = %err, "Postgres statement failed");
        ApiError::from_code(ErrorCode::StoreFailure)
    }
}

impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!(error = %err, "No pooled connection");
        match err {
            deadpool_postgres::PoolError::Timeout(_) | deadpool_postgres::PoolError::Closed => {
                ApiError::from_code(ErrorCode::StoreUnavailable)
            }
            _ => ApiError::from_code(ErrorCode::StoreFailure),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
