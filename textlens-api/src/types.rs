//! API Request and Response Types
//!
//! Artifact bodies are shared by both kinds. The artifact projection names
//! its result field after the kind (`sentiments` or `summarized_text`), so it
//! is serialized by hand. User forms validate themselves and keep passwords
//! out of their `Debug` output.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use textlens_core::{Artifact, ArtifactId, ArtifactKind, OwnerId, User, UserFilter, UserPatch};

use crate::error::{ApiError, ApiResult};
use crate::services::{CreateOutcome, EphemeralResult};

// ============================================================================
// REQUESTS
// ============================================================================

fn require_text(field: &str, text: &str) -> ApiResult<()> {
    if text.trim().is_empty() {
        return Err(ApiError::invalid_input(format!("'{}' must not be empty", field)));
    }
    Ok(())
}

/// Request to analyze a text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateArtifactRequest {
    pub source_text: String,
}

impl CreateArtifactRequest {
    pub fn validate(&self) -> ApiResult<()> {
        require_text("source_text", &self.source_text)
    }
}

/// Request to re-analyze an existing artifact with revised text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateArtifactRequest {
    pub id: ArtifactId,
    pub updated_text: String,
}

impl UpdateArtifactRequest {
    pub fn validate(&self) -> ApiResult<()> {
        require_text("updated_text", &self.updated_text)
    }
}

/// Request to remove an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeleteArtifactRequest {
    pub id: ArtifactId,
}

/// Query for the smoothed sentiment view.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SmoothQuery {
    /// Number of moving-average windows to blend.
    #[serde(default = "default_filters")]
    pub filters: usize,
}

fn default_filters() -> usize {
    10
}

// ----------------------------------------------------------------------------
// Users
// ----------------------------------------------------------------------------

const MAX_USERNAME_CHARS: usize = 50;
const PASSWORD_CHARS: std::ops::RangeInclusive<usize> = 8..=50;

fn validate_username(username: &str) -> ApiResult<()> {
    require_text("username", username)?;
    if username.chars().count() > MAX_USERNAME_CHARS {
        return Err(ApiError::invalid_input(format!(
            "'username' must be at most {} characters",
            MAX_USERNAME_CHARS
        )));
    }
    Ok(())
}

/// Accepts `local@domain.tld` with no whitespace.
fn validate_email(email: &str) -> ApiResult<()> {
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.split('.').count() >= 2
                && domain.split('.').all(|label| !label.is_empty())
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !well_formed {
        return Err(ApiError::invalid_input("'email' is not a valid email address"));
    }
    Ok(())
}

fn validate_password(password: &str) -> ApiResult<()> {
    if !PASSWORD_CHARS.contains(&password.chars().count()) {
        return Err(ApiError::invalid_input(format!(
            "'password' must be {} to {} characters",
            PASSWORD_CHARS.start(),
            PASSWORD_CHARS.end()
        )));
    }
    Ok(())
}

/// Registration form.
#[derive(Clone, PartialEq, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl SignUpRequest {
    pub fn validate(&self) -> ApiResult<()> {
        validate_username(&self.username)?;
        validate_email(&self.email)?;
        validate_password(&self.password)
    }
}

impl std::fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, PartialEq, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

impl SignInRequest {
    pub fn validate(&self) -> ApiResult<()> {
        validate_email(&self.email)?;
        validate_password(&self.password)
    }
}

impl std::fmt::Debug for SignInRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignInRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Exact-match lookup; omitted fields are ignored. Used by find and delete.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UserFilterRequest {
    #[serde(default)]
    pub id: Option<OwnerId>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl From<UserFilterRequest> for UserFilter {
    fn from(req: UserFilterRequest) -> Self {
        UserFilter {
            id: req.id,
            username: req.username,
            email: req.email,
        }
    }
}

/// Profile changes. At least one field must be present.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> ApiResult<()> {
        if self.username.is_none() && self.email.is_none() {
            return Err(ApiError::invalid_input(
                "Provide 'username', 'email' or both",
            ));
        }
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        Ok(())
    }
}

impl From<UpdateUserRequest> for UserPatch {
    fn from(req: UpdateUserRequest) -> Self {
        UserPatch {
            username: req.username,
            email: req.email,
        }
    }
}

/// `?user_id=` on PUT /user/. Absent means the caller's own account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct UpdateUserQuery {
    #[serde(default)]
    pub user_id: Option<OwnerId>,
}

// ============================================================================
// RESPONSES
// ============================================================================

/// Public projection of an artifact.
///
/// `id` and `user_id` are `None` for results computed for anonymous callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactResponse<K: ArtifactKind> {
    pub id: Option<ArtifactId>,
    pub user_id: Option<OwnerId>,
    pub source_text: String,
    pub result: K::Output,
}

impl<K: ArtifactKind> Serialize for ArtifactResponse<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("user_id", &self.user_id)?;
        map.serialize_entry("source_text", &self.source_text)?;
        map.serialize_entry(K::RESULT_FIELD, &self.result)?;
        map.end()
    }
}

impl<K: ArtifactKind> From<Artifact<K>> for ArtifactResponse<K> {
    fn from(artifact: Artifact<K>) -> Self {
        Self {
            id: Some(artifact.id),
            user_id: artifact.owner_id,
            source_text: artifact.source_text,
            result: artifact.result,
        }
    }
}

impl<K: ArtifactKind> From<EphemeralResult<K>> for ArtifactResponse<K> {
    fn from(ephemeral: EphemeralResult<K>) -> Self {
        Self {
            id: None,
            user_id: None,
            source_text: ephemeral.source_text,
            result: ephemeral.result,
        }
    }
}

impl<K: ArtifactKind> From<CreateOutcome<K>> for ArtifactResponse<K> {
    fn from(outcome: CreateOutcome<K>) -> Self {
        match outcome {
            CreateOutcome::Existing(artifact) | CreateOutcome::Created(artifact) => artifact.into(),
            CreateOutcome::Ephemeral(ephemeral) => ephemeral.into(),
        }
    }
}

/// Plain acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new("ok")
    }
}

/// Sign-in result. The access token is also set as a cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always null; refresh tokens are not issued.
    pub refresh_token: Option<String>,
}

/// Public projection of a user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPublic {
    pub id: OwnerId,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
}

impl From<User> for UserPublic {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            is_admin: user.is_admin,
        }
    }
}

/// Sentiment sequence next to its smoothed rendition, for charting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmoothedResponse {
    pub id: ArtifactId,
    pub sentiments: Vec<f64>,
    pub smoothed: Vec<f64>,
    pub filters: usize,
}
