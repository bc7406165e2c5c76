//! User accounts.
//!
//! A user owns artifacts: `Artifact::owner_id` is a [`User::id`]. Usernames
//! and emails are each unique across all users.

use std::fmt;

use crate::{OwnerId, Timestamp};

/// Table and error-kind name for users.
pub const USERS_TABLE: &str = "users";
pub const USER_KIND: &str = "user";

/// A registered account.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: OwnerId,
    pub username: String,
    pub email: String,
    /// PHC string produced by the password hasher.
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: Timestamp,
}

impl User {
    /// Whether this user may change or remove `target`'s account.
    pub fn may_manage(&self, target: OwnerId) -> bool {
        self.is_admin || self.id == target
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("is_admin", &self.is_admin)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Fields supplied to `create`; the store assigns id and `created_at`.
#[derive(Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
}

impl NewUser {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            is_admin: false,
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("is_admin", &self.is_admin)
            .finish_non_exhaustive()
    }
}

/// Profile changes. `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none()
    }

    pub fn apply_to(&self, user: &mut User) {
        if let Some(username) = &self.username {
            user.username = username.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
    }
}

/// Exact-match conjunction over the unique columns.
///
/// An empty filter matches every user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub id: Option<OwnerId>,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl UserFilter {
    pub fn by_id(id: OwnerId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn by_username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    pub fn by_email(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.username.is_none() && self.email.is_none()
    }

    pub fn matches(&self, user: &User) -> bool {
        self.id.map_or(true, |id| user.id == id)
            && self.username.as_ref().map_or(true, |u| &user.username == u)
            && self.email.as_ref().map_or(true, |e| &user.email == e)
    }
}
