//! User accounts: sign-up, credential checks, profile reads and changes,
//! and account removal.
//!
//! A member may only read and change their own account; admins may change
//! or remove anyone's. Attempts on another member's account are reported as
//! not found, as with artifacts.

use std::sync::Arc;

use textlens_core::{
    NewUser, OwnerId, Requester, Sentiment, Summary, TextlensError, TextlensResult, User,
    UserFilter, UserPatch, USER_KIND,
};
use textlens_storage::UserStore;

use super::ArtifactService;
use crate::auth::{hash_password, verify_password};

fn user_not_found() -> TextlensError {
    TextlensError::NotFound { kind: USER_KIND }
}

pub struct UserService {
    store: Arc<dyn UserStore>,
    sentiments: Arc<ArtifactService<Sentiment>>,
    summaries: Arc<ArtifactService<Summary>>,
}

impl std::fmt::Debug for UserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService").finish_non_exhaustive()
    }
}

impl UserService {
    /// The artifact services are needed so account removal also clears the
    /// account's artifacts from store and cache.
    pub fn new(
        store: Arc<dyn UserStore>,
        sentiments: Arc<ArtifactService<Sentiment>>,
        summaries: Arc<ArtifactService<Summary>>,
    ) -> Self {
        Self {
            store,
            sentiments,
            summaries,
        }
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// Register a new member.
    pub async fn signup(
        &self,
        username: String,
        email: String,
        password: String,
    ) -> TextlensResult<User> {
        self.ensure_free("username", UserFilter::by_username(&username), None)
            .await?;
        self.ensure_free("email", UserFilter::by_email(&email), None)
            .await?;

        let password_hash = hash_password(password).await?;
        let user = self
            .store
            .create(NewUser::new(username, email, password_hash))
            .await?;

        tracing::info!(user = %user.id, "User signed up");
        Ok(user)
    }

    /// The account behind `email`, if `password` matches it.
    ///
    /// An unknown email and a wrong password fail the same way.
    pub async fn authenticate(&self, email: &str, password: String) -> TextlensResult<User> {
        let Some(user) = self.store.get(&UserFilter::by_email(email)).await? else {
            tracing::debug!("Sign-in for unknown email");
            return Err(TextlensError::InvalidCredentials);
        };
        if !verify_password(password, user.password_hash.clone()).await? {
            tracing::debug!(user = %user.id, "Sign-in with wrong password");
            return Err(TextlensError::InvalidCredentials);
        }
        Ok(user)
    }

    /// The requester's own account.
    ///
    /// `Unauthorized` for anonymous callers and for tokens whose account
    /// no longer exists.
    pub async fn profile(&self, requester: Requester) -> TextlensResult<User> {
        let owner = requester.require_owner()?;
        self.store
            .get(&UserFilter::by_id(owner))
            .await?
            .ok_or(TextlensError::Unauthorized)
    }

    /// Whether `owner` still has an account.
    pub async fn exists(&self, owner: OwnerId) -> TextlensResult<bool> {
        Ok(self.store.get(&UserFilter::by_id(owner)).await?.is_some())
    }

    /// Users matching `filter`. `NotFound` when there are none.
    pub async fn find(&self, requester: Requester, filter: UserFilter) -> TextlensResult<Vec<User>> {
        self.profile(requester).await?;
        let users = self.store.filter(&filter).await?;
        if users.is_empty() {
            return Err(user_not_found());
        }
        Ok(users)
    }

    /// Change a username or email. `target` defaults to the requester.
    pub async fn update(
        &self,
        requester: Requester,
        target: Option<OwnerId>,
        patch: UserPatch,
    ) -> TextlensResult<User> {
        let actor = self.profile(requester).await?;
        let target = target.unwrap_or(actor.id);
        if !actor.may_manage(target) {
            return Err(user_not_found());
        }

        if let Some(username) = &patch.username {
            self.ensure_free("username", UserFilter::by_username(username), Some(target))
                .await?;
        }
        if let Some(email) = &patch.email {
            self.ensure_free("email", UserFilter::by_email(email), Some(target))
                .await?;
        }

        let user = self
            .store
            .update(target, patch)
            .await?
            .ok_or_else(user_not_found)?;
        tracing::info!(user = %user.id, by = %actor.id, "User updated");
        Ok(user)
    }

    /// Remove the account matching `filter` along with its artifacts. An
    /// empty filter means the requester's own account.
    pub async fn delete(&self, requester: Requester, filter: UserFilter) -> TextlensResult<User> {
        let actor = self.profile(requester).await?;
        let target = if filter.is_empty() {
            actor.clone()
        } else {
            self.store
                .get(&filter)
                .await?
                .filter(|user| actor.may_manage(user.id))
                .ok_or_else(user_not_found)?
        };

        self.sentiments.purge_owner(target.id).await?;
        self.summaries.purge_owner(target.id).await?;
        if !self.store.delete(target.id).await? {
            return Err(user_not_found());
        }

        tracing::info!(user = %target.id, by = %actor.id, "User deleted");
        Ok(target)
    }

    /// `AlreadyExists` if a user other than `except` matches `filter`.
    async fn ensure_free(
        &self,
        field: &'static str,
        filter: UserFilter,
        except: Option<OwnerId>,
    ) -> TextlensResult<()> {
        match self.store.get(&filter).await? {
            Some(holder) if Some(holder.id) != except => Err(TextlensError::AlreadyExists {
                kind: USER_KIND,
                field,
            }),
            _ => Ok(()),
        }
    }
}
