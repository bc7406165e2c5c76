//! The user store contract and its in-memory implementation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use textlens_core::{
    NewUser, OwnerId, StorageError, StorageResult, User, UserFilter, UserPatch, USERS_TABLE,
};

/// Durable storage for user accounts.
///
/// Implementations reject a second user with the same username or email
/// with [`StorageError::UniqueViolation`] on the `users` table.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// At most one user matching `filter`, lowest id first.
    async fn get(&self, filter: &UserFilter) -> StorageResult<Option<User>>;

    /// Every user matching `filter`, ordered by id.
    async fn filter(&self, filter: &UserFilter) -> StorageResult<Vec<User>>;

    /// Insert a user. The store assigns the id and `created_at`.
    async fn create(&self, fields: NewUser) -> StorageResult<User>;

    /// Apply `patch` to user `id`. `None` when there is no such user.
    async fn update(&self, id: OwnerId, patch: UserPatch) -> StorageResult<Option<User>>;

    /// Remove user `id`. `false` when there was no such user.
    async fn delete(&self, id: OwnerId) -> StorageResult<bool>;

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

fn taken(field: &str) -> StorageError {
    StorageError::UniqueViolation {
        table: USERS_TABLE.to_string(),
        reason: format!("{} is already registered", field),
    }
}

#[derive(Debug, Default)]
struct UserTable {
    rows: BTreeMap<OwnerId, User>,
    next_id: i64,
}

impl UserTable {
    /// Reject `username`/`email` if a user other than `except` holds them.
    fn check_unique(
        &self,
        username: &str,
        email: &str,
        except: Option<OwnerId>,
    ) -> StorageResult<()> {
        for row in self.rows.values().filter(|row| Some(row.id) != except) {
            if row.username == username {
                return Err(taken("username"));
            }
            if row.email == email {
                return Err(taken("email"));
            }
        }
        Ok(())
    }
}

/// User store kept in process memory. Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserStore {
    table: Arc<RwLock<UserTable>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.read()?.rows.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, UserTable>> {
        self.table.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, UserTable>> {
        self.table.write().map_err(|_| StorageError::LockPoisoned)
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, filter: &UserFilter) -> StorageResult<Option<User>> {
        let table = self.read()?;
        Ok(table.rows.values().find(|row| filter.matches(row)).cloned())
    }

    async fn filter(&self, filter: &UserFilter) -> StorageResult<Vec<User>> {
        let table = self.read()?;
        Ok(table
            .rows
            .values()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect())
    }

    async fn create(&self, fields: NewUser) -> StorageResult<User> {
        let mut table = self.write()?;
        table.check_unique(&fields.username, &fields.email, None)?;

        table.next_id += 1;
        let user = User {
            id: OwnerId::new(table.next_id),
            username: fields.username,
            email: fields.email,
            password_hash: fields.password_hash,
            is_admin: fields.is_admin,
            created_at: Utc::now(),
        };
        table.rows.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, id: OwnerId, patch: UserPatch) -> StorageResult<Option<User>> {
        let mut table = self.write()?;
        let Some(mut staged) = table.rows.get(&id).cloned() else {
            return Ok(None);
        };
        patch.apply_to(&mut staged);
        table.check_unique(&staged.username, &staged.email, Some(id))?;

        table.rows.insert(id, staged.clone());
        Ok(Some(staged))
    }

    async fn delete(&self, id: OwnerId) -> StorageResult<bool> {
        let mut table = self.write()?;
        Ok(table.rows.remove(&id).is_some())
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.read().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(name: &str) -> NewUser {
        NewUser::new(name, format!("{}@example.com", name), "hash")
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = MemoryUserStore::new();
        let alice = store.create(new_user("alice")).await.unwrap();
        let bob = store.create(new_user("bob").admin()).await.unwrap();
        assert_eq!(alice.id, OwnerId::new(1));
        assert_eq!(bob.id, OwnerId::new(2));
        assert!(!alice.is_admin);
        assert!(bob.is_admin);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_username_and_email_are_unique() {
        let store = MemoryUserStore::new();
        store.create(new_user("alice")).await.unwrap();

        let same_name = NewUser::new("alice", "other@example.com", "hash");
        let err = store.create(same_name).await.unwrap_err();
        assert!(err.is_unique_violation());

        let same_email = NewUser::new("alicia", "alice@example.com", "hash");
        let err = store.create(same_email).await.unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation { ref reason, .. } if reason.contains("email")));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_checks_other_rows_only() {
        let store = MemoryUserStore::new();
        let alice = store.create(new_user("alice")).await.unwrap();
        store.create(new_user("bob")).await.unwrap();

        let keep = UserPatch {
            username: Some("alice".to_string()),
            email: None,
        };
        assert!(store.update(alice.id, keep).await.unwrap().is_some());

        let steal = UserPatch {
            username: Some("bob".to_string()),
            email: None,
        };
        assert!(store.update(alice.id, steal).await.unwrap_err().is_unique_violation());

        let rename = UserPatch {
            username: None,
            email: Some("a@example.com".to_string()),
        };
        let updated = store.update(alice.id, rename).await.unwrap().unwrap();
        assert_eq!(updated.email, "a@example.com");
        assert_eq!(updated.username, "alice");

        assert!(store
            .update(OwnerId::new(99), UserPatch::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_filter_and_delete() {
        let store = MemoryUserStore::new();
        let alice = store.create(new_user("alice")).await.unwrap();
        store.create(new_user("bob")).await.unwrap();

        let found = store
            .filter(&UserFilter::by_username("bob"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.filter(&UserFilter::default()).await.unwrap().len(), 2);

        assert!(store.delete(alice.id).await.unwrap());
        assert!(!store.delete(alice.id).await.unwrap());
        assert!(store
            .get(&UserFilter::by_id(alice.id))
            .await
            .unwrap()
            .is_none());
    }
}
