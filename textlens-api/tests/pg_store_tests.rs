//! PostgreSQL Store Tests
//!
//! Need a reachable database configured through `TEXTLENS_DB_*`. Run with
//! `--features db-tests`.

#![cfg(feature = "db-tests")]

use deadpool_postgres::Pool;
use textlens_api::{apply_schema, DbConfig, PgArtifactStore, PgUserStore};
use textlens_core::{
    ArtifactFilter, ArtifactId, ArtifactPatch, NaturalKey, NewArtifact, NewUser, OwnerId,
    Sentiment, StorageError, Summary, UserFilter, UserPatch, USERS_TABLE,
};
use textlens_storage::{ArtifactStore, UserStore};

async fn pool() -> Pool {
    let pool = DbConfig::from_env().create_pool().unwrap();
    apply_schema(&pool).await.unwrap();
    pool
}

/// A username no earlier run has used.
fn fresh_name(prefix: &str) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{}-{}", prefix, nanos)
}

/// A freshly registered user, so artifacts may reference it.
async fn fresh_owner(pool: &Pool) -> OwnerId {
    let name = fresh_name("owner");
    let user = PgUserStore::new(pool.clone())
        .create(NewUser::new(&name, format!("{}@example.com", name), "hash"))
        .await
        .unwrap();
    user.id
}

fn new_sentiment(owner: OwnerId, text: &str, scores: Vec<f64>) -> NewArtifact<Sentiment> {
    NewArtifact {
        owner_id: Some(owner),
        source_text: text.to_string(),
        result: scores,
    }
}

#[tokio::test]
async fn test_create_and_get_by_id() {
    let pool = pool().await;
    let owner = fresh_owner(&pool).await;
    let store = PgArtifactStore::<Sentiment>::new(pool);

    let created = store
        .create(new_sentiment(owner, "I love this. I hate that.", vec![0.9, -0.8]))
        .await
        .unwrap();
    let fetched = store
        .get(&ArtifactFilter::by_id(created.id))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.owner_id, Some(owner));
    assert_eq!(fetched.result, vec![0.9, -0.8]);
}

#[tokio::test]
async fn test_natural_key_lookup_and_unique_violation() {
    let pool = pool().await;
    let owner = fresh_owner(&pool).await;
    let store = PgArtifactStore::<Summary>::new(pool);

    let fields = NewArtifact {
        owner_id: Some(owner),
        source_text: "One. Two.".to_string(),
        result: "One.".to_string(),
    };
    let created = store.create(fields.clone()).await.unwrap();

    let key = NaturalKey::new(owner, "One. Two.");
    let found = store
        .get(&ArtifactFilter::by_natural_key(&key))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, created.id);

    let err = store.create(fields).await.unwrap_err();
    assert!(err.is_unique_violation());
}

#[tokio::test]
async fn test_unknown_owner_is_foreign_key_violation() {
    let store = PgArtifactStore::<Sentiment>::new(pool().await);
    let err = store
        .create(new_sentiment(OwnerId::new(-1), "Nobody.", vec![0.0]))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ForeignKeyViolation { .. }));
}

#[tokio::test]
async fn test_update_and_delete_report_row_counts() {
    let pool = pool().await;
    let owner = fresh_owner(&pool).await;
    let store = PgArtifactStore::<Sentiment>::new(pool);
    let created = store
        .create(new_sentiment(owner, "Before.", vec![0.0]))
        .await
        .unwrap();
    let mine = ArtifactFilter::by_id(created.id).owned_by(owner);

    let changed = store
        .update(&mine, ArtifactPatch::recomputed("After.".to_string(), vec![0.4]))
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let updated = store.get(&mine).await.unwrap().unwrap();
    assert_eq!(updated.source_text, "After.");
    assert!(updated.updated_at >= created.updated_at);

    let foreign = ArtifactFilter::by_id(created.id).owned_by(OwnerId::new(-1));
    assert_eq!(store.delete(&foreign).await.unwrap(), 0);
    assert_eq!(store.delete(&mine).await.unwrap(), 1);
    assert!(store.get(&mine).await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_id_reads_none() {
    let store = PgArtifactStore::<Summary>::new(pool().await);
    let row = store
        .get(&ArtifactFilter::by_id(ArtifactId::new(-42)))
        .await
        .unwrap();
    assert!(row.is_none());
    store.health_check().await.unwrap();
}

// ============================================================================
// USERS
// ============================================================================

#[tokio::test]
async fn test_registered_user_can_own_artifacts() {
    let pool = pool().await;
    let users = PgUserStore::new(pool.clone());
    let name = fresh_name("writer");
    let user = users
        .create(NewUser::new(&name, format!("{}@example.com", name), "hash"))
        .await
        .unwrap();

    let store = PgArtifactStore::<Sentiment>::new(pool);
    let created = store
        .create(new_sentiment(user.id, "Owned from the first insert.", vec![0.2]))
        .await
        .unwrap();
    assert_eq!(created.owner_id, Some(user.id));

    assert!(users.delete(user.id).await.unwrap());
    let orphan = store.get(&ArtifactFilter::by_id(created.id)).await.unwrap();
    assert!(orphan.is_none(), "artifacts are removed with their owner");
}

#[tokio::test]
async fn test_user_uniqueness_and_update() {
    let pool = pool().await;
    let users = PgUserStore::new(pool);
    let name = fresh_name("unique");
    let email = format!("{}@example.com", name);
    let user = users
        .create(NewUser::new(&name, &email, "hash"))
        .await
        .unwrap();
    assert!(!user.is_admin);

    let err = users
        .create(NewUser::new(&name, format!("other-{}", email), "hash"))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::UniqueViolation { ref table, .. } if table == USERS_TABLE));

    let renamed = fresh_name("renamed");
    let updated = users
        .update(
            user.id,
            UserPatch {
                username: Some(renamed.clone()),
                email: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.username, renamed);
    assert_eq!(updated.email, email);

    let found = users.get(&UserFilter::by_email(&email)).await.unwrap().unwrap();
    assert_eq!(found.id, user.id);
    assert!(users
        .update(OwnerId::new(-1), UserPatch::default())
        .await
        .unwrap()
        .is_none());
    users.health_check().await.unwrap();
}
