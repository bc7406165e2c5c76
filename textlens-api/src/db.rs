//! PostgreSQL Stores
//!
//! Connection pooling with deadpool-postgres, an [`ArtifactStore`]
//! implementation over the tables in `schema.sql` and a [`UserStore`] over
//! `users`. One table per artifact kind; the computed result lives in a
//! JSONB column named after the kind's wire field. The natural key is
//! enforced by a unique constraint on `(user_id, content_hash)`, and every
//! artifact's `user_id` references a row in `users`.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::Value as JsonValue;
use textlens_core::{
    content_hash, Artifact, ArtifactFilter, ArtifactId, ArtifactKind, ArtifactPatch, NewArtifact,
    NewUser, OwnerId, StorageError, StorageResult, Timestamp, User, UserFilter, UserPatch,
    USERS_TABLE,
};
use textlens_storage::{ArtifactStore, UserStore};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::error::{ApiError, ApiResult};

const SCHEMA: &str = include_str!("../schema.sql");

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "textlens".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("TEXTLENS_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("TEXTLENS_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("TEXTLENS_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("TEXTLENS_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("TEXTLENS_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("TEXTLENS_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(
                std::env::var("TEXTLENS_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::store_failure(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

/// Create the tables if they do not exist yet.
pub async fn apply_schema(pool: &Pool) -> ApiResult<()> {
    let conn = pool.get().await?;
    conn.batch_execute(SCHEMA).await?;
    tracing::info!("Database schema applied");
    Ok(())
}

// ============================================================================
// QUERY BUILDING
// ============================================================================

/// Positional parameters for one statement.
#[derive(Default)]
struct SqlParams {
    values: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl SqlParams {
    /// Bind a value and return its placeholder.
    fn bind(&mut self, value: impl ToSql + Sync + Send + 'static) -> String {
        self.values.push(Box::new(value));
        format!("${}", self.values.len())
    }

    fn refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values
            .iter()
            .map(|value| value.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

/// Translate a filter into a WHERE clause, binding its values.
fn where_clause(filter: &ArtifactFilter, params: &mut SqlParams) -> String {
    let mut conditions = Vec::new();
    if let Some(id) = filter.id {
        conditions.push(format!("id = {}", params.bind(id.get())));
    }
    if let Some(owner) = filter.owner_id {
        conditions.push(format!("user_id = {}", params.bind(owner.get())));
    }
    if let Some(text) = &filter.source_text {
        // The hash hits the unique index; the text comparison keeps it exact.
        conditions.push(format!("content_hash = {}", params.bind(content_hash(text))));
        conditions.push(format!("source_text = {}", params.bind(text.clone())));
    }

    if conditions.is_empty() {
        "TRUE".to_string()
    } else {
        conditions.join(" AND ")
    }
}

fn user_where_clause(filter: &UserFilter, params: &mut SqlParams) -> String {
    let mut conditions = Vec::new();
    if let Some(id) = filter.id {
        conditions.push(format!("id = {}", params.bind(id.get())));
    }
    if let Some(username) = &filter.username {
        conditions.push(format!("username = {}", params.bind(username.clone())));
    }
    if let Some(email) = &filter.email {
        conditions.push(format!("email = {}", params.bind(email.clone())));
    }

    if conditions.is_empty() {
        "TRUE".to_string()
    } else {
        conditions.join(" AND ")
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, is_admin, created_at";

fn columns<K: ArtifactKind>() -> String {
    format!(
        "id, user_id, source_text, {}, created_at, updated_at",
        K::RESULT_FIELD
    )
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn corrupt<K: ArtifactKind>(reason: impl Into<String>) -> StorageError {
    StorageError::CorruptRow {
        table: K::TABLE.to_string(),
        reason: reason.into(),
    }
}

fn table_error(table: &str, e: tokio_postgres::Error) -> StorageError {
    let reason = e
        .as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| e.to_string());

    match e.code() {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => StorageError::UniqueViolation {
            table: table.to_string(),
            reason,
        },
        Some(code) if *code == SqlState::FOREIGN_KEY_VIOLATION => {
            StorageError::ForeignKeyViolation {
                table: table.to_string(),
                reason,
            }
        }
        _ if e.is_closed() => StorageError::Backend { reason },
        _ => StorageError::TransactionFailed { reason },
    }
}

fn db_error<K: ArtifactKind>(e: tokio_postgres::Error) -> StorageError {
    table_error(K::TABLE, e)
}

fn user_db_error(e: tokio_postgres::Error) -> StorageError {
    table_error(USERS_TABLE, e)
}

fn pool_error(e: deadpool_postgres::PoolError) -> StorageError {
    StorageError::Backend {
        reason: e.to_string(),
    }
}

fn encode_result<K: ArtifactKind>(result: &K::Output) -> StorageResult<JsonValue> {
    serde_json::to_value(result).map_err(|e| corrupt::<K>(format!("result does not encode: {}", e)))
}

fn row_to_artifact<K: ArtifactKind>(row: &Row) -> StorageResult<Artifact<K>> {
    let get_err = |e: tokio_postgres::Error| corrupt::<K>(e.to_string());

    let id: i64 = row.try_get("id").map_err(get_err)?;
    let user_id: Option<i64> = row.try_get("user_id").map_err(get_err)?;
    let source_text: String = row.try_get("source_text").map_err(get_err)?;
    let raw_result: JsonValue = row.try_get(K::RESULT_FIELD).map_err(get_err)?;
    let created_at: Timestamp = row.try_get("created_at").map_err(get_err)?;
    let updated_at: Timestamp = row.try_get("updated_at").map_err(get_err)?;

    let result = serde_json::from_value(raw_result)
        .map_err(|e| corrupt::<K>(format!("row {} has an undecodable result: {}", id, e)))?;

    Ok(Artifact {
        id: ArtifactId::new(id),
        owner_id: user_id.map(OwnerId::new),
        source_text,
        result,
        created_at,
        updated_at,
    })
}

fn row_to_user(row: &Row) -> StorageResult<User> {
    let get_err = |e: tokio_postgres::Error| StorageError::CorruptRow {
        table: USERS_TABLE.to_string(),
        reason: e.to_string(),
    };

    Ok(User {
        id: OwnerId::new(row.try_get("id").map_err(get_err)?),
        username: row.try_get("username").map_err(get_err)?,
        email: row.try_get("email").map_err(get_err)?,
        password_hash: row.try_get("password_hash").map_err(get_err)?,
        is_admin: row.try_get("is_admin").map_err(get_err)?,
        created_at: row.try_get("created_at").map_err(get_err)?,
    })
}

// ============================================================================
// STORE
// ============================================================================

/// Artifact Store backed by PostgreSQL.
///
/// Clones share the pool. Every mutation runs in its own transaction.
pub struct PgArtifactStore<K: ArtifactKind> {
    pool: Pool,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ArtifactKind> Clone for PgArtifactStore<K> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K: ArtifactKind> std::fmt::Debug for PgArtifactStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgArtifactStore")
            .field("table", &K::TABLE)
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

impl<K: ArtifactKind> PgArtifactStore<K> {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            _kind: PhantomData,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn conn(&self) -> StorageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    async fn select(&self, filter: &ArtifactFilter, limit: Option<i64>) -> StorageResult<Vec<Row>> {
        let mut params = SqlParams::default();
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY id",
            columns::<K>(),
            K::TABLE,
            where_clause(filter, &mut params)
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", params.bind(limit)));
        }

        let conn = self.conn().await?;
        conn.query(sql.as_str(), &params.refs())
            .await
            .map_err(db_error::<K>)
    }
}

#[async_trait]
impl<K: ArtifactKind> ArtifactStore<K> for PgArtifactStore<K> {
    async fn get(&self, filter: &ArtifactFilter) -> StorageResult<Option<Artifact<K>>> {
        let rows = self.select(filter, Some(1)).await?;
        rows.first().map(row_to_artifact::<K>).transpose()
    }

    async fn filter(&self, filter: &ArtifactFilter) -> StorageResult<Vec<Artifact<K>>> {
        let rows = self.select(filter, None).await?;
        rows.iter().map(row_to_artifact::<K>).collect()
    }

    async fn create(&self, fields: NewArtifact<K>) -> StorageResult<Artifact<K>> {
        let sql = format!(
            "INSERT INTO {table} (user_id, source_text, content_hash, {field}) \
             VALUES ($1, $2, $3, $4) RETURNING {columns}",
            table = K::TABLE,
            field = K::RESULT_FIELD,
            columns = columns::<K>(),
        );
        let user_id = fields.owner_id.map(OwnerId::get);
        let hash = content_hash(&fields.source_text);
        let result = encode_result::<K>(&fields.result)?;

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(db_error::<K>)?;
        let row = tx
            .query_one(sql.as_str(), &[&user_id, &fields.source_text, &hash, &result])
            .await
            .map_err(db_error::<K>)?;
        let artifact = row_to_artifact::<K>(&row)?;
        tx.commit().await.map_err(db_error::<K>)?;

        tracing::debug!(table = K::TABLE, id = %artifact.id, "Row inserted");
        Ok(artifact)
    }

    async fn update(&self, filter: &ArtifactFilter, patch: ArtifactPatch<K>) -> StorageResult<u64> {
        let mut params = SqlParams::default();
        let mut assignments = Vec::new();
        if let Some(text) = patch.source_text {
            let hash = content_hash(&text);
            assignments.push(format!("source_text = {}", params.bind(text)));
            assignments.push(format!("content_hash = {}", params.bind(hash)));
        }
        if let Some(result) = &patch.result {
            let encoded = encode_result::<K>(result)?;
            assignments.push(format!("{} = {}", K::RESULT_FIELD, params.bind(encoded)));
        }
        assignments.push("updated_at = now()".to_string());

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            K::TABLE,
            assignments.join(", "),
            where_clause(filter, &mut params)
        );

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(db_error::<K>)?;
        let changed = tx
            .execute(sql.as_str(), &params.refs())
            .await
            .map_err(db_error::<K>)?;
        tx.commit().await.map_err(db_error::<K>)?;
        Ok(changed)
    }

    async fn delete(&self, filter: &ArtifactFilter) -> StorageResult<u64> {
        let mut params = SqlParams::default();
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            K::TABLE,
            where_clause(filter, &mut params)
        );

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(db_error::<K>)?;
        let removed = tx
            .execute(sql.as_str(), &params.refs())
            .await
            .map_err(db_error::<K>)?;
        tx.commit().await.map_err(db_error::<K>)?;
        Ok(removed)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let conn = self.conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(db_error::<K>)?;
        Ok(())
    }
}

// ============================================================================
// USERS
// ============================================================================

/// User store backed by the `users` table.
#[derive(Clone)]
pub struct PgUserStore {
    pool: Pool,
}

impl std::fmt::Debug for PgUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUserStore")
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

impl PgUserStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> StorageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_error)
    }

    async fn select(&self, filter: &UserFilter, limit: Option<i64>) -> StorageResult<Vec<User>> {
        let mut params = SqlParams::default();
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY id",
            USER_COLUMNS,
            USERS_TABLE,
            user_where_clause(filter, &mut params)
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", params.bind(limit)));
        }

        let conn = self.conn().await?;
        let rows = conn
            .query(sql.as_str(), &params.refs())
            .await
            .map_err(user_db_error)?;
        rows.iter().map(row_to_user).collect()
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get(&self, filter: &UserFilter) -> StorageResult<Option<User>> {
        Ok(self.select(filter, Some(1)).await?.into_iter().next())
    }

    async fn filter(&self, filter: &UserFilter) -> StorageResult<Vec<User>> {
        self.select(filter, None).await
    }

    async fn create(&self, fields: NewUser) -> StorageResult<User> {
        let sql = format!(
            "INSERT INTO {} (username, email, password_hash, is_admin) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            USERS_TABLE, USER_COLUMNS
        );

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(user_db_error)?;
        let row = tx
            .query_one(
                sql.as_str(),
                &[
                    &fields.username,
                    &fields.email,
                    &fields.password_hash,
                    &fields.is_admin,
                ],
            )
            .await
            .map_err(user_db_error)?;
        let user = row_to_user(&row)?;
        tx.commit().await.map_err(user_db_error)?;

        tracing::debug!(id = %user.id, "User inserted");
        Ok(user)
    }

    async fn update(&self, id: OwnerId, patch: UserPatch) -> StorageResult<Option<User>> {
        let sql = format!(
            "UPDATE {} SET username = COALESCE($2, username), email = COALESCE($3, email) \
             WHERE id = $1 RETURNING {}",
            USERS_TABLE, USER_COLUMNS
        );

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(user_db_error)?;
        let row = tx
            .query_opt(sql.as_str(), &[&id.get(), &patch.username, &patch.email])
            .await
            .map_err(user_db_error)?;
        let user = row.as_ref().map(row_to_user).transpose()?;
        tx.commit().await.map_err(user_db_error)?;
        Ok(user)
    }

    async fn delete(&self, id: OwnerId) -> StorageResult<bool> {
        let sql = format!("DELETE FROM {} WHERE id = $1", USERS_TABLE);

        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(user_db_error)?;
        let removed = tx
            .execute(sql.as_str(), &[&id.get()])
            .await
            .map_err(user_db_error)?;
        tx.commit().await.map_err(user_db_error)?;
        Ok(removed > 0)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let conn = self.conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(user_db_error)?;
        Ok(())
    }
}
