use async_trait::async_trait;
use jiff::Timestamp;
use snip_core::storage::{Association, ReadStorage, Result, Storage, UrlPair};
use snip_core::{StorageError, Token, TokenValue};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Connection, QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

const UPSERT_TOKEN: &str = r#"
    INSERT INTO tokens (token, expire, removed)
    VALUES (?, ?, ?)
    ON CONFLICT (token) DO UPDATE SET expire = excluded.expire, removed = excluded.removed
"#;

const UPSERT_URL: &str = r#"
    INSERT INTO urls (url, token, owner)
    VALUES (?, ?, ?)
    ON CONFLICT (url) DO UPDATE SET token = excluded.token, owner = excluded.owner
"#;

const INSERT_TOKEN: &str = "INSERT INTO tokens (token, expire, removed) VALUES (?, ?, ?)";

const INSERT_URL: &str = "INSERT INTO urls (url, token, owner) VALUES (?, ?, ?)";

const INSERT_TOKEN_IF_ABSENT: &str = r#"
    INSERT INTO tokens (token, expire, removed)
    VALUES (?, ?, ?)
    ON CONFLICT (token) DO NOTHING
"#;

const SELECT_ASSOCIATION: &str = r#"
    SELECT t.token, t.expire, t.removed, u.url, u.owner
    FROM tokens t
    JOIN urls u ON u.token = t.token
    WHERE u.url = ?
"#;

/// Connection settings for [`SqlStorage`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct SqlStorageOptions {
    #[builder(default = 5)]
    pub max_connections: u32,
    /// Deadline for [`ReadStorage::ping`].
    #[builder(default = Duration::from_secs(1))]
    pub ping_timeout: Duration,
}

impl Default for SqlStorageOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Relational implementation of the storage contract on SQLite.
///
/// Tokens and URL associations live in two tables joined on the token
/// value; a unique index on `urls.url` backs URL deduplication. Multi
/// statement writes run in one transaction and roll back as a unit.
#[derive(Debug, Clone)]
pub struct SqlStorage {
    pool: SqlitePool,
    ping_timeout: Duration,
}

impl SqlStorage {
    /// Creates a storage from an existing, already migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            ping_timeout: SqlStorageOptions::default().ping_timeout,
        }
    }

    /// Opens a pool for `dsn` with default options and applies migrations.
    pub async fn connect(dsn: &str) -> Result<Self> {
        Self::connect_with(dsn, SqlStorageOptions::default()).await
    }

    /// Opens a pool for `dsn` and applies migrations.
    pub async fn connect_with(dsn: &str, options: SqlStorageOptions) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(dsn)
            .map_err(map_sqlx_error)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect_options)
            .await
            .map_err(map_sqlx_error)?;

        let storage = Self {
            pool,
            ping_timeout: options.ping_timeout,
        };
        storage.migrate().await?;

        info!(dsn = %dsn, "opened sql storage");
        Ok(storage)
    }

    /// Brings the schema up to date. Safe to run repeatedly.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Query(format!("migration failed: {e}")))
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_expire(seconds: i64) -> Result<Timestamp> {
    Timestamp::from_second(seconds).map_err(|e| {
        StorageError::InvalidData(format!("invalid expire timestamp '{}': {e}", seconds))
    })
}

fn token_from_row(row: &SqliteRow) -> Result<Token> {
    let value: String = row.try_get("token").map_err(map_sqlx_error)?;
    let expire: i64 = row.try_get("expire").map_err(map_sqlx_error)?;
    let removed: bool = row.try_get("removed").map_err(map_sqlx_error)?;

    Ok(Token {
        value: TokenValue::new_unchecked(value),
        expire: parse_expire(expire)?,
        removed,
    })
}

fn association_from_row(row: &SqliteRow) -> Result<Association> {
    let owner: Option<String> = row.try_get("owner").map_err(map_sqlx_error)?;
    Ok(Association {
        token: token_from_row(row)?,
        url: row.try_get("url").map_err(map_sqlx_error)?,
        owner: owner.unwrap_or_default(),
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::Configuration(_) => StorageError::Configuration(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn map_write_error(err: sqlx::Error, key: &str) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::Conflict(key.to_owned())
    } else {
        map_sqlx_error(err)
    }
}

#[async_trait]
impl ReadStorage for SqlStorage {
    async fn get_token(&self, value: &TokenValue) -> Result<Token> {
        let row = sqlx::query("SELECT token, expire, removed FROM tokens WHERE token = ?")
            .bind(value.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => token_from_row(&row),
            None => Err(StorageError::TokenNotFound(value.to_string())),
        }
    }

    async fn get_token_by_url(&self, url: &str) -> Result<Token> {
        let row = sqlx::query(
            r#"
            SELECT t.token, t.expire, t.removed
            FROM tokens t
            JOIN urls u ON u.token = t.token
            WHERE u.url = ?
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => token_from_row(&row),
            None => Err(StorageError::TokenNotFound(url.to_owned())),
        }
    }

    async fn get_association(&self, url: &str) -> Result<Association> {
        let row = sqlx::query(SELECT_ASSOCIATION)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => association_from_row(&row),
            None => Err(StorageError::UrlNotFound(url.to_owned())),
        }
    }

    async fn get_tokens_by_owner(&self, owner: &str) -> Result<Vec<Token>> {
        let rows = sqlx::query(
            r#"
            SELECT t.token, t.expire, t.removed
            FROM tokens t
            JOIN urls u ON u.token = t.token
            WHERE u.owner = ?
            ORDER BY u.id
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if rows.is_empty() {
            return Err(StorageError::OwnerNotFound(owner.to_owned()));
        }

        rows.iter().map(token_from_row).collect()
    }

    async fn get_url(&self, value: &TokenValue) -> Result<String> {
        let row = sqlx::query("SELECT url FROM urls WHERE token = ?")
            .bind(value.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.try_get("url").map_err(map_sqlx_error),
            None => Err(StorageError::UrlNotFound(value.to_string())),
        }
    }

    async fn get_urls_by_owner(&self, owner: &str) -> Result<Vec<UrlPair>> {
        let rows = sqlx::query("SELECT url, token FROM urls WHERE owner = ? ORDER BY id")
            .bind(owner)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        if rows.is_empty() {
            return Err(StorageError::OwnerNotFound(owner.to_owned()));
        }

        rows.iter()
            .map(|row| {
                Ok(UrlPair {
                    short_url: row.try_get("token").map_err(map_sqlx_error)?,
                    original_url: row.try_get("url").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }

    async fn has_url(&self, url: &str) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM urls WHERE url = ? LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .is_some();

        Ok(exists)
    }

    async fn has_token(&self, value: &TokenValue) -> Result<bool> {
        let exists = sqlx::query("SELECT 1 FROM tokens WHERE token = ? LIMIT 1")
            .bind(value.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .is_some();

        Ok(exists)
    }

    async fn count_urls(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM urls")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count.max(0) as u64)
    }

    async fn count_owners(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT owner) FROM urls")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        let check = async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await
        };

        match tokio::time::timeout(self.ping_timeout, check).await {
            Ok(result) => result.map_err(map_sqlx_error),
            Err(_) => Err(StorageError::Timeout(format!(
                "ping exceeded {:?}",
                self.ping_timeout
            ))),
        }
    }
}

#[async_trait]
impl Storage for SqlStorage {
    async fn set(&self, owner: &str, url: &str, token: Token) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Write first: a deferred transaction that reads before writing cannot
        // upgrade its lock once another writer has committed.
        sqlx::query(UPSERT_TOKEN)
            .bind(token.value.as_str())
            .bind(token.expire.as_second())
            .bind(token.removed)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let previous: Option<String> = sqlx::query_scalar("SELECT token FROM urls WHERE url = ?")
            .bind(url)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query(UPSERT_URL)
            .bind(url)
            .bind(token.value.as_str())
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error(e, token.value.as_str()))?;

        // The URL moved to another token: the old one is no longer reachable.
        if let Some(previous) = previous.filter(|p| p != token.value.as_str()) {
            sqlx::query("DELETE FROM tokens WHERE token = ?")
                .bind(previous)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(owner = %owner, url = %url, token = %token.value, "stored association");
        Ok(())
    }

    async fn set_if_absent(
        &self,
        owner: &str,
        url: &str,
        token: Token,
    ) -> Result<Option<Association>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Takes the write lock before the URL is looked up, so no other
        // writer can slip in between the check and the insert.
        let token_inserted = sqlx::query(INSERT_TOKEN_IF_ABSENT)
            .bind(token.value.as_str())
            .bind(token.expire.as_second())
            .bind(token.removed)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected()
            == 1;

        let existing = sqlx::query(SELECT_ASSOCIATION)
            .bind(url)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if let Some(row) = existing {
            let association = association_from_row(&row)?;
            tx.rollback().await.map_err(map_sqlx_error)?;
            debug!(url = %url, token = %association.token.value, "url already stored");
            return Ok(Some(association));
        }

        if !token_inserted {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(StorageError::Conflict(token.value.to_string()));
        }

        sqlx::query(INSERT_URL)
            .bind(url)
            .bind(token.value.as_str())
            .bind(owner)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error(e, url))?;

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(owner = %owner, url = %url, token = %token.value, "stored new association");
        Ok(None)
    }

    async fn set_batch(&self, owner: &str, batch: HashMap<String, Token>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // Same SQL text on every iteration, so each statement is prepared once
        // per connection and reused from sqlx's statement cache.
        for (url, token) in &batch {
            sqlx::query(INSERT_TOKEN)
                .bind(token.value.as_str())
                .bind(token.expire.as_second())
                .bind(token.removed)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_write_error(e, token.value.as_str()))?;

            sqlx::query(INSERT_URL)
                .bind(url.as_str())
                .bind(token.value.as_str())
                .bind(owner)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_write_error(e, url))?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;

        debug!(owner = %owner, count = batch.len(), "stored association batch");
        Ok(())
    }

    async fn remove_tokens(&self, values: &[TokenValue], owner: &str) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("UPDATE tokens SET removed = TRUE WHERE token IN (");
        let mut separated = builder.separated(", ");
        for value in values {
            separated.push_bind(value.as_str());
        }
        separated.push_unseparated(") AND token IN (SELECT token FROM urls WHERE owner = ");
        builder.push_bind(owner);
        builder.push(")");

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        debug!(
            owner = %owner,
            requested = values.len(),
            removed = result.rows_affected(),
            "tombstoned tokens"
        );
        Ok(())
    }
}
