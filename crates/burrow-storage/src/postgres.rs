use async_trait::async_trait;
use burrow_core::{Context, MappingRecord, Result, Stats, Storage, StorageError};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info, trace};
use typed_builder::TypedBuilder;

const SCHEMA: &str = include_str!("../ddl/postgres/address.sql");

const UPSERT: &str = r#"
    INSERT INTO address AS a (short_url, origin_url, user_id, is_deleted)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (short_url) DO UPDATE SET
        origin_url = EXCLUDED.origin_url,
        user_id = EXCLUDED.user_id,
        is_deleted = a.is_deleted OR EXCLUDED.is_deleted
"#;

/// Connection pool bounds for [`PostgresStorage`].
///
/// Defaults: three connections, recycled after three minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TypedBuilder)]
pub struct PoolSettings {
    /// Upper bound on open connections.
    #[builder(default = 3)]
    pub max_connections: u32,
    /// How long an unused connection is kept before being closed.
    #[builder(default = Duration::from_secs(3 * 60))]
    pub idle_timeout: Duration,
    /// Maximum age of any connection.
    #[builder(default = Duration::from_secs(3 * 60))]
    pub max_lifetime: Duration,
    /// How long a caller waits for a free connection.
    #[builder(default = Duration::from_secs(5))]
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PoolSettings {
    fn options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(0)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
            .acquire_timeout(self.acquire_timeout)
    }
}

/// PostgreSQL implementation of the [`Storage`] contract.
///
/// Records live in a single `address` table keyed by short code, with a
/// unique index on the original URL (the source of `Conflict` errors) and a
/// secondary index on the owner. Soft delete flips `is_deleted`; rows are
/// never removed.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a storage from an existing connection pool.
    ///
    /// The schema is not touched; call [`migrate`](Self::migrate) if needed.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool with the default [`PoolSettings`] and ensures the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, PoolSettings::default()).await
    }

    /// Opens a pool with explicit bounds and ensures the schema exists.
    pub async fn connect_with(database_url: &str, settings: PoolSettings) -> Result<Self> {
        let pool = settings
            .options()
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        let storage = Self::new(pool);
        storage.migrate().await?;

        info!(
            max_connections = settings.max_connections,
            "connected postgres storage"
        );
        Ok(storage)
    }

    /// Creates the table and its indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
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
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

/// Maps a failed write of `record`, turning unique violations into conflicts.
fn map_write_error(err: sqlx::Error, record: &MappingRecord) -> StorageError {
    if is_unique_violation(&err) {
        StorageError::Conflict(record.original_url.clone())
    } else {
        map_sqlx_error(err)
    }
}

fn record_from_row(row: &PgRow) -> Result<MappingRecord> {
    let short_code: String = row.try_get("short_url").map_err(map_sqlx_error)?;
    Ok(MappingRecord {
        id: short_code.clone(),
        user_id: row.try_get("user_id").map_err(map_sqlx_error)?,
        original_url: row.try_get("origin_url").map_err(map_sqlx_error)?,
        deleted: row.try_get("is_deleted").map_err(map_sqlx_error)?,
        short_code,
    })
}

fn count_from_row(row: &PgRow, column: &str) -> Result<usize> {
    let count: i64 = row.try_get(column).map_err(map_sqlx_error)?;
    usize::try_from(count)
        .map_err(|e| StorageError::InvalidData(format!("invalid {column} count {count}: {e}")))
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn ping(&self, ctx: &Context) -> Result<()> {
        ctx.run(async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            Ok(())
        })
        .await
    }

    async fn get_addr(&self, ctx: &Context, short_code: &str) -> Result<MappingRecord> {
        ctx.run(async {
            let row = sqlx::query(
                r#"
                SELECT short_url, origin_url, user_id, is_deleted
                FROM address
                WHERE short_url = $1
                LIMIT 1
                "#,
            )
            .bind(short_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            let Some(row) = row else {
                trace!(code = %short_code, "short code not found");
                return Err(StorageError::NotFound(short_code.to_string()));
            };
            record_from_row(&row)
        })
        .await
    }

    async fn set(&self, ctx: &Context, record: MappingRecord) -> Result<()> {
        ctx.check()?;
        record.validate()?;

        ctx.run(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

            // Dropping `tx` on the error paths rolls the insert back.
            sqlx::query(
                r#"
                INSERT INTO address (short_url, origin_url, user_id, is_deleted)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(&record.short_code)
            .bind(&record.original_url)
            .bind(&record.user_id)
            .bind(record.deleted)
            .execute(&mut *tx)
            .await
            .map_err(|err| map_write_error(err, &record))?;

            tx.commit().await.map_err(map_sqlx_error)?;
            debug!(code = %record.short_code, url = %record.original_url, "stored record");
            Ok(())
        })
        .await
    }

    async fn update(&self, ctx: &Context, records: Vec<MappingRecord>) -> Result<()> {
        ctx.check()?;
        if records.is_empty() {
            return Ok(());
        }
        for record in &records {
            record.validate()?;
        }

        ctx.run(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

            // The statement is prepared once per connection and reused for every row.
            for record in &records {
                sqlx::query(UPSERT)
                    .bind(&record.short_code)
                    .bind(&record.original_url)
                    .bind(&record.user_id)
                    .bind(record.deleted)
                    .execute(&mut *tx)
                    .await
                    .map_err(|err| map_write_error(err, record))?;
            }

            tx.commit().await.map_err(map_sqlx_error)?;
            debug!(count = records.len(), "upserted records");
            Ok(())
        })
        .await
    }

    async fn get_user_urls(&self, ctx: &Context, user_id: &str) -> Result<Vec<MappingRecord>> {
        ctx.run(async {
            let rows = sqlx::query(
                r#"
                SELECT short_url, origin_url, user_id, is_deleted
                FROM address
                WHERE user_id = $1
                ORDER BY short_url
                "#,
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            rows.iter().map(record_from_row).collect()
        })
        .await
    }

    async fn delete_short(&self, ctx: &Context, short_codes: &[String]) -> Result<()> {
        ctx.check()?;
        if short_codes.is_empty() {
            return Ok(());
        }

        ctx.run(async {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

            let result = sqlx::query(
                r#"
                UPDATE address
                SET is_deleted = TRUE
                WHERE short_url = ANY($1)
                "#,
            )
            .bind(short_codes)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            tx.commit().await.map_err(map_sqlx_error)?;
            debug!(
                requested = short_codes.len(),
                affected = result.rows_affected(),
                "marked records deleted"
            );
            Ok(())
        })
        .await
    }

    async fn stats(&self, ctx: &Context) -> Result<Stats> {
        ctx.run(async {
            let row = sqlx::query(
                r#"
                SELECT COUNT(short_url) AS urls, COUNT(DISTINCT user_id) AS users
                FROM address
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(Stats {
                urls: count_from_row(&row, "urls")?,
                users: count_from_row(&row, "users")?,
            })
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("closed postgres storage");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_defaults_are_small() {
        let settings = PoolSettings::default();
        assert_eq!(settings.max_connections, 3);
        assert_eq!(settings.idle_timeout, Duration::from_secs(180));
        assert_eq!(settings.max_lifetime, Duration::from_secs(180));
    }

    #[test]
    fn pool_errors_map_to_unavailable_kinds() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StorageError::Timeout(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            StorageError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StorageError::InvalidData(_)
        ));
        assert!(map_sqlx_error(sqlx::Error::Protocol("bad".into())).is_transient());
    }

    #[test]
    fn schema_declares_unique_url_index() {
        assert!(SCHEMA.contains("CREATE UNIQUE INDEX IF NOT EXISTS origin_url_idx"));
        assert!(SCHEMA.contains("user_id_idx"));
    }
}
