use crate::placement::MAX_GENERATION_ATTEMPTS;
use async_trait::async_trait;
use snip_core::error::Result;
use snip_core::{
    DeleteTarget, Entry, EntryStore, NewEntry, PostOutcome, ShortCode, Stat, StoreError,
};
use snip_generator::{AlphaGenerator, Generator};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Connection, PgConnection, PgPool, Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info};

/// Table definition applied by [`PostgresStore::migrate`].
pub const SCHEMA: &str = include_str!("../ddl/postgres/urls.sql");

const SHORT_CODE_CONSTRAINT: &str = "urls_short_url_key";
const CONFLICT_STATUS: &str = "conflict";

/// `(short_url, user_id)` pairs per UPDATE, keeping binds well under the
/// protocol limit of 65535 parameters.
const DELETE_CHUNK_SIZE: usize = 1000;

/// PostgreSQL implementation of the store contract.
///
/// Dedup rides on `UNIQUE (original_url, user_id)`: `post` is a single
/// upsert whose `status` column comes back as `'conflict'` when the row
/// already existed. Short codes are globally unique through
/// `UNIQUE (short_url)`; a generated code hitting that constraint is rolled
/// back to its savepoint and redrawn, so an enclosing batch transaction
/// survives the collision.
#[derive(Debug)]
pub struct PostgresStore<G = AlphaGenerator> {
    pool: PgPool,
    generator: G,
}

impl PostgresStore<AlphaGenerator> {
    /// Opens a pool against `database_url` and applies the schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;
        let store = Self::new(pool);
        store.migrate().await?;
        info!("connected to postgres store");
        Ok(store)
    }

    /// Creates a store from an existing pool. The schema is not touched.
    pub fn new(pool: PgPool) -> Self {
        Self::with_generator(pool, AlphaGenerator::new())
    }
}

impl<G: Generator> PostgresStore<G> {
    /// Creates a store from an existing pool, drawing codes from `generator`.
    pub fn with_generator(pool: PgPool, generator: G) -> Self {
        Self { pool, generator }
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the `urls` table, its sequence and indexes if missing.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Posts one entry on `conn`, each attempt inside its own transaction
    /// (a savepoint when `conn` is already in one).
    async fn post_on(&self, conn: &mut PgConnection, new: NewEntry) -> Result<PostOutcome> {
        let requested = new.short_code.clone();
        let mut last = None;

        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let code = match &requested {
                Some(code) => code.clone(),
                None => self.generator.generate(),
            };

            let mut attempt_tx = conn.begin().await.map_err(map_sqlx_error)?;
            match upsert(&mut attempt_tx, &new, &code).await {
                Ok(outcome) => {
                    attempt_tx.commit().await.map_err(map_sqlx_error)?;
                    return Ok(outcome);
                }
                Err(err) if is_short_code_violation(&err) => {
                    attempt_tx.rollback().await.map_err(map_sqlx_error)?;
                    if requested.is_some() {
                        return Err(StoreError::ShortCodeTaken(code.into_inner()));
                    }
                    debug!(code = %code, attempt, "generated short code collides, retrying");
                    last = Some(code);
                }
                Err(err) => return Err(map_sqlx_error(err)),
            }
        }

        Err(StoreError::ShortCodeTaken(
            last.map(ShortCode::into_inner).unwrap_or_default(),
        ))
    }
}

async fn upsert(
    conn: &mut PgConnection,
    new: &NewEntry,
    code: &ShortCode,
) -> std::result::Result<PostOutcome, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO urls (correlation_id, short_url, original_url, user_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (original_url, user_id) DO UPDATE SET status = 'conflict'
        RETURNING uuid, correlation_id, short_url, original_url, user_id, is_deleted, status
        "#,
    )
    .bind(&new.correlation_id)
    .bind(code.as_str())
    .bind(&new.original_url)
    .bind(&new.user_id)
    .fetch_one(&mut *conn)
    .await?;

    let status: String = row.try_get("status")?;
    let entry = entry_from_row(&row)?;
    if status.trim().eq_ignore_ascii_case(CONFLICT_STATUS) {
        Ok(PostOutcome::duplicate(entry))
    } else {
        Ok(PostOutcome::created(entry))
    }
}

fn entry_from_row(row: &PgRow) -> std::result::Result<Entry, sqlx::Error> {
    let short_url: String = row.try_get("short_url")?;
    Ok(Entry {
        id: row.try_get("uuid")?,
        correlation_id: row.try_get("correlation_id")?,
        short_code: ShortCode::new_unchecked(short_url.trim()),
        original_url: row.try_get("original_url")?,
        user_id: row.try_get("user_id")?,
        deleted: row.try_get("is_deleted")?,
    })
}

fn is_short_code_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|db| {
        db.is_unique_violation() && db.constraint() == Some(SHORT_CODE_CONSTRAINT)
    })
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolClosed => StoreError::Closed,
        sqlx::Error::PoolTimedOut => StoreError::Timeout(message),
        sqlx::Error::WorkerCrashed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(message)
        }
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StoreError::InvalidData(message),
        _ => StoreError::Query(message),
    }
}

#[async_trait]
impl<G: Generator> EntryStore for PostgresStore<G> {
    async fn get(&self, code: &ShortCode) -> Result<Option<Entry>> {
        let row = sqlx::query(
            r#"
            SELECT uuid, correlation_id, short_url, original_url, user_id, is_deleted
            FROM urls
            WHERE short_url = $1
            LIMIT 1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref()
            .map(entry_from_row)
            .transpose()
            .map_err(map_sqlx_error)
    }

    async fn find_by_original_url(
        &self,
        original_url: &str,
        user_id: &str,
    ) -> Result<Option<Entry>> {
        let row = sqlx::query(
            r#"
            SELECT uuid, correlation_id, short_url, original_url, user_id, is_deleted
            FROM urls
            WHERE original_url = $1
              AND user_id = $2
            LIMIT 1
            "#,
        )
        .bind(original_url)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref()
            .map(entry_from_row)
            .transpose()
            .map_err(map_sqlx_error)
    }

    async fn post(&self, entry: NewEntry) -> Result<PostOutcome> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        self.post_on(&mut conn, entry).await
    }

    async fn post_batch(&self, batch: Vec<NewEntry>) -> Result<Vec<PostOutcome>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut outcomes = Vec::with_capacity(batch.len());

        for (index, new) in batch.into_iter().enumerate() {
            match self.post_on(&mut tx, new).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    tx.rollback().await.map_err(map_sqlx_error)?;
                    debug!(index, error = %err, "batch rolled back");
                    return Err(StoreError::batch(index, err));
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(outcomes)
    }

    async fn get_user_urls(&self, user_id: &str) -> Result<Vec<Entry>> {
        let rows = sqlx::query(
            r#"
            SELECT uuid, correlation_id, short_url, original_url, user_id, is_deleted
            FROM urls
            WHERE user_id = $1
              AND NOT is_deleted
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(entry_from_row)
            .collect::<std::result::Result<_, _>>()
            .map_err(map_sqlx_error)
    }

    async fn delete_user_urls(&self, targets: &[DeleteTarget]) -> Result<()> {
        if targets.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let mut affected = 0u64;

        for chunk in targets.chunks(DELETE_CHUNK_SIZE) {
            let mut query = QueryBuilder::<Postgres>::new("UPDATE urls SET is_deleted = TRUE FROM (");
            query.push_values(chunk, |mut row, target| {
                row.push_bind(target.short_code.to_string())
                    .push_bind(target.user_id.clone());
            });
            query.push(
                ") AS d(short_url, user_id) \
                 WHERE urls.short_url = d.short_url \
                   AND urls.user_id = d.user_id \
                   AND NOT urls.is_deleted",
            );

            let result = query
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            affected += result.rows_affected();
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(requested = targets.len(), deleted = affected, "marked entries deleted");
        Ok(())
    }

    async fn get_stat(&self) -> Result<Stat> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS urls, COUNT(DISTINCT user_id) AS users
            FROM urls
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let urls: i64 = row.try_get("urls").map_err(map_sqlx_error)?;
        let users: i64 = row.try_get("users").map_err(map_sqlx_error)?;
        Ok(Stat {
            urls: urls.max(0) as u64,
            users: users.max(0) as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        conn.ping().await.map_err(map_sqlx_error)
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        info!("closed postgres store");
        Ok(())
    }
}
