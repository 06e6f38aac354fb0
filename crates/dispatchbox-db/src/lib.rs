//! Sole owner of SQL for the outbox dispatcher: batch claim, terminal status
//! writes, DLQ queries, and connection health/reconnect.

use std::time::Duration;

use chrono::Utc;
use dispatchbox_model::Event;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::sync::RwLock;

pub const ENV_DB_URL: &str = "DISPATCHBOX_DATABASE_URL";

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("transient database error: {0}")]
    Transient(#[source] sqlx::Error),
    #[error("database error: {0}")]
    Permanent(#[source] sqlx::Error),
    #[error("malformed row: {0}")]
    Malformed(#[from] dispatchbox_model::ModelError),
}

impl RepoError {
    /// True for connection/IO-shaped failures a caller should treat as "lost
    /// this poll cycle, try again next time" rather than a hard fault.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Transient(_))
    }
}

/// Classify a raw sqlx error: connection/IO errors are transient
/// (reconnect-and-retry); everything else (constraint violations, schema
/// mismatches, permission errors) is permanent.
fn classify(err: sqlx::Error) -> RepoError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RepoError::Transient(err),
        _ => RepoError::Permanent(err),
    }
}

#[derive(Debug, Clone)]
pub struct RepoConfig {
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
    pub max_attempts: i32,
    pub retry_backoff: chrono::Duration,
    pub max_connections: u32,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
            max_attempts: 5,
            retry_backoff: chrono::Duration::seconds(30),
            max_connections: 10,
        }
    }
}

/// Fold `connect_timeout` into the DSN if the caller hasn't already set one,
/// the same way the original Python implementation folds it into the libpq
/// connection string.
fn with_connect_timeout(dsn: &str, connect_timeout_secs: u64) -> String {
    if dsn.contains("connect_timeout") {
        return dsn.to_string();
    }
    let sep = if dsn.contains('?') { '&' } else { '?' };
    format!("{dsn}{sep}connect_timeout={connect_timeout_secs}")
}

/// Owns a database connection pool and all SQL for the `outbox_event` table.
///
/// Every public operation is preceded by a liveness probe; on failure the
/// pool is discarded and re-established once. Each operation runs
/// inside its own transaction with a session-scoped statement timeout.
pub struct Repository {
    pool: RwLock<PgPool>,
    dsn: String,
    config: RepoConfig,
}

impl Repository {
    pub async fn connect(dsn: &str, config: RepoConfig) -> Result<Self, RepoError> {
        if dsn.trim().is_empty() {
            return Err(RepoError::Validation("dsn cannot be empty".to_string()));
        }
        if config.max_attempts < 1 {
            return Err(RepoError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        let dsn_with_timeout = with_connect_timeout(dsn, config.connect_timeout.as_secs());
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&dsn_with_timeout)
            .await
            .map_err(classify)?;

        Ok(Self {
            pool: RwLock::new(pool),
            dsn: dsn.to_string(),
            config,
        })
    }

    pub async fn connect_from_env(config: RepoConfig) -> Result<Self, RepoError> {
        let dsn = std::env::var(ENV_DB_URL)
            .map_err(|_| RepoError::Validation(format!("missing env var {ENV_DB_URL}")))?;
        Self::connect(&dsn, config).await
    }

    /// Run embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), RepoError> {
        let pool = self.pool.read().await.clone();
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| RepoError::Permanent(sqlx::Error::Migrate(Box::new(e))))
    }

    /// Non-throwing connectivity probe.
    pub async fn is_connected(&self) -> bool {
        self.probe().await
    }

    async fn probe(&self) -> bool {
        let pool = self.pool.read().await;
        sqlx::query("SELECT 1").execute(&*pool).await.is_ok()
    }

    /// Pre-flight liveness check + single reconnect attempt, run before every
    /// other public operation.
    async fn ensure_connected(&self) -> Result<(), RepoError> {
        if self.probe().await {
            return Ok(());
        }

        tracing::warn!("database connection lost, attempting to reconnect");
        let dsn_with_timeout = with_connect_timeout(&self.dsn, self.config.connect_timeout.as_secs());
        let new_pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .connect(&dsn_with_timeout)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to reconnect to database");
                classify(e)
            })?;

        *self.pool.write().await = new_pool;
        tracing::info!("database connection restored");
        Ok(())
    }

    async fn begin_with_timeout(&self) -> Result<Transaction<'static, Postgres>, RepoError> {
        let pool = self.pool.read().await.clone();
        let mut tx = pool.begin().await.map_err(classify)?;
        sqlx::query("SET LOCAL statement_timeout = $1")
            .bind(self.config.query_timeout.as_millis() as i64)
            .execute(&mut *tx)
            .await
            .map_err(classify)?;
        Ok(tx)
    }

    /// Atomically claim up to `batch_size` eligible rows.
    ///
    /// Claims release their row lock at commit; the caller is responsible
    /// for closing each claimed row out with `mark_success`/`mark_retry`
    /// before the next poll cycle (see DESIGN.md for the rejected tighter
    /// alternative that holds the lock across dispatch).
    pub async fn fetch_pending(&self, batch_size: i64) -> Result<Vec<Event>, RepoError> {
        if batch_size < 1 {
            return Err(RepoError::Validation(
                "batch_size must be at least 1".to_string(),
            ));
        }
        self.ensure_connected().await?;

        let mut tx = self.begin_with_timeout().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload,
                   status, attempts, next_run_at, created_at
            FROM outbox_event
            WHERE status IN ('pending', 'retry')
              AND next_run_at <= now()
            ORDER BY id ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?;
        tx.commit().await.map_err(classify)?;

        rows.iter().map(Event::from_row).map(|r| r.map_err(RepoError::from)).collect()
    }

    /// Mark a claimed row as successfully dispatched.
    pub async fn mark_success(&self, id: i64) -> Result<(), RepoError> {
        if id < 1 {
            return Err(RepoError::Validation(
                "id must be a positive integer".to_string(),
            ));
        }
        self.ensure_connected().await?;

        let mut tx = self.begin_with_timeout().await?;
        sqlx::query(
            r#"
            UPDATE outbox_event
            SET status = 'done', attempts = attempts + 1
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(())
    }

    /// Mark a claimed row for retry, or dead if attempts are exhausted.
    ///
    /// Both branches are a single conditional UPDATE so the decision is
    /// race-free against any concurrent reader.
    pub async fn mark_retry(&self, id: i64) -> Result<(), RepoError> {
        if id < 1 {
            return Err(RepoError::Validation(
                "id must be a positive integer".to_string(),
            ));
        }
        self.ensure_connected().await?;

        let next_run_at = Utc::now() + self.config.retry_backoff;

        let mut tx = self.begin_with_timeout().await?;
        let row = sqlx::query(
            r#"
            UPDATE outbox_event
            SET status = CASE WHEN attempts + 1 >= $1 THEN 'dead' ELSE 'retry' END,
                attempts = attempts + 1,
                next_run_at = CASE WHEN attempts + 1 >= $1 THEN next_run_at ELSE $2 END
            WHERE id = $3
            RETURNING status
            "#,
        )
        .bind(self.config.max_attempts)
        .bind(next_run_at)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;
        tx.commit().await.map_err(classify)?;

        if let Some(row) = row {
            let status: String = row.try_get("status").map_err(classify)?;
            if status == "dead" {
                tracing::warn!(event_id = id, max_attempts = self.config.max_attempts, "event exceeded max_attempts, marked as dead");
            }
        }
        Ok(())
    }

    /// List dead-lettered rows, newest first, with optional equality filters.
    pub async fn fetch_dead(
        &self,
        limit: i64,
        offset: i64,
        aggregate_type: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<Vec<Event>, RepoError> {
        if limit < 1 {
            return Err(RepoError::Validation("limit must be at least 1".to_string()));
        }
        if offset < 0 {
            return Err(RepoError::Validation("offset must be non-negative".to_string()));
        }
        self.ensure_connected().await?;

        let mut tx = self.begin_with_timeout().await?;
        let mut qb = sqlx::QueryBuilder::<Postgres>::new(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload,
                   status, attempts, next_run_at, created_at
            FROM outbox_event
            WHERE status = 'dead'
            "#,
        );
        if let Some(at) = aggregate_type {
            qb.push(" AND aggregate_type = ").push_bind(at);
        }
        if let Some(et) = event_type {
            qb.push(" AND event_type = ").push_bind(et);
        }
        qb.push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build().fetch_all(&mut *tx).await.map_err(classify)?;
        tx.commit().await.map_err(classify)?;

        rows.iter().map(Event::from_row).map(|r| r.map_err(RepoError::from)).collect()
    }

    pub async fn count_dead(
        &self,
        aggregate_type: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<i64, RepoError> {
        self.ensure_connected().await?;

        let mut tx = self.begin_with_timeout().await?;
        let mut qb = sqlx::QueryBuilder::<Postgres>::new(
            "SELECT count(*)::bigint AS n FROM outbox_event WHERE status = 'dead'",
        );
        if let Some(at) = aggregate_type {
            qb.push(" AND aggregate_type = ").push_bind(at);
        }
        if let Some(et) = event_type {
            qb.push(" AND event_type = ").push_bind(et);
        }

        let row = qb.build().fetch_one(&mut *tx).await.map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        row.try_get::<i64, _>("n").map_err(classify)
    }

    /// Fetch a single dead event by id; `None` if it doesn't exist or isn't
    /// currently `dead`.
    pub async fn get_dead(&self, id: i64) -> Result<Option<Event>, RepoError> {
        if id < 1 {
            return Err(RepoError::Validation(
                "id must be a positive integer".to_string(),
            ));
        }
        self.ensure_connected().await?;

        let mut tx = self.begin_with_timeout().await?;
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_type, aggregate_id, event_type, payload,
                   status, attempts, next_run_at, created_at
            FROM outbox_event
            WHERE id = $1 AND status = 'dead'
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;
        tx.commit().await.map_err(classify)?;

        row.as_ref().map(Event::from_row).transpose().map_err(RepoError::from)
    }

    /// Reset one dead event to pending. Returns `false` (no-op) unless the
    /// row is currently `dead`.
    pub async fn retry_dead(&self, id: i64) -> Result<bool, RepoError> {
        if id < 1 {
            return Err(RepoError::Validation(
                "id must be a positive integer".to_string(),
            ));
        }
        self.ensure_connected().await?;

        let mut tx = self.begin_with_timeout().await?;
        let row = sqlx::query(
            r#"
            UPDATE outbox_event
            SET status = 'pending', attempts = 0, next_run_at = now()
            WHERE id = $1 AND status = 'dead'
            RETURNING id
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(row.is_some())
    }

    /// Reset a batch of dead events to pending in one statement. Ids that
    /// don't exist or aren't dead are silently skipped; returns the count
    /// actually affected.
    pub async fn retry_dead_batch(&self, ids: &[i64]) -> Result<i64, RepoError> {
        if ids.is_empty() {
            return Err(RepoError::Validation(
                "ids must be a non-empty list".to_string(),
            ));
        }
        if ids.iter().any(|id| *id < 1) {
            return Err(RepoError::Validation(
                "ids must all be positive integers".to_string(),
            ));
        }
        self.ensure_connected().await?;

        let mut tx = self.begin_with_timeout().await?;
        let rows = sqlx::query(
            r#"
            UPDATE outbox_event
            SET status = 'pending', attempts = 0, next_run_at = now()
            WHERE id = ANY($1) AND status = 'dead'
            RETURNING id
            "#,
        )
        .bind(ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(classify)?;
        tx.commit().await.map_err(classify)?;
        Ok(rows.len() as i64)
    }
}
