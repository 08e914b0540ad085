use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres};
use tokio::sync::OnceCell;

use crate::TRACING_TARGET_POOL;
use crate::config::DatabaseConfig;
use crate::db::filter::{Filter, Ident};
use crate::db::params::{SqlValue, bind_all};
use crate::error::{DbError, DbResult};
use crate::migrate::StatementExecutor;

/// A connection checked out of the pool.
///
/// Dropping it hands the connection back, whichever way the holder exits.
pub type PooledConnection = PoolConnection<Postgres>;

/// Result of [`ConnectionPool::execute_query`].
#[derive(Debug)]
pub enum QueryOutput {
    /// Rows returned by the statement (`fetch = true`).
    Rows(Vec<PgRow>),
    /// Number of rows the statement touched (`fetch = false`).
    Affected(u64),
}

impl QueryOutput {
    pub fn rows_affected(&self) -> u64 {
        match self {
            QueryOutput::Rows(rows) => rows.len() as u64,
            QueryOutput::Affected(count) => *count,
        }
    }

    pub fn into_rows(self) -> Vec<PgRow> {
        match self {
            QueryOutput::Rows(rows) => rows,
            QueryOutput::Affected(_) => Vec::new(),
        }
    }
}

/// Connection pool status information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Configured ceiling of open connections
    pub max_size: u32,
    /// Connections currently open
    pub size: u32,
    /// Open connections not checked out
    pub idle: u32,
    /// Connections currently checked out
    pub in_use: u32,
    /// Set once [`ConnectionPool::close`] has run
    pub closed: bool,
}

impl PoolStatus {
    /// Returns the share of the ceiling currently checked out (0.0 to 1.0).
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            f64::from(self.in_use) / f64::from(self.max_size)
        }
    }
}

/// Bounded pool of PostgreSQL connections.
///
/// The handle is cheap to clone; clones share the same pool. The underlying
/// `PgPool` is built on first use (or by [`ConnectionPool::initialize`]) and
/// closed exactly once by [`ConnectionPool::close`].
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: DatabaseConfig,
    pool: OnceCell<PgPool>,
    closed: AtomicBool,
}

impl ConnectionPool {
    /// Creates a pool handle without connecting.
    ///
    /// # Errors
    ///
    /// Returns `ConfigInvalid` if the configuration misses required fields.
    pub fn new(config: DatabaseConfig) -> DbResult<Self> {
        config.validate()?;

        tracing::debug!(
            target: TRACING_TARGET_POOL,
            url = %config.masked_connection_string(),
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "Created connection pool handle"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                pool: OnceCell::new(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Establish the pool. Calling it again is a no-op.
    pub async fn initialize(&self) -> DbResult<()> {
        self.pool().await.map(|_| ())
    }

    async fn pool(&self) -> DbResult<&PgPool> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DbError::PoolClosed);
        }
        let pool = self
            .inner
            .pool
            .get_or_try_init(|| connect(&self.inner.config))
            .await?;

        // `close` may have run while the pool was being built.
        if self.inner.closed.load(Ordering::SeqCst) {
            pool.close().await;
            return Err(DbError::PoolClosed);
        }
        Ok(pool)
    }

    /// Check out one connection.
    ///
    /// Waits up to the configured acquire timeout when every connection is in
    /// use, then fails with `PoolExhausted`.
    pub async fn acquire(&self) -> DbResult<PooledConnection> {
        let pool = self.pool().await?;
        pool.acquire().await.map_err(|err| {
            tracing::warn!(target: TRACING_TARGET_POOL, error = %err, "Failed to acquire connection");
            DbError::from(err)
        })
    }

    /// Run one statement in its own transaction.
    ///
    /// Commits on success. On failure the transaction is dropped, which rolls
    /// it back, and the error is returned.
    pub async fn execute_query(
        &self,
        statement: &str,
        params: &[SqlValue],
        fetch: bool,
    ) -> DbResult<QueryOutput> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let query = bind_all(sqlx::query(statement), params);
        let output = if fetch {
            QueryOutput::Rows(query.fetch_all(&mut *tx).await?)
        } else {
            QueryOutput::Affected(query.execute(&mut *tx).await?.rows_affected())
        };

        tx.commit().await?;

        tracing::trace!(
            target: TRACING_TARGET_POOL,
            params = params.len(),
            rows = output.rows_affected(),
            "Query executed"
        );
        Ok(output)
    }

    /// Run the same statement once per parameter set, all in one transaction.
    pub async fn execute_many(
        &self,
        statement: &str,
        params_list: &[Vec<SqlValue>],
    ) -> DbResult<u64> {
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        let mut affected = 0;
        for params in params_list {
            affected += bind_all(sqlx::query(statement), params)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(affected)
    }

    /// `SELECT *` from `relation`, constrained by `filter`.
    pub async fn select(&self, relation: &Ident, filter: &Filter) -> DbResult<Vec<PgRow>> {
        let (statement, params) = filter.select_from(relation);
        Ok(self.execute_query(&statement, &params, true).await?.into_rows())
    }

    pub async fn ping(&self) -> DbResult<()> {
        let pool = self.pool().await?;
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    /// Returns whether the database answers a trivial query.
    pub async fn test_connection(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(target: TRACING_TARGET_POOL, error = %err, "Connection test failed");
                false
            }
        }
    }

    /// Close every connection. Later operations fail with `PoolClosed`.
    ///
    /// A pool still being built when this runs is closed by the call that
    /// builds it, which then fails with `PoolClosed`.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pool) = self.inner.pool.get() {
            pool.close().await;
        }
        tracing::info!(target: TRACING_TARGET_POOL, "PostgreSQL connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn status(&self) -> PoolStatus {
        let max_size = self.inner.config.max_connections;
        let closed = self.is_closed();
        match self.inner.pool.get() {
            Some(pool) => {
                let size = pool.size();
                let idle = u32::try_from(pool.num_idle()).unwrap_or(size);
                PoolStatus {
                    max_size,
                    size,
                    idle,
                    in_use: size.saturating_sub(idle),
                    closed: closed || pool.is_closed(),
                }
            }
            None => PoolStatus {
                max_size,
                size: 0,
                idle: 0,
                in_use: 0,
                closed,
            },
        }
    }
}

async fn connect(config: &DatabaseConfig) -> DbResult<PgPool> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.username)
        .password(&config.password)
        .application_name("pgkeeper")
        .options([("search_path", format!("{},public", config.schema))]);

    let pool = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .connect_with(options)
        .await
        .map_err(|err| {
            tracing::error!(
                target: TRACING_TARGET_POOL,
                url = %config.masked_connection_string(),
                error = %err,
                "Failed to initialize PostgreSQL pool"
            );
            match err {
                sqlx::Error::Configuration(_) => DbError::ConfigInvalid(err.to_string()),
                other => DbError::Connection(other),
            }
        })?;

    tracing::info!(
        target: TRACING_TARGET_POOL,
        url = %config.masked_connection_string(),
        min_connections = config.min_connections,
        max_connections = config.max_connections,
        "PostgreSQL connection pool initialized"
    );
    Ok(pool)
}

/// Migration statements go through the simple query protocol on a scoped
/// checkout; autocommit makes each one its own commit unit.
#[async_trait]
impl StatementExecutor for ConnectionPool {
    async fn execute(&self, statement: &str) -> DbResult<u64> {
        let mut conn = self.acquire().await?;
        let result = sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(statement)).await?;
        Ok(result.rows_affected())
    }
}
