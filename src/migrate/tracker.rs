//! PostgreSQL-backed migration tracker.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::FromRow;

use crate::TRACING_TARGET_MIGRATION;
use crate::db::{ConnectionPool, Filter, Ident, Op, PooledConnection, SqlValue};
use crate::error::{DbError, DbResult};
use crate::migrate::MigrationTracker;
use crate::models::{MigrationRecord, NewMigrationRecord};

/// Name of the tracker table inside the configured schema.
pub const TRACKER_TABLE: &str = "migrations";

/// Tracker table living in the database being migrated.
///
/// The table is `<schema>.migrations`; `version` is unique, so a second
/// insert of the same version fails with `DuplicateVersion`.
#[derive(Clone)]
pub struct PgTracker {
    pool: ConnectionPool,
    schema: Ident,
    table: Ident,
    advisory_lock: bool,
    lock_key: i64,
}

impl PgTracker {
    pub fn new(pool: ConnectionPool) -> DbResult<Self> {
        let config = pool.config();
        let schema = Ident::new(&config.schema)?;
        let table = Ident::qualified(&config.schema, TRACKER_TABLE)?;
        let advisory_lock = config.advisory_lock;
        let lock_key = advisory_key(&config.schema);

        Ok(Self {
            pool,
            schema,
            table,
            advisory_lock,
            lock_key,
        })
    }

    pub fn table(&self) -> &Ident {
        &self.table
    }

    async fn select(&self, filter: Filter) -> DbResult<Vec<MigrationRecord>> {
        let rows = self.pool.select(&self.table, &filter).await?;
        rows.iter()
            .map(|row| MigrationRecord::from_row(row).map_err(DbError::from))
            .collect()
    }
}

/// Session-level advisory lock pinned to one checked-out connection.
///
/// If it is dropped without [`MigrationTracker::unlock`], the connection is
/// detached from the pool and closed, which ends the session and releases
/// the lock on the server.
pub struct AdvisoryLock {
    conn: Option<PooledConnection>,
    key: i64,
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!(
                target: TRACING_TARGET_MIGRATION,
                key = self.key,
                "Migration lock dropped without unlock, closing its connection"
            );
            drop(conn.detach());
        }
    }
}

/// Stable lock key per schema, so runners of different schemas do not contend.
fn advisory_key(schema: &str) -> i64 {
    let digest = Sha256::digest(format!("pgkeeper:migrations:{schema}").as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[async_trait]
impl MigrationTracker for PgTracker {
    type Lock = Option<AdvisoryLock>;

    async fn ensure_table(&self) -> DbResult<()> {
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    version VARCHAR(50) NOT NULL UNIQUE,
                    filename VARCHAR(255) NOT NULL,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    checksum VARCHAR(64),
                    execution_time_ms INTEGER
                )",
                self.table
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_migrations_applied_at ON {} (applied_at)",
                self.table
            ),
        ];

        for statement in &statements {
            self.pool.execute_query(statement, &[], false).await?;
        }

        tracing::debug!(
            target: TRACING_TARGET_MIGRATION,
            table = %self.table,
            "Migration tracking table initialized"
        );
        Ok(())
    }

    async fn records(&self) -> DbResult<Vec<MigrationRecord>> {
        self.select(
            Filter::new()
                .order_by("applied_at", false)?
                .order_by("id", false)?,
        )
        .await
    }

    async fn find(&self, version: &str) -> DbResult<Option<MigrationRecord>> {
        let records = self
            .select(Filter::new().and("version", Op::Eq, version)?)
            .await?;
        Ok(records.into_iter().next())
    }

    async fn recent(&self, limit: usize) -> DbResult<Vec<MigrationRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.select(
            Filter::new()
                .order_by("applied_at", true)?
                .order_by("id", true)?
                .limit(limit),
        )
        .await
    }

    async fn record(&self, record: &NewMigrationRecord) -> DbResult<()> {
        let statement = format!(
            "INSERT INTO {} (version, filename, checksum, execution_time_ms) VALUES ($1, $2, $3, $4)",
            self.table
        );
        let params = [
            SqlValue::from(record.version.as_str()),
            SqlValue::from(record.filename.as_str()),
            SqlValue::from(record.checksum.as_str()),
            SqlValue::from(record.execution_time_ms),
        ];

        match self.pool.execute_query(&statement, &params, false).await {
            Ok(_) => Ok(()),
            Err(DbError::Query(sqlx::Error::Database(err))) if err.is_unique_violation() => {
                Err(DbError::DuplicateVersion(record.version.clone()))
            }
            Err(err) => Err(err),
        }
    }

    async fn remove(&self, version: &str) -> DbResult<bool> {
        let statement = format!("DELETE FROM {} WHERE version = $1", self.table);
        let output = self
            .pool
            .execute_query(&statement, &[SqlValue::from(version)], false)
            .await?;
        Ok(output.rows_affected() > 0)
    }

    async fn lock(&self) -> DbResult<Self::Lock> {
        if !self.advisory_lock {
            return Ok(None);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            tracing::info!(
                target: TRACING_TARGET_MIGRATION,
                key = self.lock_key,
                "Another runner holds the migration lock, waiting"
            );
            sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(self.lock_key)
                .execute(&mut *conn)
                .await?;
        }

        tracing::debug!(target: TRACING_TARGET_MIGRATION, key = self.lock_key, "Migration lock acquired");
        Ok(Some(AdvisoryLock {
            conn: Some(conn),
            key: self.lock_key,
        }))
    }

    async fn unlock(&self, lock: Self::Lock) -> DbResult<()> {
        let Some(mut lock) = lock else {
            return Ok(());
        };
        let Some(mut conn) = lock.conn.take() else {
            return Ok(());
        };

        let result = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(lock.key)
            .execute(&mut *conn)
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(target: TRACING_TARGET_MIGRATION, key = lock.key, "Migration lock released");
                Ok(())
            }
            Err(err) => {
                drop(conn.detach());
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn tracker(schema: &str) -> PgTracker {
        let config =
            DatabaseConfig::new("localhost", "app", "postgres", "secret").with_schema(schema);
        PgTracker::new(ConnectionPool::new(config).unwrap()).unwrap()
    }

    #[test]
    fn table_is_schema_qualified() {
        assert_eq!(tracker("crawl").table().to_string(), "\"crawl\".\"migrations\"");
    }

    #[test]
    fn lock_key_is_stable_per_schema() {
        assert_eq!(advisory_key("a"), advisory_key("a"));
        assert_ne!(advisory_key("a"), advisory_key("b"));
        assert_eq!(tracker("a").lock_key, advisory_key("a"));
    }
}
