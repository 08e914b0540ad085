//! Entry point the rest of an application talks to.

use std::path::PathBuf;

use tokio::sync::OnceCell;

use crate::config::DatabaseConfig;
use crate::db::ConnectionPool;
use crate::error::DbResult;
use crate::migrate::{MigrationEngine, MigrationRepository, PgTracker};
use crate::{TRACING_TARGET_MIGRATION, TRACING_TARGET_POOL};

/// Engine wired to the live pool and tracker table.
pub type PgMigrationEngine = MigrationEngine<ConnectionPool, PgTracker>;

/// Connection pool plus migration engine, initialized once.
///
/// [`Database::initialize`] connects, checks connectivity and applies pending
/// migrations. It runs at most once; concurrent callers wait for the first
/// one and later callers get the same outcome.
pub struct Database {
    pool: ConnectionPool,
    engine: PgMigrationEngine,
    ready: OnceCell<()>,
}

impl Database {
    pub fn new(config: DatabaseConfig, migrations_dir: impl Into<PathBuf>) -> DbResult<Self> {
        let pool = ConnectionPool::new(config)?;
        let tracker = PgTracker::new(pool.clone())?;
        let engine = MigrationEngine::new(
            pool.clone(),
            tracker,
            MigrationRepository::new(migrations_dir),
        );

        Ok(Self {
            pool,
            engine,
            ready: OnceCell::new(),
        })
    }

    /// Connect and bring the schema up to date.
    ///
    /// # Errors
    ///
    /// - `Connection` or `PoolExhausted` if the database does not answer
    /// - any migration error; the database must not be used in that case
    pub async fn initialize(&self) -> DbResult<()> {
        self.ready
            .get_or_try_init(|| async {
                self.pool.initialize().await?;
                self.pool.ping().await.map_err(|err| {
                    tracing::error!(target: TRACING_TARGET_POOL, error = %err, "Connection test failed");
                    err
                })?;
                tracing::info!(target: TRACING_TARGET_POOL, "Database connection verified");

                let report = self.engine.run_pending().await?;
                tracing::info!(
                    target: TRACING_TARGET_MIGRATION,
                    applied = report.applied.len(),
                    "Database migrations complete"
                );

                let status = self.engine.status().await?;
                tracing::info!(
                    target: TRACING_TARGET_MIGRATION,
                    applied = status.applied_count,
                    pending = status.pending_count,
                    status = ?status.status,
                    "Migration status"
                );
                Ok(())
            })
            .await
            .map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.initialized()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn migrations(&self) -> &PgMigrationEngine {
        &self.engine
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;

    fn config() -> DatabaseConfig {
        DatabaseConfig::new("localhost", "app", "postgres", "secret")
    }

    #[test]
    fn rejects_invalid_config() {
        let config = config().with_schema("bad schema");
        assert!(matches!(
            Database::new(config, "migrations"),
            Err(DbError::ConfigInvalid(_))
        ));
    }

    #[tokio::test]
    async fn closed_database_does_not_initialize() {
        let database = Database::new(config(), "migrations").unwrap();
        database.close().await;

        assert!(matches!(
            database.initialize().await,
            Err(DbError::PoolClosed)
        ));
        assert!(!database.is_initialized());
        assert_eq!(
            database.migrations().repository().root(),
            std::path::Path::new("migrations")
        );
    }
}
