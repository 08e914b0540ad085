//! Seams between the migration engine and the database.

use async_trait::async_trait;

use crate::error::DbResult;
use crate::models::{MigrationRecord, NewMigrationRecord};

/// Runs one migration statement as its own commit unit.
#[async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Returns the number of rows the statement touched.
    async fn execute(&self, statement: &str) -> DbResult<u64>;
}

/// Persistent record of applied migration versions.
#[async_trait]
pub trait MigrationTracker: Send + Sync {
    /// Held for the duration of a run; see [`MigrationTracker::lock`].
    type Lock: Send;

    /// Create the tracker table if it does not exist yet.
    async fn ensure_table(&self) -> DbResult<()>;

    /// Every record, oldest `applied_at` first.
    async fn records(&self) -> DbResult<Vec<MigrationRecord>>;

    /// Applied versions, oldest `applied_at` first.
    async fn applied_versions(&self) -> DbResult<Vec<String>> {
        Ok(self
            .records()
            .await?
            .into_iter()
            .map(|record| record.version)
            .collect())
    }

    async fn find(&self, version: &str) -> DbResult<Option<MigrationRecord>>;

    /// The `limit` most recent records, newest first.
    async fn recent(&self, limit: usize) -> DbResult<Vec<MigrationRecord>>;

    /// Insert the record of a freshly applied unit.
    ///
    /// Fails with `DuplicateVersion` if the version is already recorded.
    async fn record(&self, record: &NewMigrationRecord) -> DbResult<()>;

    /// Delete the record of `version`. Returns whether one existed.
    async fn remove(&self, version: &str) -> DbResult<bool>;

    /// Exclude other runners until [`MigrationTracker::unlock`].
    async fn lock(&self) -> DbResult<Self::Lock>;

    async fn unlock(&self, lock: Self::Lock) -> DbResult<()>;
}
