//! The apply loop over discovered units, plus rollback and status.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::TRACING_TARGET_MIGRATION;
use crate::error::{DbError, DbResult};
use crate::migrate::repository::{MigrationRepository, RollbackScript};
use crate::migrate::unit::{MigrationUnit, split_statements};
use crate::migrate::{MigrationTracker, StatementExecutor};
use crate::models::{MigrationRecord, MigrationStatus, NewMigrationRecord, SyncState};

/// Number of records listed in a status snapshot.
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// A unit applied by [`MigrationEngine::run_pending`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: String,
    pub filename: String,
    pub checksum: String,
    pub statements: usize,
    pub execution_time_ms: i32,
}

/// Outcome of a successful [`MigrationEngine::run_pending`].
///
/// A failed run returns an error instead, so a report always means every
/// pending unit applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Units found in the migration directory
    pub discovered: usize,
    /// Units applied by earlier runs
    pub already_applied: usize,
    /// Units applied by this run, in application order
    pub applied: Vec<AppliedMigration>,
    pub duration: Duration,
}

impl RunReport {
    /// Returns whether the run had nothing to do.
    #[inline]
    pub fn is_no_op(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn applied_versions(&self) -> Vec<&str> {
        self.applied.iter().map(|m| m.version.as_str()).collect()
    }
}

/// An applied unit whose file no longer matches the recorded checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumMismatch {
    pub version: String,
    pub filename: String,
    pub recorded: String,
    pub current: String,
}

/// Applies pending migration units in version order and keeps the tracker
/// in step.
///
/// Units are applied strictly one after another: a later unit may depend on
/// the schema an earlier one leaves behind. Each statement commits on its
/// own, so a unit failing halfway leaves its earlier statements applied and
/// no tracker record; rerunning executes the unit from its first statement.
pub struct MigrationEngine<E, T> {
    executor: E,
    tracker: T,
    repository: MigrationRepository,
    recent_limit: usize,
}

impl<E, T> MigrationEngine<E, T>
where
    E: StatementExecutor,
    T: MigrationTracker,
{
    pub fn new(executor: E, tracker: T, repository: MigrationRepository) -> Self {
        Self {
            executor,
            tracker,
            repository,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }

    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    pub fn repository(&self) -> &MigrationRepository {
        &self.repository
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// Apply every discovered unit that has no tracker record.
    ///
    /// Running it on a fully migrated database is a no-op.
    ///
    /// # Errors
    ///
    /// The first failure aborts the run. A failing statement is reported as
    /// `Statement`, naming the unit and the statement index.
    pub async fn run_pending(&self) -> DbResult<RunReport> {
        let lock = self.tracker.lock().await?;
        let result = self.run_locked().await;
        let unlocked = self.tracker.unlock(lock).await;
        finish(result, unlocked)
    }

    async fn run_locked(&self) -> DbResult<RunReport> {
        let started = Instant::now();

        self.tracker.ensure_table().await?;

        let records = self.tracker.records().await?;
        tracing::info!(
            target: TRACING_TARGET_MIGRATION,
            count = records.len(),
            "Found applied migrations"
        );

        let units = self.repository.discover()?;
        tracing::info!(
            target: TRACING_TARGET_MIGRATION,
            count = units.len(),
            root = %self.repository.root().display(),
            "Found migration files"
        );

        let mut report = RunReport {
            discovered: units.len(),
            already_applied: records.len(),
            ..RunReport::default()
        };

        if units.is_empty() {
            tracing::warn!(target: TRACING_TARGET_MIGRATION, "No migration files found");
            report.duration = started.elapsed();
            return Ok(report);
        }

        for mismatch in checksum_mismatches(&units, &records) {
            tracing::warn!(
                target: TRACING_TARGET_MIGRATION,
                version = %mismatch.version,
                filename = %mismatch.filename,
                "Applied migration changed on disk since it was recorded"
            );
        }

        let applied: HashSet<&str> = records.iter().map(|r| r.version.as_str()).collect();
        let pending: Vec<&MigrationUnit> = units
            .iter()
            .filter(|unit| !applied.contains(unit.version.as_str()))
            .collect();

        if pending.is_empty() {
            tracing::info!(target: TRACING_TARGET_MIGRATION, "No pending migrations");
            report.duration = started.elapsed();
            return Ok(report);
        }

        tracing::info!(
            target: TRACING_TARGET_MIGRATION,
            count = pending.len(),
            "Running pending migrations"
        );

        for unit in pending {
            let applied = self.apply(unit).await?;
            report.applied.push(applied);
        }

        report.duration = started.elapsed();
        tracing::info!(
            target: TRACING_TARGET_MIGRATION,
            applied = report.applied.len(),
            elapsed_ms = millis(report.duration),
            "All migrations completed successfully"
        );
        Ok(report)
    }

    async fn apply(&self, unit: &MigrationUnit) -> DbResult<AppliedMigration> {
        let started = Instant::now();
        let statements = unit.statements();

        tracing::info!(
            target: TRACING_TARGET_MIGRATION,
            version = %unit.version,
            filename = %unit.filename,
            statements = statements.len(),
            "Executing migration"
        );

        self.execute_script(&unit.version, &unit.filename, &statements)
            .await?;

        let execution_time_ms = i32::try_from(millis(started.elapsed())).unwrap_or(i32::MAX);
        self.tracker
            .record(&NewMigrationRecord {
                version: unit.version.clone(),
                filename: unit.filename.clone(),
                checksum: unit.checksum.clone(),
                execution_time_ms,
            })
            .await?;

        tracing::info!(
            target: TRACING_TARGET_MIGRATION,
            version = %unit.version,
            elapsed_ms = execution_time_ms,
            "Migration completed"
        );

        Ok(AppliedMigration {
            version: unit.version.clone(),
            filename: unit.filename.clone(),
            checksum: unit.checksum.clone(),
            statements: statements.len(),
            execution_time_ms,
        })
    }

    async fn execute_script(
        &self,
        version: &str,
        filename: &str,
        statements: &[String],
    ) -> DbResult<()> {
        let started = Instant::now();
        let total = statements.len();

        for (i, statement) in statements.iter().enumerate() {
            let index = i + 1;
            if let Err(err) = self.executor.execute(statement).await {
                tracing::error!(
                    target: TRACING_TARGET_MIGRATION,
                    version,
                    filename,
                    statement = index,
                    total,
                    elapsed_ms = millis(started.elapsed()),
                    error = %err,
                    "Migration statement failed"
                );
                return Err(DbError::Statement {
                    version: version.to_string(),
                    filename: filename.to_string(),
                    index,
                    total,
                    source: Box::new(err),
                });
            }
            tracing::debug!(
                target: TRACING_TARGET_MIGRATION,
                version,
                statement = index,
                total,
                "Statement executed"
            );
        }
        Ok(())
    }

    /// Run the companion rollback script of `version`, then drop its record.
    ///
    /// Returns whether a tracker record was removed. The script is trusted;
    /// nothing checks that it actually undoes the forward migration.
    ///
    /// # Errors
    ///
    /// `RollbackUnavailable` if there is no `<version>_rollback.sql`; nothing
    /// is executed in that case.
    pub async fn rollback(&self, version: &str) -> DbResult<bool> {
        let Some(script) = self.repository.rollback_script(version)? else {
            tracing::error!(
                target: TRACING_TARGET_MIGRATION,
                version,
                "Rollback file not found"
            );
            return Err(DbError::RollbackUnavailable(version.to_string()));
        };

        let lock = self.tracker.lock().await?;
        let result = self.rollback_locked(&script).await;
        let unlocked = self.tracker.unlock(lock).await;
        finish(result, unlocked)
    }

    async fn rollback_locked(&self, script: &RollbackScript) -> DbResult<bool> {
        self.tracker.ensure_table().await?;

        let filename = script
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(
            target: TRACING_TARGET_MIGRATION,
            version = %script.version,
            %filename,
            "Rolling back migration"
        );

        let statements = split_statements(&script.content);
        self.execute_script(&script.version, &filename, &statements)
            .await?;

        let removed = self.tracker.remove(&script.version).await?;
        if removed {
            tracing::info!(
                target: TRACING_TARGET_MIGRATION,
                version = %script.version,
                "Migration rolled back successfully"
            );
        } else {
            tracing::warn!(
                target: TRACING_TARGET_MIGRATION,
                version = %script.version,
                "Rollback script ran but the version had no tracker record"
            );
        }
        Ok(removed)
    }

    /// Compute the current status snapshot.
    pub async fn status(&self) -> DbResult<MigrationStatus> {
        self.tracker.ensure_table().await?;

        let applied = self.tracker.applied_versions().await?;
        let units = self.repository.discover()?;

        let applied_set: HashSet<&str> = applied.iter().map(String::as_str).collect();
        let pending_migrations: Vec<String> = units
            .iter()
            .filter(|unit| !applied_set.contains(unit.version.as_str()))
            .map(|unit| unit.version.clone())
            .collect();

        let recent_migrations = self.tracker.recent(self.recent_limit).await?;
        let status = if pending_migrations.is_empty() {
            SyncState::UpToDate
        } else {
            SyncState::PendingMigrations
        };

        Ok(MigrationStatus {
            total_migrations: units.len(),
            applied_count: applied.len(),
            pending_count: pending_migrations.len(),
            pending_migrations,
            recent_migrations,
            status,
        })
    }

    /// List applied units whose file content changed since they were recorded.
    pub async fn verify(&self) -> DbResult<Vec<ChecksumMismatch>> {
        self.tracker.ensure_table().await?;
        let records = self.tracker.records().await?;
        let units = self.repository.discover()?;
        Ok(checksum_mismatches(&units, &records))
    }

    /// Author a new migration unit with the next free version.
    pub fn create(&self, name: &str, content: &str) -> DbResult<MigrationUnit> {
        self.repository.create(name, content)
    }
}

/// Prefer the run's own error over a failure to unlock.
fn finish<R>(result: DbResult<R>, unlocked: DbResult<()>) -> DbResult<R> {
    match (result, unlocked) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(unlock_err)) => {
            tracing::warn!(
                target: TRACING_TARGET_MIGRATION,
                error = %unlock_err,
                "Failed to release migration lock"
            );
            Err(err)
        }
    }
}

fn checksum_mismatches(
    units: &[MigrationUnit],
    records: &[MigrationRecord],
) -> Vec<ChecksumMismatch> {
    let by_version: HashMap<&str, &MigrationUnit> = units
        .iter()
        .map(|unit| (unit.version.as_str(), unit))
        .collect();

    records
        .iter()
        .filter_map(|record| {
            let recorded = record.checksum.as_deref()?;
            let unit = by_version.get(record.version.as_str())?;
            (unit.checksum != recorded).then(|| ChecksumMismatch {
                version: record.version.clone(),
                filename: unit.filename.clone(),
                recorded: recorded.to_string(),
                current: unit.checksum.clone(),
            })
        })
        .collect()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
