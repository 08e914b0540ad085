//! In-memory executor and tracker used by the engine tests.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{DbError, DbResult};
use crate::migrate::{MigrationTracker, StatementExecutor};
use crate::models::{MigrationRecord, NewMigrationRecord};

#[derive(Default)]
struct State {
    executed: Vec<String>,
    records: Vec<MigrationRecord>,
    fail_on: Option<String>,
    table_ready: bool,
    locked: bool,
    lock_count: usize,
}

/// Records executed statements and keeps tracker rows in a `Vec`.
#[derive(Clone, Default)]
pub(crate) struct MemoryDatabase {
    state: Arc<Mutex<State>>,
}

impl MemoryDatabase {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Make every statement containing `fragment` fail.
    pub(crate) fn fail_on(&self, fragment: &str) {
        self.state().fail_on = Some(fragment.to_string());
    }

    pub(crate) fn clear_failure(&self) {
        self.state().fail_on = None;
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    pub(crate) fn versions(&self) -> Vec<String> {
        self.state()
            .records
            .iter()
            .map(|record| record.version.clone())
            .collect()
    }

    pub(crate) fn table_ready(&self) -> bool {
        self.state().table_ready
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.state().locked
    }

    pub(crate) fn lock_count(&self) -> usize {
        self.state().lock_count
    }

    /// Insert a record directly, as if applied by an earlier run.
    pub(crate) fn seed(&self, version: &str, filename: &str, checksum: &str) {
        self.state().records.push(MigrationRecord {
            version: version.to_string(),
            filename: filename.to_string(),
            applied_at: Utc::now(),
            checksum: Some(checksum.to_string()),
            execution_time_ms: Some(0),
        });
    }
}

#[async_trait]
impl StatementExecutor for MemoryDatabase {
    async fn execute(&self, statement: &str) -> DbResult<u64> {
        let mut state = self.state();
        if let Some(fragment) = &state.fail_on {
            if statement.contains(fragment.as_str()) {
                return Err(DbError::Query(sqlx::Error::Protocol(format!(
                    "rejected statement: {statement}"
                ))));
            }
        }
        state.executed.push(statement.to_string());
        Ok(1)
    }
}

#[async_trait]
impl MigrationTracker for MemoryDatabase {
    type Lock = ();

    async fn ensure_table(&self) -> DbResult<()> {
        self.state().table_ready = true;
        Ok(())
    }

    async fn records(&self) -> DbResult<Vec<MigrationRecord>> {
        Ok(self.state().records.clone())
    }

    async fn find(&self, version: &str) -> DbResult<Option<MigrationRecord>> {
        Ok(self
            .state()
            .records
            .iter()
            .find(|record| record.version == version)
            .cloned())
    }

    async fn recent(&self, limit: usize) -> DbResult<Vec<MigrationRecord>> {
        Ok(self
            .state()
            .records
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn record(&self, record: &NewMigrationRecord) -> DbResult<()> {
        let mut state = self.state();
        if state.records.iter().any(|r| r.version == record.version) {
            return Err(DbError::DuplicateVersion(record.version.clone()));
        }
        state.records.push(MigrationRecord {
            version: record.version.clone(),
            filename: record.filename.clone(),
            applied_at: Utc::now(),
            checksum: Some(record.checksum.clone()),
            execution_time_ms: Some(record.execution_time_ms),
        });
        Ok(())
    }

    async fn remove(&self, version: &str) -> DbResult<bool> {
        let mut state = self.state();
        let before = state.records.len();
        state.records.retain(|record| record.version != version);
        Ok(state.records.len() < before)
    }

    async fn lock(&self) -> DbResult<Self::Lock> {
        let mut state = self.state();
        assert!(!state.locked, "migration lock taken twice");
        state.locked = true;
        state.lock_count += 1;
        Ok(())
    }

    async fn unlock(&self, _lock: Self::Lock) -> DbResult<()> {
        self.state().locked = false;
        Ok(())
    }
}
