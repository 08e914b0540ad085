//! Migration tracker rows and the derived status snapshot.
//!
//! This module defines:
//! - `MigrationRecord`: a row of the tracker table
//! - `NewMigrationRecord`: the values written when a unit finishes applying
//! - `MigrationStatus`: a read projection over discovered units and records

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Represents one applied migration.
///
/// # Database Table
///
/// Maps to `<schema>.migrations`. A version has at most one row; the row's
/// existence is what marks the version as applied.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct MigrationRecord {
    /// Zero-padded ordinal taken from the filename prefix
    pub version: String,

    /// Script filename at the time it was applied
    pub filename: String,

    pub applied_at: DateTime<Utc>,

    /// SHA-256 of the script content when it was applied
    pub checksum: Option<String>,

    /// Wall-clock time spent executing the script's statements
    pub execution_time_ms: Option<i32>,
}

/// Values recorded once a migration unit has applied successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMigrationRecord {
    pub version: String,
    pub filename: String,
    pub checksum: String,
    pub execution_time_ms: i32,
}

/// Overall classification of a status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    UpToDate,
    PendingMigrations,
}

/// Migration status snapshot.
///
/// Computed on demand, never persisted.
///
/// # JSON Example
///
/// ```json
/// {
///   "total_migrations": 5,
///   "applied_count": 3,
///   "pending_count": 2,
///   "pending_migrations": ["004", "005"],
///   "recent_migrations": [],
///   "status": "pending_migrations"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    /// Units discovered in the migration directory
    pub total_migrations: usize,

    /// Records held by the tracker
    pub applied_count: usize,

    pub pending_count: usize,

    /// Pending versions in application order
    pub pending_migrations: Vec<String>,

    /// Most recent records, newest first
    pub recent_migrations: Vec<MigrationRecord>,

    pub status: SyncState,
}

impl MigrationStatus {
    #[inline]
    pub fn is_up_to_date(&self) -> bool {
        self.status == SyncState::UpToDate
    }

    /// Returns the next version `run_pending` would apply, if any.
    pub fn next_pending_version(&self) -> Option<&str> {
        self.pending_migrations.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_state_in_snake_case() {
        let status = MigrationStatus {
            total_migrations: 2,
            applied_count: 2,
            pending_count: 0,
            pending_migrations: vec![],
            recent_migrations: vec![],
            status: SyncState::UpToDate,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "up_to_date");
        assert!(status.is_up_to_date());
        assert_eq!(status.next_pending_version(), None);

        let json = serde_json::to_value(SyncState::PendingMigrations).unwrap();
        assert_eq!(json, "pending_migrations");
    }
}
