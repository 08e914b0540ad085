//! Data models representing database entities.
//!
//! This module contains the data structures that map to tracker rows, plus
//! the status projection built from them.

/// Migration tracker models
pub mod migration;

pub use migration::{MigrationRecord, MigrationStatus, NewMigrationRecord, SyncState};
