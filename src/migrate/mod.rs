//! Versioned schema migrations.
//!
//! Script discovery and authoring live in [`repository`], the apply loop in
//! [`engine`], and the PostgreSQL tracker table in [`tracker`]. The engine
//! only talks to the database through the traits in [`backend`].

pub mod backend;
pub mod engine;
pub mod repository;
pub mod tracker;
pub mod unit;

#[cfg(test)]
mod memory;

pub use backend::{MigrationTracker, StatementExecutor};
pub use engine::{
    AppliedMigration, ChecksumMismatch, DEFAULT_RECENT_LIMIT, MigrationEngine, RunReport,
};
pub use repository::{MigrationRepository, RollbackScript};
pub use tracker::{AdvisoryLock, PgTracker, TRACKER_TABLE};
pub use unit::{MigrationUnit, checksum, parse_filename, split_statements};
