//! PostgreSQL connection pooling and versioned schema migrations.
//!
//! # Overview
//!
//! - [`db`]: bounded connection pool, typed parameters and filters
//! - [`migrate`]: migration discovery, tracking and the apply loop
//! - [`database`]: the facade that connects and migrates before first use
//! - [`handlers`]: admin HTTP endpoints
//!
//! # Startup Flow
//!
//! 1. Load [`DatabaseConfig`] from the environment
//! 2. Create the pool and verify connectivity
//! 3. Apply pending migrations, aborting startup on failure
//! 4. Serve queries through the pool

pub mod config;
pub mod database;
pub mod db;
pub mod error;
pub mod handlers;
pub mod migrate;
pub mod models;

pub use config::{AppConfig, DatabaseConfig};
pub use database::Database;
pub use db::{ConnectionPool, PoolStatus, PooledConnection, QueryOutput};
pub use error::{DbError, DbResult};
pub use migrate::{MigrationEngine, MigrationRepository, PgTracker, RunReport};

/// Tracing target for connection pool events.
pub const TRACING_TARGET_POOL: &str = "pgkeeper::pool";

/// Tracing target for migration events.
pub const TRACING_TARGET_MIGRATION: &str = "pgkeeper::migrations";
