//! Error types and HTTP error response handling.
//!
//! This module defines every failure the pool and the migration engine can
//! surface, and how they are converted into HTTP responses for the admin API.

use std::path::PathBuf;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Specialized [`Result`] type for pool and migration operations.
pub type DbResult<T, E = DbError> = Result<T, E>;

/// Persistence-layer error type.
///
/// # Error Categories
///
/// - **Configuration**: missing connection fields, detected before connecting
/// - **Pool**: exhausted, closed or unreachable backing database
/// - **Execution**: a query or a migration statement failed
/// - **Migration bookkeeping**: tracker invariant violations, missing rollback scripts
/// - **Authoring**: rejected migration names, filesystem failures
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Required connection settings are missing or inconsistent.
    #[error("Invalid database configuration: {0}")]
    ConfigInvalid(String),

    /// No connection became available before the acquire timeout elapsed.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// The pool has been closed and can no longer hand out connections.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// The database could not be reached or the session broke.
    #[error("Database connection error: {0}")]
    Connection(#[source] sqlx::Error),

    /// A query failed inside the database.
    #[error("Database query error: {0}")]
    Query(#[source] sqlx::Error),

    /// A statement of a migration (or rollback) script failed.
    ///
    /// Statements of the same script that ran before `index` stay committed.
    #[error("Migration {version} ({filename}) failed at statement {index}/{total}: {source}")]
    Statement {
        version: String,
        filename: String,
        /// 1-based position of the failing statement.
        index: usize,
        total: usize,
        #[source]
        source: Box<DbError>,
    },

    /// The tracker already holds a record for this version.
    #[error("Migration version {0} is already recorded")]
    DuplicateVersion(String),

    /// No `<version>_rollback.sql` companion exists.
    #[error("No rollback script found for migration {0}")]
    RollbackUnavailable(String),

    /// A migration name sanitized to an unusable slug.
    #[error("Invalid migration name: {0:?}")]
    InvalidName(String),

    /// The highest existing version has no successor.
    #[error("No migration version follows {0}")]
    VersionExhausted(String),

    /// Reading or writing a migration file failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DbError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns whether a caller may reasonably retry the operation.
    ///
    /// Nothing in this crate retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::PoolExhausted | DbError::Connection(_))
    }

    /// Returns the underlying database error code (SQLSTATE), if any.
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            DbError::Query(sqlx::Error::Database(err)) => err.code().map(|code| code.into_owned()),
            DbError::Statement { source, .. } => source.sqlstate(),
            _ => None,
        }
    }
}

/// Classify a driver error into the pool/query taxonomy.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::PoolClosed,
            sqlx::Error::Configuration(_) => DbError::ConfigInvalid(err.to_string()),
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::WorkerCrashed => {
                DbError::Connection(err)
            }
            other => DbError::Query(other),
        }
    }
}

/// Convert DbError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Pool-level failures map to 503. Everything else is a 500 with details
/// hidden from the client.
impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            DbError::PoolExhausted => (
                StatusCode::SERVICE_UNAVAILABLE,
                "pool_exhausted",
                self.to_string(),
            ),
            DbError::PoolClosed => (
                StatusCode::SERVICE_UNAVAILABLE,
                "pool_closed",
                self.to_string(),
            ),
            DbError::Connection(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "database_unavailable",
                "Database is unreachable".to_string(),
            ),
            DbError::RollbackUnavailable(_) => {
                (StatusCode::NOT_FOUND, "rollback_unavailable", self.to_string())
            }
            _ => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
