//! Health check endpoint for service monitoring.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::PoolStatus;
use crate::error::DbError;
use crate::handlers::AppState;

/// Health check response.
///
/// Returns service status, database connectivity and pool usage.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status
    pub status: String,

    /// Database connection status
    pub database: String,

    /// Connection pool usage at the time of the check
    pub pool: PoolStatus,

    /// Share of the pool ceiling currently checked out
    pub utilization: f64,

    /// Current server timestamp
    pub timestamp: DateTime<Utc>,
}

/// Health check handler.
///
/// # Checks
///
/// - Database connectivity (executes simple query through the pool)
///
/// # Response (200 OK)
///
/// ```json
/// {
///   "status": "healthy",
///   "database": "connected",
///   "pool": { "max_size": 20, "size": 2, "idle": 2, "in_use": 0, "closed": false },
///   "utilization": 0.0,
///   "timestamp": "2026-10-14T19:00:00Z"
/// }
/// ```
///
/// # Response (503 Service Unavailable)
///
/// If the database is unreachable or the pool is closed or exhausted.
pub async fn health_check(State(db): State<AppState>) -> Result<Json<HealthResponse>, DbError> {
    db.pool().ping().await?;

    let pool = db.pool().status();
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        database: "connected".to_string(),
        utilization: pool.utilization(),
        pool,
        timestamp: Utc::now(),
    }))
}
