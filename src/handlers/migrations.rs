//! Migration status endpoint.

use axum::{Json, extract::State};

use crate::error::DbError;
use crate::handlers::AppState;
use crate::models::MigrationStatus;

/// `GET /api/v1/migrations`
///
/// Returns the current [`MigrationStatus`] snapshot:
///
/// ```json
/// {
///   "total_migrations": 5,
///   "applied_count": 3,
///   "pending_count": 2,
///   "pending_migrations": ["004", "005"],
///   "recent_migrations": [ ... ],
///   "status": "pending_migrations"
/// }
/// ```
pub async fn migration_status(
    State(db): State<AppState>,
) -> Result<Json<MigrationStatus>, DbError> {
    let status = db.migrations().status().await?;
    Ok(Json(status))
}
