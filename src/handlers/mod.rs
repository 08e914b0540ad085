//! Admin HTTP handlers.
//!
//! Each handler receives the shared [`Database`] through axum state and
//! returns JSON, or a [`DbError`](crate::error::DbError) rendered as the
//! standard error body.

use std::sync::Arc;

use axum::{Router, routing::get};

use crate::database::Database;

/// Health check endpoint
pub mod health;
/// Migration status endpoint
pub mod migrations;

/// Shared handler state.
pub type AppState = Arc<Database>;

/// Build the admin router.
///
/// - `GET /health`
/// - `GET /api/v1/migrations`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/migrations", get(migrations::migration_status))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::DatabaseConfig;

    async fn closed_state() -> AppState {
        let config = DatabaseConfig::new("localhost", "app", "postgres", "secret");
        let database = Database::new(config, "migrations").unwrap();
        database.close().await;
        Arc::new(database)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_closed_pool_as_unavailable() {
        let (status, body) = get(router(closed_state().await), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "pool_closed");
    }

    #[tokio::test]
    async fn migration_status_needs_a_live_pool() {
        let (status, body) = get(router(closed_state().await), "/api/v1/migrations").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "pool_closed");
    }
}
