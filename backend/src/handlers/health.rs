//! Liveness and readiness

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::db;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    database: String,
    version: &'static str,
}

pub async fn root() -> &'static str {
    "Temporada API Server"
}

/// GET /health - 503 when the database is unreachable
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (code, status, database) = match db::check_health(&state.db_pool).await {
        Ok(()) => (StatusCode::OK, "healthy", "connected".to_string()),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "unreachable".to_string())
        }
    };

    (
        code,
        Json(HealthResponse {
            status,
            database,
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
