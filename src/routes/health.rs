//! Liveness and readiness checks.
//!
//! `/health` answers as long as the process serves HTTP and never touches
//! the database. `/ready` round-trips to the store so orchestrators can hold
//! traffic back while PostgreSQL is unreachable.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;

/// JSON response body for both checks.
#[derive(Serialize, ToSchema)]
pub struct HealthStatus {
    status: String,
}

impl HealthStatus {
    fn new(status: &str) -> Json<Self> {
        Json(Self {
            status: status.to_string(),
        })
    }
}

/// Handle `GET /health`.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Process is serving HTTP", body = HealthStatus),
    ),
    tag = "health"
)]
pub async fn health() -> Json<HealthStatus> {
    HealthStatus::new("ok")
}

/// Handle `GET /ready`: `200` when the store answers, `503` otherwise.
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Database reachable", body = HealthStatus),
        (status = 503, description = "Database unreachable", body = HealthStatus),
    ),
    tag = "health"
)]
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let (store, _) = state;
    // ---
    match store.ping().await {
        Ok(()) => (StatusCode::OK, HealthStatus::new("ready")),
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, HealthStatus::new("unavailable"))
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
}
