//! Router gateway: merges the per-concern subrouters, the OpenAPI document
//! and its Scalar viewer, and attaches state.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::error::ErrorBody;
use crate::pagination::Pagination;
use crate::store::{RecordStore, StoredLogEntry, StoredMeasurement};
use crate::Config;

mod health;
mod log_entries;
mod measurements;
mod webhook;

/// State shared by every route: the store and the startup configuration.
pub type AppState = (Arc<dyn RecordStore>, Config);

#[derive(OpenApi)]
#[openapi(
    paths(
        webhook::receive,
        measurements::list_measurements,
        measurements::export_measurements,
        log_entries::list_log_entries,
        health::health,
        health::ready,
    ),
    components(
        schemas(
            webhook::Receipt,
            ErrorBody,
            measurements::MeasurementPage,
            log_entries::LogEntryPage,
            StoredMeasurement,
            StoredLogEntry,
            Pagination,
            health::HealthStatus,
        )
    ),
    tags(
        (name = "webhook", description = "Uplink ingestion"),
        (name = "measurements", description = "Stored measurements"),
        (name = "log-entries", description = "Stored device log messages"),
        (name = "health", description = "Liveness and readiness"),
    ),
    info(
        title = "LoRaMINT webhook",
        description = "Persists LoRaWAN sensor measurements and device logs"
    )
)]
pub struct ApiDoc;

// ---

pub fn router(store: Arc<dyn RecordStore>, config: Config) -> Router {
    // ---
    Router::new()
        .merge(webhook::router())
        .merge(measurements::router())
        .merge(log_entries::router())
        .merge(health::router())
        .route("/openapi.json", get(openapi_json))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .with_state((store, config))
}

/// Handle `GET /openapi.json`.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
