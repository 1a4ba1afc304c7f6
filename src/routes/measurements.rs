use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};
use utoipa::ToSchema;

use super::AppState;
use crate::error::{ErrorBody, IngestError};
use crate::pagination::{Page, PageQuery, Pagination};
use crate::store::StoredMeasurement;

// ---

const CSV_HEADER: [&str; 10] = [
    "uuid",
    "device_eui",
    "measurand",
    "unit",
    "datatype",
    "sensor",
    "location",
    "value",
    "time_method",
    "unix_time",
];

#[derive(Debug, Serialize, ToSchema)]
pub struct MeasurementPage {
    pub data: Vec<StoredMeasurement>,
    pub pagination: Pagination,
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/measurements", get(list_measurements))
        .route("/measurements/export", get(export_measurements))
}

/// Handle `GET /measurements`, newest `unix_time` first.
#[utoipa::path(
    get,
    path = "/measurements",
    params(PageQuery),
    responses(
        (status = 200, description = "One page of measurements", body = MeasurementPage),
        (status = 500, description = "Storage failed", body = ErrorBody),
        (status = 503, description = "Storage timed out", body = ErrorBody),
    ),
    tag = "measurements"
)]
pub async fn list_measurements(
    Query(query): Query<PageQuery>,
    State(state): State<AppState>,
) -> Result<Json<MeasurementPage>, IngestError> {
    let (store, _) = state;
    // ---
    let page = Page::from(query);
    let listing = store
        .list_measurements(page)
        .await
        .inspect_err(|e| error!("Failed to list measurements: {}", e))?;

    Ok(Json(MeasurementPage {
        data: listing.items,
        pagination: Pagination::new(page, listing.total),
    }))
}

/// Handle `GET /measurements/export` as a CSV download.
#[utoipa::path(
    get,
    path = "/measurements/export",
    responses(
        (status = 200, description = "All measurements as CSV", content_type = "text/csv", body = String),
        (status = 500, description = "Storage or rendering failed", body = ErrorBody),
        (status = 503, description = "Storage timed out", body = ErrorBody),
    ),
    tag = "measurements"
)]
pub async fn export_measurements(State(state): State<AppState>) -> Result<Response, IngestError> {
    let (store, _) = state;
    // ---
    let rows = store
        .all_measurements()
        .await
        .inspect_err(|e| error!("Failed to load measurements for export: {}", e))?;

    let body = match render_csv(&rows) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to render CSV export: {}", e);
            return Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::new("export failed")),
            )
                .into_response());
        }
    };

    info!("Exporting {} measurements", rows.len());
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=measurements.csv",
            ),
        ],
        body,
    )
        .into_response())
}

fn render_csv(rows: &[StoredMeasurement]) -> Result<Vec<u8>, csv::Error> {
    // ---
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }

    writer.into_inner().map_err(|e| e.into_error().into())
}
