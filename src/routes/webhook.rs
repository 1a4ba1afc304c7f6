//! `POST /webhook`: the uplink endpoint called by the network server.
//!
//! The path carries no meaning, so `POST /` is accepted as well.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::AppState;
use crate::error::ErrorBody;
use crate::ingest;

// ---

/// Body returned once a record is stored.
#[derive(Debug, Serialize, ToSchema)]
pub struct Receipt {
    pub ok: bool,
    /// UUID of the stored measurement or log entry
    pub id: Uuid,
}

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/webhook", post(receive))
        .route("/", post(receive))
}

#[utoipa::path(
    post,
    path = "/webhook",
    params(
        ("X-Downlink-Apikey" = String, Header, description = "Shared application key"),
    ),
    request_body(
        content = String,
        content_type = "application/json",
        description = "Uplink JSON as posted by the network server, optionally wrapped as b'...'"
    ),
    responses(
        (status = 200, description = "Measurement or log entry stored", body = Receipt),
        (status = 400, description = "Missing Content-Length or unparsable payload", body = ErrorBody),
        (status = 401, description = "Missing or wrong API key", body = ErrorBody),
        (status = 422, description = "Invalid timestamp or field value", body = ErrorBody),
        (status = 500, description = "Storage failed", body = ErrorBody),
        (status = 503, description = "Storage timed out", body = ErrorBody),
    ),
    tag = "webhook"
)]
pub async fn receive(
    State((store, config)): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // ---
    let now = Utc::now().timestamp();

    match ingest::handle(store.as_ref(), &config, &headers, &body, now).await {
        Ok(stored) => (
            StatusCode::OK,
            Json(Receipt {
                ok: true,
                id: stored.uuid,
            }),
        )
            .into_response(),
        Err(rejection) => rejection.error.into_response(),
    }
}
