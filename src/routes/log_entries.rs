use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;
use crate::error::{ErrorBody, IngestError};
use crate::pagination::{Page, PageQuery, Pagination};
use crate::store::StoredLogEntry;

// ---

#[derive(Debug, Serialize, ToSchema)]
pub struct LogEntryPage {
    pub data: Vec<StoredLogEntry>,
    pub pagination: Pagination,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/log-entries", get(list_log_entries))
}

/// Handle `GET /log-entries`, newest first.
#[utoipa::path(
    get,
    path = "/log-entries",
    params(PageQuery),
    responses(
        (status = 200, description = "One page of device log entries", body = LogEntryPage),
        (status = 500, description = "Storage failed", body = ErrorBody),
        (status = 503, description = "Storage timed out", body = ErrorBody),
    ),
    tag = "log-entries"
)]
pub async fn list_log_entries(
    Query(query): Query<PageQuery>,
    State(state): State<AppState>,
) -> Result<Json<LogEntryPage>, IngestError> {
    let (store, _) = state;
    // ---
    let page = Page::from(query);
    let listing = store
        .list_log_entries(page)
        .await
        .inspect_err(|e| tracing::error!("Failed to list log entries: {}", e))?;

    Ok(Json(LogEntryPage {
        data: listing.items,
        pagination: Pagination::new(page, listing.total),
    }))
}
