//! Error taxonomy for the ingestion pipeline.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::ValidationError;
use crate::payload::{AuthError, ParseError, TransportError};
use crate::store::PersistenceError;
use crate::time::TimeError;

/// JSON body of every error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Always `false`
    pub ok: bool,
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unauthorized: {0}")]
    Auth(#[from] AuthError),

    #[error("bad request: {0}")]
    Transport(#[from] TransportError),

    #[error("unparsable payload: {0}")]
    Parse(#[from] ParseError),

    #[error("invalid time: {0}")]
    Time(#[from] TimeError),

    #[error("invalid field {0}")]
    Validation(#[from] ValidationError),

    #[error("storage failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl IngestError {
    /// Pipeline stage at which the request was rejected.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Transport(_) => "transport",
            Self::Parse(_) => "parse",
            Self::Time(_) => "time",
            Self::Validation(_) => "validation",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Transport(_) | Self::Parse(_) => StatusCode::BAD_REQUEST,
            Self::Time(_) | Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Persistence(PersistenceError::Timeout(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        // Database details stay in the log
        let message = match &self {
            Self::Persistence(_) => "storage unavailable".to_string(),
            other => other.to_string(),
        };

        (self.status(), Json(ErrorBody::new(message))).into_response()
    }
}
