use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Request-path error taxonomy. Every variant is rendered to the caller
/// as the same `{"error": "..."}` JSON shape.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing data file: {0}")]
    Configuration(String),

    #[error("invalid data source: {0}")]
    Validation(String),

    /// One message for every authentication failure, whatever the cause.
    #[error("invalid credentials")]
    Auth,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::Configuration(_) | ApiError::Validation(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Auth => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("{self}");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
