use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ritual_cache::CacheError;
use ritual_refresh::RefreshError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid cache section.")]
    InvalidSection,
    #[error("{0}")]
    BadRequest(String),
    #[error("Invalid cache route.")]
    NotFound,
    #[error("Method not allowed.")]
    MethodNotAllowed,
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("Handler panicked: {0}")]
    Panic(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            ApiError::InvalidSection | ApiError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string(), None)
            }
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string(), None),
            ApiError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, self.to_string(), None),
            ApiError::Refresh(_) | ApiError::Cache(_) | ApiError::Panic(_) => {
                tracing::error!("Cache server request failed: {}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Cache server request failed.".to_string(),
                    Some(self.to_string()),
                )
            }
        };
        (status, Json(ErrorBody { error, details })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
