use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::store::StoreError;
use crate::types::{ApiErrorCode, ApiErrorResponse};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Validation(message) => {
                (StatusCode::BAD_REQUEST, ApiErrorCode::Validation, message)
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, ApiErrorCode::Unauthorized, message)
            }
            ApiError::NotFound(message) | ApiError::Store(StoreError::NotFound(message)) => {
                (StatusCode::NOT_FOUND, ApiErrorCode::NotFound, message)
            }
            ApiError::Store(err) => {
                error!(error = %err, "store error while serving request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorCode::Database,
                    "database error".to_string(),
                )
            }
            ApiError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ApiErrorCode::Internal, message)
            }
        };

        (status, Json(ApiErrorResponse { code, message })).into_response()
    }
}
