//! API error type and store-error mapping.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::store::StoreError;

/// Error body: a single textual detail message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// API error that converts to a JSON response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: detail.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::not_found(err.to_string()),
            StoreError::Validation(_) | StoreError::Conflict(_) => {
                Self::bad_request(err.to_string())
            }
            StoreError::Persistence(_) => {
                tracing::error!(error = %err, "Config persistence failed");
                Self::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(ErrorResponse {
                detail: self.detail,
            }),
        )
            .into_response()
    }
}
