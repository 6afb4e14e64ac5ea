//! API error types.

use crate::store::StoreError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use stowage_metadata::MetadataError;
use stowage_storage::StorageError;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// Message returned for backend faults; details stay in the server log.
const STORAGE_FAILURE: &str = "storage backend failure";

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("bad gateway: {0}")]
    BadGateway(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("core error: {0}")]
    Core(#[from] stowage_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Forbidden(_) => "forbidden",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::BadGateway(_) => "bad_gateway",
            Self::Internal(_) => "internal_error",
            Self::Store(e) => match e {
                StoreError::Forbidden => "forbidden",
                StoreError::NotFound(_) => "not_found",
                StoreError::Validation(_) => "validation_failed",
                StoreError::Invalid(_) => "validation_failed",
                StoreError::AlreadyComplete(_) => "already_complete",
                StoreError::Backend(_) => "storage_error",
                StoreError::Metadata(_) => "metadata_error",
            },
            Self::Storage(_) => "storage_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Store(e) => match e {
                StoreError::Forbidden => StatusCode::FORBIDDEN,
                StoreError::NotFound(_) => StatusCode::NOT_FOUND,
                StoreError::Validation(_) | StoreError::Invalid(_) => StatusCode::BAD_REQUEST,
                StoreError::AlreadyComplete(_) => StatusCode::CONFLICT,
                StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
                StoreError::Metadata(e) => metadata_status(e),
            },
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => metadata_status(e),
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message sent to the client. Backend and database faults are not echoed.
    fn public_message(&self) -> String {
        match self {
            Self::Storage(_) | Self::Store(StoreError::Backend(_)) => STORAGE_FAILURE.to_string(),
            Self::Metadata(_) | Self::Store(StoreError::Metadata(_))
                if self.status_code().is_server_error() =>
            {
                "metadata store failure".to_string()
            }
            _ => self.to_string(),
        }
    }
}

fn metadata_status(err: &MetadataError) -> StatusCode {
    match err {
        MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
        MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
