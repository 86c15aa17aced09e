use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Errors that can occur while ingesting or searching posts
#[derive(Error, Debug)]
pub enum PostError {
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Image is required")]
    ImageRequired,

    #[error("Invalid coordinate for {field}: {value:?}")]
    InvalidCoordinate { field: &'static str, value: String },

    #[error("Invalid search range: {0:?}")]
    InvalidRadius(String),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Blob store unavailable: {0}")]
    BlobUnavailable(String),

    #[error("Failed to provision index {index}: {message}")]
    IndexProvisioning { index: String, message: String },

    #[error("Search index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Record store unavailable: {0}")]
    RecordStoreUnavailable(String),
}

impl PostError {
    /// Stable machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            PostError::Unauthenticated(_) => "UNAUTHENTICATED",
            PostError::ImageRequired => "IMAGE_REQUIRED",
            PostError::InvalidCoordinate { .. } => "INVALID_COORDINATE",
            PostError::InvalidRadius(_) => "INVALID_RANGE",
            PostError::InvalidSubmission(_) => "INVALID_SUBMISSION",
            PostError::BlobUnavailable(_) => "BLOB_UNAVAILABLE",
            PostError::IndexProvisioning { .. } => "INDEX_PROVISIONING_ERROR",
            PostError::IndexUnavailable(_) => "INDEX_UNAVAILABLE",
            PostError::RecordStoreUnavailable(_) => "RECORD_STORE_UNAVAILABLE",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PostError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            PostError::ImageRequired
            | PostError::InvalidCoordinate { .. }
            | PostError::InvalidRadius(_)
            | PostError::InvalidSubmission(_) => StatusCode::BAD_REQUEST,
            PostError::BlobUnavailable(_)
            | PostError::IndexProvisioning { .. }
            | PostError::IndexUnavailable(_)
            | PostError::RecordStoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for PostError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };

        (status, Json(body)).into_response()
    }
}
