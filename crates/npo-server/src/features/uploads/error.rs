//! Errors and views shared by the upload commands and queries

use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::ingest::IngestError;
use crate::models::{UploadStatus, UploadedFile};

#[derive(Debug, thiserror::Error)]
pub enum UploadFeatureError {
    #[error("{0}")]
    Validation(String),
    #[error("Upload '{0}' not found")]
    NotFound(Uuid),
    #[error("Delete operation '{0}' not found")]
    OperationNotFound(Uuid),
    #[error("Upload '{0}' is {1} and can no longer be cancelled")]
    NotActive(Uuid, &'static str),
    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadFeatureError {
    pub(crate) fn not_active(id: Uuid, status: UploadStatus) -> Self {
        Self::NotActive(id, status.as_str())
    }
}

impl From<UploadFeatureError> for AppError {
    fn from(err: UploadFeatureError) -> Self {
        match err {
            UploadFeatureError::Validation(message) => AppError::Validation(message),
            e @ (UploadFeatureError::NotFound(_) | UploadFeatureError::OperationNotFound(_)) => {
                AppError::NotFound(e.to_string())
            },
            e @ UploadFeatureError::NotActive(..) => AppError::Conflict(e.to_string()),
            UploadFeatureError::Ingest(e) => AppError::Ingest(e),
            UploadFeatureError::Database(e) => AppError::Database(e),
            UploadFeatureError::Io(e) => AppError::Io(e),
        }
    }
}

/// An upload as returned by the API, with its completion percentage
#[derive(Debug, Clone, Serialize)]
pub struct UploadView {
    #[serde(flatten)]
    pub upload: UploadedFile,
    pub percent_complete: f64,
}

impl From<UploadedFile> for UploadView {
    fn from(upload: UploadedFile) -> Self {
        let percent_complete = upload.percent_complete();
        Self {
            upload,
            percent_complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use axum::http::StatusCode;

    #[test]
    fn test_error_status_mapping() {
        let status = |e: UploadFeatureError| AppError::from(e).into_response().status();

        assert_eq!(status(UploadFeatureError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(UploadFeatureError::NotFound(Uuid::nil())), StatusCode::NOT_FOUND);
        assert_eq!(
            status(UploadFeatureError::not_active(Uuid::nil(), UploadStatus::Completed)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(UploadFeatureError::Ingest(IngestError::UploadNotFound(Uuid::nil()))),
            StatusCode::NOT_FOUND
        );
    }
}
