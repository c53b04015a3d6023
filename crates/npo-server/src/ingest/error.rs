//! Error taxonomy of the ingestion pipeline

use std::path::PathBuf;
use uuid::Uuid;

/// Result type for ingestion operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Header row has no EIN column")]
    MissingEinColumn,

    #[error("Source contains no data rows")]
    NoDataRows,

    #[error("Source file not found: {}", .0.display())]
    SourceFileMissing(PathBuf),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Download of {url} failed after {attempts} attempt(s): {message}")]
    Download {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Upload not found: {0}")]
    UploadNotFound(Uuid),

    #[error("Chunk {chunk} rejected: {message}")]
    ChunkRejected { chunk: i32, message: String },

    #[error("Job exceeded its {0}s timeout")]
    Timeout(u64),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Errors that abort the whole job and mark the upload failed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::MissingEinColumn
                | IngestError::NoDataRows
                | IngestError::SourceFileMissing(_)
                | IngestError::UnsupportedFormat(_)
                | IngestError::Download { .. }
                | IngestError::UploadNotFound(_)
        )
    }

    /// Whether the queue may schedule another attempt. Fatal errors included;
    /// only a vanished upload is never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, IngestError::UploadNotFound(_))
    }
}
