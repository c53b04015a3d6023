//! Uploaded file (one ingestion run)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::progress::percent_complete;

/// Lifecycle of an ingestion run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Processing => "processing",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
            UploadStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed and cancelled runs are never reopened by chunk work
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Completed | UploadStatus::Failed | UploadStatus::Cancelled
        )
    }
}

impl From<String> for UploadStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => UploadStatus::Processing,
            "completed" => UploadStatus::Completed,
            "failed" => UploadStatus::Failed,
            "cancelled" => UploadStatus::Cancelled,
            _ => UploadStatus::Pending,
        }
    }
}

/// Where the rows of an upload come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Upload,
    IrsBmf,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Upload => "upload",
            SourceKind::IrsBmf => "irs_bmf",
        }
    }
}

impl From<String> for SourceKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "irs_bmf" => SourceKind::IrsBmf,
            _ => SourceKind::Upload,
        }
    }
}

/// Raw `uploaded_files` row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UploadedFileRecord {
    pub id: Uuid,
    pub original_name: String,
    pub storage_path: String,
    pub source_kind: String,
    pub source_url: Option<String>,
    pub checksum: Option<String>,
    pub status: String,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub total_chunks: i32,
    pub processed_chunks: i32,
    pub last_committed_chunk: Option<i32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ingestion run and its progress counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub id: Uuid,
    pub original_name: String,
    pub storage_path: String,
    pub source_kind: SourceKind,
    pub source_url: Option<String>,
    pub checksum: Option<String>,
    pub status: UploadStatus,
    pub total_rows: i64,
    pub processed_rows: i64,
    pub total_chunks: i32,
    pub processed_chunks: i32,
    pub last_committed_chunk: Option<i32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadedFile {
    pub fn percent_complete(&self) -> f64 {
        percent_complete(self.processed_rows, self.total_rows)
    }

    pub fn is_done(&self) -> bool {
        self.total_rows > 0 && self.processed_rows >= self.total_rows
    }
}

impl From<UploadedFileRecord> for UploadedFile {
    fn from(r: UploadedFileRecord) -> Self {
        Self {
            id: r.id,
            original_name: r.original_name,
            storage_path: r.storage_path,
            source_kind: r.source_kind.into(),
            source_url: r.source_url,
            checksum: r.checksum,
            status: r.status.into(),
            total_rows: r.total_rows,
            processed_rows: r.processed_rows,
            total_chunks: r.total_chunks,
            processed_chunks: r.processed_chunks,
            last_committed_chunk: r.last_committed_chunk,
            error_message: r.error_message,
            started_at: r.started_at,
            completed_at: r.completed_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

/// Parameters for registering a new ingestion run
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub id: Uuid,
    pub original_name: String,
    pub storage_path: String,
    pub source_kind: SourceKind,
    pub source_url: Option<String>,
    pub checksum: Option<String>,
}

impl NewUpload {
    pub fn user_upload(original_name: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_name: original_name.into(),
            storage_path: storage_path.into(),
            source_kind: SourceKind::Upload,
            source_url: None,
            checksum: None,
        }
    }

    pub fn irs_bmf(source_url: impl Into<String>, storage_path: impl Into<String>) -> Self {
        let source_url = source_url.into();
        let original_name = source_url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("irs_bmf.csv")
            .to_string();

        Self {
            id: Uuid::new_v4(),
            original_name,
            storage_path: storage_path.into(),
            source_kind: SourceKind::IrsBmf,
            source_url: Some(source_url),
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}
