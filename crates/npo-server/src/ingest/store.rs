//! Storage seams of the ingestion pipeline
//!
//! Jobs only talk to these traits. `db::PgStore` implements them against
//! Postgres; tests use an in-memory implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::IngestResult;
use super::projector::ProjectedRow;
use crate::models::{DeleteProgress, NewUpload, UploadedFile};

/// Whether unknown EINs may be inserted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    Upsert,
    /// Only refresh rows that already exist
    UpdateOnly,
}

impl WriteMode {
    pub fn from_update_only(update_only: bool) -> Self {
        if update_only {
            WriteMode::UpdateOnly
        } else {
            WriteMode::Upsert
        }
    }
}

/// One chunk handed to the store
#[derive(Debug, Clone)]
pub struct ChunkWrite {
    pub upload_id: Uuid,
    pub chunk_index: i32,
    pub rows: Vec<ProjectedRow>,
    /// Source rows consumed by the chunk, counted towards progress
    pub raw_row_count: i64,
    pub malformed: usize,
    pub mode: WriteMode,
}

/// What writing a chunk did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub fallback: bool,
    pub already_committed: bool,
}

impl ChunkOutcome {
    pub fn already_committed() -> Self {
        Self {
            already_committed: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Running totals over the chunks of one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub chunks: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub malformed: usize,
    pub fallback_chunks: usize,
    pub already_committed: usize,
}

impl IngestSummary {
    pub fn add(&mut self, outcome: &ChunkOutcome) {
        self.chunks += 1;
        self.inserted += outcome.inserted;
        self.updated += outcome.updated;
        self.unchanged += outcome.unchanged;
        self.skipped += outcome.skipped;
        self.malformed += outcome.malformed;
        if outcome.fallback {
            self.fallback_chunks += 1;
        }
        if outcome.already_committed {
            self.already_committed += 1;
        }
    }
}

#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn create_upload(&self, upload: NewUpload) -> IngestResult<UploadedFile>;

    async fn get_upload(&self, id: Uuid) -> IngestResult<Option<UploadedFile>>;

    /// Move to `processing`. Pending, processing and failed uploads may
    /// (re)start; returns false for completed or cancelled ones.
    async fn start_processing(&self, id: Uuid) -> IngestResult<bool>;

    async fn set_totals(&self, id: Uuid, total_rows: i64, total_chunks: i32) -> IngestResult<()>;

    async fn is_chunk_committed(&self, id: Uuid, chunk_index: i32) -> IngestResult<bool>;

    /// Flip to `completed` when processed rows reached the total and the
    /// upload is still active. Returns whether this call flipped it.
    async fn mark_completed(&self, id: Uuid) -> IngestResult<bool>;

    /// Flip an active upload to `failed`
    async fn mark_failed(&self, id: Uuid, message: &str) -> IngestResult<bool>;

    /// Flip a pending or processing upload to `cancelled`
    async fn cancel_upload(&self, id: Uuid) -> IngestResult<bool>;

    /// Remove the upload record; its rows must already be gone
    async fn delete_upload(&self, id: Uuid) -> IngestResult<bool>;
}

#[async_trait]
pub trait ExcelDataStore: Send + Sync {
    /// Store the header marker row once per upload
    async fn insert_header_row(&self, upload_id: Uuid, header: &ProjectedRow) -> IngestResult<bool>;

    /// Dedup-write a chunk and record its progress in one transaction.
    /// A chunk already in the ledger is a no-op.
    async fn write_chunk(&self, write: &ChunkWrite) -> IngestResult<ChunkOutcome>;

    /// Insert every row of the chunk without dedup and record its progress
    async fn insert_chunk_unchecked(&self, write: &ChunkWrite) -> IngestResult<ChunkOutcome>;

    async fn count_notes_for_upload(&self, upload_id: Uuid) -> IngestResult<u64>;

    async fn count_rows_for_upload(&self, upload_id: Uuid) -> IngestResult<u64>;

    /// Delete at most `limit` notes attached to rows of the upload
    async fn delete_notes_for_upload(&self, upload_id: Uuid, limit: usize) -> IngestResult<u64>;

    /// Delete at most `limit` rows of the upload
    async fn delete_rows_for_upload(&self, upload_id: Uuid, limit: usize) -> IngestResult<u64>;

    async fn delete_notes_for_rows(&self, row_ids: &[i64]) -> IngestResult<u64>;

    async fn delete_rows(&self, row_ids: &[i64]) -> IngestResult<u64>;
}

#[async_trait]
pub trait DeleteProgressStore: Send + Sync {
    /// Upsert a snapshot; the stored percentage never moves backwards
    async fn save_delete_progress(&self, progress: &DeleteProgress) -> IngestResult<()>;

    async fn get_delete_progress(&self, operation_id: Uuid) -> IngestResult<Option<DeleteProgress>>;
}

/// Everything the jobs need from storage
pub trait IngestStore: UploadStore + ExcelDataStore + DeleteProgressStore {}

impl<T> IngestStore for T where T: UploadStore + ExcelDataStore + DeleteProgressStore {}
