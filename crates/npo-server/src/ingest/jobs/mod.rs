//! Background jobs of the ingestion pipeline
//!
//! Every job is a serialisable payload; [`execute`] runs one attempt and
//! [`on_failed`] runs once the queue has given up on it.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub mod delete;
pub mod excel_import;
pub mod irs_bmf;

pub use delete::{BulkDeleteExcelData, DeleteUploadedFile};
pub use excel_import::ProcessExcelFile;
pub use irs_bmf::{ProcessIrsBmfChunk, ProcessIrsBmfSource};

use super::config::IngestConfig;
use super::error::IngestResult;
use super::projector::ColumnLayout;
use super::queue::JobDispatcher;
use super::reader::RowSource;
use super::reconciler;
use super::store::{
    ChunkOutcome, DeleteProgressStore, IngestStore, IngestSummary, UploadStore, WriteMode,
};
use super::writer::ChunkWriter;
use crate::models::{DeleteProgress, UploadStatus};
use crate::storage::FileStorage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    ProcessExcelFile(ProcessExcelFile),
    ProcessIrsBmfSource(ProcessIrsBmfSource),
    ProcessIrsBmfChunk(ProcessIrsBmfChunk),
    BulkDeleteExcelData(BulkDeleteExcelData),
    DeleteUploadedFile(DeleteUploadedFile),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::ProcessExcelFile(_) => "process_excel_file",
            Job::ProcessIrsBmfSource(_) => "process_irs_bmf_source",
            Job::ProcessIrsBmfChunk(_) => "process_irs_bmf_chunk",
            Job::BulkDeleteExcelData(_) => "bulk_delete_excel_data",
            Job::DeleteUploadedFile(_) => "delete_uploaded_file",
        }
    }

    /// Upload the job works on, if any
    pub fn upload_id(&self) -> Option<Uuid> {
        match self {
            Job::ProcessExcelFile(j) => Some(j.upload_id),
            Job::ProcessIrsBmfSource(j) => Some(j.upload_id),
            Job::ProcessIrsBmfChunk(j) => Some(j.upload_id),
            Job::DeleteUploadedFile(j) => Some(j.upload_id),
            Job::BulkDeleteExcelData(_) => None,
        }
    }
}

/// Shared dependencies of running jobs
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn IngestStore>,
    pub storage: FileStorage,
    pub config: Arc<IngestConfig>,
    pub dispatcher: Arc<dyn JobDispatcher>,
}

impl JobContext {
    pub fn new(
        store: Arc<dyn IngestStore>,
        storage: FileStorage,
        config: Arc<IngestConfig>,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        Self {
            store,
            storage,
            config,
            dispatcher,
        }
    }

    pub fn writer(&self) -> ChunkWriter {
        ChunkWriter::new(self.store.clone(), self.config.on_chunk_failure)
    }
}

/// Run one attempt of a job
pub async fn execute(job: &Job, ctx: &JobContext) -> IngestResult<()> {
    match job {
        Job::ProcessExcelFile(j) => j.run(ctx).await,
        Job::ProcessIrsBmfSource(j) => j.run(ctx).await,
        Job::ProcessIrsBmfChunk(j) => j.run(ctx).await,
        Job::BulkDeleteExcelData(j) => j.run(ctx).await,
        Job::DeleteUploadedFile(j) => j.run(ctx).await,
    }
}

/// Hook for jobs that exhausted their retries. Partially ingested rows are kept.
pub async fn on_failed(job: &Job, ctx: &JobContext, error: &str) -> IngestResult<()> {
    error!(kind = job.kind(), error, "Job failed permanently");

    match job {
        Job::ProcessExcelFile(ProcessExcelFile { upload_id })
        | Job::ProcessIrsBmfSource(ProcessIrsBmfSource { upload_id, .. })
        | Job::ProcessIrsBmfChunk(ProcessIrsBmfChunk { upload_id, .. }) => {
            let message = format!("{} failed: {}", job.kind(), error);
            ctx.store.mark_failed(*upload_id, &message).await?;
        }
        Job::BulkDeleteExcelData(BulkDeleteExcelData { operation_id, .. }) => {
            fail_delete_progress(ctx, *operation_id, error).await?;
        }
        Job::DeleteUploadedFile(DeleteUploadedFile { upload_id }) => {
            fail_delete_progress(ctx, *upload_id, error).await?;
        }
    }
    Ok(())
}

async fn fail_delete_progress(ctx: &JobContext, operation_id: Uuid, error: &str) -> IngestResult<()> {
    let percent = ctx
        .store
        .get_delete_progress(operation_id)
        .await?
        .map(|p| p.percent)
        .unwrap_or(0);
    ctx.store
        .save_delete_progress(&DeleteProgress::failed(operation_id, percent, error))
        .await
}

/// Mark the upload failed when `result` carries a job-aborting error
pub(crate) async fn fail_on_fatal<T>(
    ctx: &JobContext,
    upload_id: Uuid,
    result: IngestResult<T>,
) -> IngestResult<T> {
    match result {
        Err(e) if e.is_fatal() => {
            reconciler::mark_failed(&*ctx.store, upload_id, &e).await?;
            Err(e)
        }
        other => other,
    }
}

pub(crate) async fn is_cancelled(ctx: &JobContext, upload_id: Uuid) -> IngestResult<bool> {
    Ok(ctx
        .store
        .get_upload(upload_id)
        .await?
        .map(|u| u.status == UploadStatus::Cancelled)
        .unwrap_or(true))
}

/// Options of a sequential run over a source
pub(crate) struct SequentialRun {
    pub upload_id: Uuid,
    pub chunk_size: usize,
    pub mode: WriteMode,
    /// Log a progress checkpoint every this many chunks
    pub checkpoint_interval: Option<usize>,
}

/// Process every chunk of `source` in order, skipping committed chunks.
/// Stops early when the upload gets cancelled.
pub(crate) async fn run_sequential(
    ctx: &JobContext,
    mut source: RowSource,
    layout: &ColumnLayout,
    run: SequentialRun,
) -> IngestResult<IngestSummary> {
    let writer = ctx.writer();
    let mut summary = IngestSummary::default();
    let mut chunk_index: i32 = 0;
    let mut row_number: usize = 1;

    loop {
        let (rest, rows) = source.read_chunk(run.chunk_size).await?;
        source = rest;
        if rows.is_empty() {
            break;
        }

        let rows_in_chunk = rows.len();

        if is_cancelled(ctx, run.upload_id).await? {
            info!(upload_id = %run.upload_id, chunk = chunk_index, "Upload cancelled, stopping");
            return Ok(summary);
        }

        if ctx.store.is_chunk_committed(run.upload_id, chunk_index).await? {
            summary.add(&ChunkOutcome::already_committed());
        } else {
            let outcome = writer
                .process_rows(run.upload_id, layout, chunk_index, row_number, rows, run.mode)
                .await?;
            summary.add(&outcome);
        }

        row_number += rows_in_chunk;
        chunk_index += 1;

        if let Some(interval) = run.checkpoint_interval {
            if interval > 0 && chunk_index as usize % interval == 0 {
                info!(
                    upload_id = %run.upload_id,
                    chunks = chunk_index,
                    rows = row_number - 1,
                    inserted = summary.inserted,
                    updated = summary.updated,
                    "Checkpoint"
                );
            }
        }
    }

    Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ingest::memory::MemoryStore;
    use crate::ingest::queue::LocalQueue;
    use crate::storage::StorageConfig;
    use tempfile::TempDir;

    pub struct Harness {
        pub dir: TempDir,
        pub store: Arc<MemoryStore>,
        pub queue: Arc<LocalQueue>,
        pub ctx: JobContext,
    }

    pub fn harness_with(config: IngestConfig) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(LocalQueue::new(config.limits.clone()));
        let ctx = JobContext::new(
            store.clone(),
            FileStorage::new(StorageConfig::at(dir.path())),
            Arc::new(config),
            queue.clone(),
        );
        Harness {
            dir,
            store,
            queue,
            ctx,
        }
    }

    pub fn harness() -> Harness {
        harness_with(IngestConfig::default())
    }

    /// CSV text with the BMF header and one row per EIN
    pub fn bmf_csv(eins: &[&str]) -> String {
        use crate::ingest::projector::tests::{bmf_header, bmf_row};
        let mut out = bmf_header().join(",");
        out.push('\n');
        for ein in eins {
            out.push_str(&bmf_row(ein, &format!("ORG {}", ein)).join(","));
            out.push('\n');
        }
        out
    }

    #[test]
    fn test_job_serialization_is_tagged() {
        let job = Job::ProcessIrsBmfChunk(ProcessIrsBmfChunk {
            upload_id: Uuid::nil(),
            chunk_index: 3,
            start_row: 1500,
            row_count: 500,
            update_only: true,
        });
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["kind"], "process_irs_bmf_chunk");
        assert_eq!(value["chunk_index"], 3);
        assert_eq!(value["kind"], job.kind());

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back, job);
    }

    #[tokio::test]
    async fn test_on_failed_marks_upload_failed() {
        let h = harness();
        let upload = h
            .store
            .create_upload(crate::models::NewUpload::user_upload("a.csv", "uploads/a.csv"))
            .await
            .unwrap();
        let job = Job::ProcessExcelFile(ProcessExcelFile { upload_id: upload.id });

        on_failed(&job, &h.ctx, "timed out").await.unwrap();

        let upload = h.store.get_upload(upload.id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Failed);
        assert_eq!(
            upload.error_message.as_deref(),
            Some("process_excel_file failed: timed out")
        );
    }

    #[tokio::test]
    async fn test_on_failed_keeps_delete_percentage() {
        let h = harness();
        let op = Uuid::new_v4();
        h.store
            .save_delete_progress(&DeleteProgress::running(op, 40, "deleting_notes"))
            .await
            .unwrap();

        let job = Job::BulkDeleteExcelData(BulkDeleteExcelData {
            operation_id: op,
            row_ids: vec![1, 2],
        });
        on_failed(&job, &h.ctx, "db down").await.unwrap();

        let progress = h.store.get_delete_progress(op).await.unwrap().unwrap();
        assert_eq!(progress.status, crate::models::DeleteStatus::Failed);
        assert_eq!(progress.percent, 40);
        assert_eq!(progress.message.as_deref(), Some("db down"));
    }
}
