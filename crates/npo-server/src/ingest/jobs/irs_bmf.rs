//! IRS Business Master File sync
//!
//! [`ProcessIrsBmfSource`] downloads one regional extract and either walks
//! it chunk by chunk or fans out one [`ProcessIrsBmfChunk`] per chunk.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{fail_on_fatal, run_sequential, Job, JobContext, SequentialRun};
use crate::ingest::config::{MAX_REMOTE_CHUNK_SIZE, MIN_REMOTE_CHUNK_SIZE};
use crate::ingest::download::BmfDownloader;
use crate::ingest::error::{IngestError, IngestResult};
use crate::ingest::progress::chunk_count;
use crate::ingest::projector::{project_header, ColumnLayout};
use crate::ingest::queue::JobDispatcher;
use crate::ingest::reader::{count_rows, open_source};
use crate::ingest::reconciler::reconcile;
use crate::ingest::store::{ExcelDataStore, UploadStore, WriteMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIrsBmfSource {
    pub upload_id: Uuid,
    pub source_url: String,
    pub chunk_size: usize,
    #[serde(default)]
    pub update_only: bool,
    /// Fan out chunk jobs instead of processing in this job
    #[serde(default)]
    pub dispatch_chunks: bool,
}

impl ProcessIrsBmfSource {
    pub async fn run(&self, ctx: &JobContext) -> IngestResult<()> {
        let upload = ctx
            .store
            .get_upload(self.upload_id)
            .await?
            .ok_or(IngestError::UploadNotFound(self.upload_id))?;

        if !ctx.store.start_processing(upload.id).await? {
            info!(upload_id = %upload.id, status = upload.status.as_str(), "Upload is closed, skipping sync");
            return Ok(());
        }

        let result = self.sync(ctx, &upload.storage_path).await;
        fail_on_fatal(ctx, upload.id, result).await
    }

    fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(MIN_REMOTE_CHUNK_SIZE, MAX_REMOTE_CHUNK_SIZE)
    }

    async fn sync(&self, ctx: &JobContext, storage_path: &str) -> IngestResult<()> {
        let path = ctx.storage.resolve(storage_path)?;
        let downloader = BmfDownloader::new(&ctx.config)?;
        let file = downloader.download_to(&self.source_url, &path).await?;
        info!(
            upload_id = %self.upload_id,
            url = %self.source_url,
            bytes = file.bytes,
            checksum = %file.checksum,
            "Source downloaded"
        );

        let chunk_size = self.effective_chunk_size();
        let source = open_source(path.clone()).await?;
        let layout = ColumnLayout::from_header(source.header())?;

        let total_rows = count_rows(path).await?;
        if total_rows == 0 {
            return Err(IngestError::NoDataRows);
        }
        let total_chunks = chunk_count(total_rows, chunk_size);
        ctx.store.set_totals(self.upload_id, total_rows, total_chunks).await?;
        info!(
            upload_id = %self.upload_id,
            total_rows,
            total_chunks,
            chunk_size,
            "Totals computed"
        );

        ctx.store
            .insert_header_row(self.upload_id, &project_header(source.header())?)
            .await?;

        if self.dispatch_chunks {
            for chunk_index in 0..total_chunks {
                let start_row = chunk_index as usize * chunk_size;
                let row_count = chunk_size.min(total_rows as usize - start_row);
                ctx.dispatcher
                    .dispatch(Job::ProcessIrsBmfChunk(ProcessIrsBmfChunk {
                        upload_id: self.upload_id,
                        chunk_index,
                        start_row,
                        row_count,
                        update_only: self.update_only,
                    }))
                    .await?;
            }
            info!(upload_id = %self.upload_id, chunks = total_chunks, "Chunk jobs dispatched");
            return Ok(());
        }

        let summary = run_sequential(
            ctx,
            source,
            &layout,
            SequentialRun {
                upload_id: self.upload_id,
                chunk_size,
                mode: WriteMode::from_update_only(self.update_only),
                checkpoint_interval: Some(ctx.config.checkpoint_interval),
            },
        )
        .await?;

        info!(
            upload_id = %self.upload_id,
            chunks = summary.chunks,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            skipped = summary.skipped,
            malformed = summary.malformed,
            fallback_chunks = summary.fallback_chunks,
            "Sync finished"
        );

        reconcile(&*ctx.store, self.upload_id, true).await?;
        Ok(())
    }
}

/// One slice of an already downloaded source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessIrsBmfChunk {
    pub upload_id: Uuid,
    pub chunk_index: i32,
    /// Zero-based index of the first data row
    pub start_row: usize,
    pub row_count: usize,
    #[serde(default)]
    pub update_only: bool,
}

impl ProcessIrsBmfChunk {
    pub async fn run(&self, ctx: &JobContext) -> IngestResult<()> {
        let upload = ctx
            .store
            .get_upload(self.upload_id)
            .await?
            .ok_or(IngestError::UploadNotFound(self.upload_id))?;

        if upload.status.is_terminal() {
            info!(
                upload_id = %upload.id,
                chunk = self.chunk_index,
                status = upload.status.as_str(),
                "Upload is closed, skipping chunk"
            );
            return Ok(());
        }

        if ctx.store.is_chunk_committed(upload.id, self.chunk_index).await? {
            info!(upload_id = %upload.id, chunk = self.chunk_index, "Chunk already committed");
            reconcile(&*ctx.store, upload.id, false).await?;
            return Ok(());
        }

        let result = self.process(ctx, &upload.storage_path).await;
        fail_on_fatal(ctx, upload.id, result).await
    }

    async fn process(&self, ctx: &JobContext, storage_path: &str) -> IngestResult<()> {
        let path = ctx.storage.resolve(storage_path)?;
        let source = open_source(path).await?;
        let layout = ColumnLayout::from_header(source.header())?;

        let rows = source.read_slice(self.start_row, self.row_count).await?;

        ctx.writer()
            .process_rows(
                self.upload_id,
                &layout,
                self.chunk_index,
                self.start_row + 1,
                rows,
                WriteMode::from_update_only(self.update_only),
            )
            .await?;

        reconcile(&*ctx.store, self.upload_id, false).await?;
        Ok(())
    }
}
