//! Import of a user-uploaded CSV or spreadsheet

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{fail_on_fatal, run_sequential, JobContext, SequentialRun};
use crate::ingest::error::{IngestError, IngestResult};
use crate::ingest::progress::chunk_count;
use crate::ingest::projector::{project_header, ColumnLayout};
use crate::ingest::reader::{count_rows, open_source, SourceFormat};
use crate::ingest::reconciler::reconcile;
use crate::ingest::store::{ExcelDataStore, UploadStore, WriteMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessExcelFile {
    pub upload_id: Uuid,
}

impl ProcessExcelFile {
    pub async fn run(&self, ctx: &JobContext) -> IngestResult<()> {
        let upload = ctx
            .store
            .get_upload(self.upload_id)
            .await?
            .ok_or(IngestError::UploadNotFound(self.upload_id))?;

        if !ctx.store.start_processing(upload.id).await? {
            info!(upload_id = %upload.id, status = upload.status.as_str(), "Upload is closed, skipping import");
            return Ok(());
        }

        let result = self.import(ctx, &upload.storage_path).await;
        fail_on_fatal(ctx, upload.id, result).await
    }

    async fn import(&self, ctx: &JobContext, storage_path: &str) -> IngestResult<()> {
        let path = ctx.storage.resolve(storage_path)?;
        if !path.exists() {
            return Err(IngestError::SourceFileMissing(path));
        }

        let format = SourceFormat::from_path(&path)?;
        let chunk_size = match format {
            SourceFormat::Csv => ctx.config.csv_chunk_size,
            SourceFormat::Spreadsheet => ctx.config.spreadsheet_chunk_size,
        };

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

        let summary = run_sequential(
            ctx,
            source,
            &layout,
            SequentialRun {
                upload_id: self.upload_id,
                chunk_size,
                mode: WriteMode::Upsert,
                checkpoint_interval: None,
            },
        )
        .await?;

        info!(
            upload_id = %self.upload_id,
            chunks = summary.chunks,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            malformed = summary.malformed,
            fallback_chunks = summary.fallback_chunks,
            "Import finished"
        );

        reconcile(&*ctx.store, self.upload_id, true).await?;
        Ok(())
    }
}
