//! Deletion jobs
//!
//! Notes always go before the rows they annotate. Progress is reported on
//! `delete_progress` with fixed phase weights.

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::JobContext;
use crate::ingest::error::IngestResult;
use crate::ingest::progress::DeletePhase;
use crate::ingest::store::{DeleteProgressStore, ExcelDataStore, UploadStore};
use crate::models::DeleteProgress;

async fn report(
    ctx: &JobContext,
    operation_id: Uuid,
    phase: DeletePhase,
    done: u64,
    total: u64,
) -> IngestResult<()> {
    ctx.store
        .save_delete_progress(&DeleteProgress::running(
            operation_id,
            phase.percent(done, total),
            phase.stage(),
        ))
        .await
}

/// Delete selected rows and their notes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteExcelData {
    pub operation_id: Uuid,
    pub row_ids: Vec<i64>,
}

impl BulkDeleteExcelData {
    pub async fn run(&self, ctx: &JobContext) -> IngestResult<()> {
        let batch_size = ctx.config.delete_batch_size.max(1);
        let batches: Vec<&[i64]> = self.row_ids.chunks(batch_size).collect();
        let total = batches.len() as u64;

        report(ctx, self.operation_id, DeletePhase::Notes, 0, total).await?;

        let mut notes_deleted = 0;
        for (done, batch) in batches.iter().enumerate() {
            notes_deleted += ctx.store.delete_notes_for_rows(batch).await?;
            report(ctx, self.operation_id, DeletePhase::Notes, done as u64 + 1, total).await?;
        }

        let mut rows_deleted = 0;
        for (done, batch) in batches.iter().enumerate() {
            rows_deleted += ctx.store.delete_rows(batch).await?;
            report(ctx, self.operation_id, DeletePhase::Rows, done as u64 + 1, total).await?;
        }

        info!(
            operation_id = %self.operation_id,
            requested = self.row_ids.len(),
            notes_deleted,
            rows_deleted,
            "Bulk delete finished"
        );

        ctx.store
            .save_delete_progress(&DeleteProgress::completed(
                self.operation_id,
                format!("Deleted {} rows and {} notes", rows_deleted, notes_deleted),
            ))
            .await
    }
}

/// Delete an upload with all of its rows, notes, and stored file.
/// The operation id is the upload id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteUploadedFile {
    pub upload_id: Uuid,
}

impl DeleteUploadedFile {
    pub async fn run(&self, ctx: &JobContext) -> IngestResult<()> {
        let id = self.upload_id;
        let batch_size = ctx.config.delete_batch_size.max(1);

        let Some(upload) = ctx.store.get_upload(id).await? else {
            info!(upload_id = %id, "Upload already deleted");
            return ctx
                .store
                .save_delete_progress(&DeleteProgress::completed(id, "Upload already deleted"))
                .await;
        };

        if ctx.store.cancel_upload(id).await? {
            info!(upload_id = %id, "Cancelled running upload before deletion");
        }

        let total_notes = ctx.store.count_notes_for_upload(id).await?;
        report(ctx, id, DeletePhase::Notes, 0, total_notes).await?;
        let mut notes_deleted = 0;
        loop {
            let deleted = ctx.store.delete_notes_for_upload(id, batch_size).await?;
            if deleted == 0 {
                break;
            }
            notes_deleted += deleted;
            report(ctx, id, DeletePhase::Notes, notes_deleted, total_notes).await?;
        }
        report(ctx, id, DeletePhase::Notes, total_notes, total_notes).await?;

        let total_rows = ctx.store.count_rows_for_upload(id).await?;
        let mut rows_deleted = 0;
        loop {
            let deleted = ctx.store.delete_rows_for_upload(id, batch_size).await?;
            if deleted == 0 {
                break;
            }
            rows_deleted += deleted;
            report(ctx, id, DeletePhase::Rows, rows_deleted, total_rows).await?;
        }
        report(ctx, id, DeletePhase::Rows, total_rows, total_rows).await?;

        ctx.storage.remove(&upload.storage_path).await?;
        report(ctx, id, DeletePhase::File, 1, 1).await?;

        ctx.store.delete_upload(id).await?;
        info!(upload_id = %id, notes_deleted, rows_deleted, "Upload deleted");

        ctx.store
            .save_delete_progress(&DeleteProgress::completed(
                id,
                format!("Deleted {} rows and {} notes", rows_deleted, notes_deleted),
            ))
            .await
    }
}
