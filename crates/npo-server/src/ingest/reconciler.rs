//! Completion and failure reconciliation of uploads

use tracing::{info, warn};
use uuid::Uuid;

use super::error::{IngestError, IngestResult};
use super::store::UploadStore;
use crate::models::{UploadStatus, UploadedFile};

/// Result of reconciling an upload after chunk work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// This call flipped the upload to completed
    Completed,
    /// This call flipped the upload to failed
    Failed,
    /// Rows are still outstanding
    InProgress,
    /// The upload was already in a terminal state
    Terminal(UploadStatus),
}

/// Compare processed rows with the expected total and settle the status.
///
/// With `is_final` the caller has no further chunks to run, so a shortfall
/// marks the upload failed.
pub async fn reconcile<S: UploadStore + ?Sized>(
    store: &S,
    upload_id: Uuid,
    is_final: bool,
) -> IngestResult<Reconciliation> {
    let upload = store
        .get_upload(upload_id)
        .await?
        .ok_or(IngestError::UploadNotFound(upload_id))?;

    if upload.status.is_terminal() {
        return Ok(Reconciliation::Terminal(upload.status));
    }

    if upload.processed_rows >= upload.total_rows {
        if store.mark_completed(upload_id).await? {
            info!(
                upload_id = %upload_id,
                processed_rows = upload.processed_rows,
                total_rows = upload.total_rows,
                "Upload completed"
            );
            return Ok(Reconciliation::Completed);
        }
        return current_state(store, &upload).await;
    }

    if is_final {
        let message = format!(
            "Processed {} of {} rows",
            upload.processed_rows, upload.total_rows
        );
        if store.mark_failed(upload_id, &message).await? {
            warn!(upload_id = %upload_id, %message, "Upload finished short of its total");
            return Ok(Reconciliation::Failed);
        }
        return current_state(store, &upload).await;
    }

    Ok(Reconciliation::InProgress)
}

async fn current_state<S: UploadStore + ?Sized>(
    store: &S,
    seen: &UploadedFile,
) -> IngestResult<Reconciliation> {
    let status = store
        .get_upload(seen.id)
        .await?
        .map(|u| u.status)
        .unwrap_or(seen.status);
    if status.is_terminal() {
        Ok(Reconciliation::Terminal(status))
    } else {
        Ok(Reconciliation::InProgress)
    }
}

/// Record a job-aborting error on the upload before handing it back to the queue
pub async fn mark_failed<S: UploadStore + ?Sized>(
    store: &S,
    upload_id: Uuid,
    error: &IngestError,
) -> IngestResult<()> {
    if store.mark_failed(upload_id, &error.to_string()).await? {
        warn!(upload_id = %upload_id, error = %error, "Upload marked failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::memory::MemoryStore;
    use crate::ingest::store::{ChunkWrite, ExcelDataStore, WriteMode};
    use crate::models::NewUpload;

    async fn upload_with_progress(store: &MemoryStore, total: i64, processed: i64) -> Uuid {
        let upload = store
            .create_upload(NewUpload::user_upload("a.csv", "uploads/a.csv"))
            .await
            .unwrap();
        store.start_processing(upload.id).await.unwrap();
        store.set_totals(upload.id, total, 1).await.unwrap();
        if processed > 0 {
            store
                .write_chunk(&ChunkWrite {
                    upload_id: upload.id,
                    chunk_index: 0,
                    rows: Vec::new(),
                    raw_row_count: processed,
                    malformed: 0,
                    mode: WriteMode::Upsert,
                })
                .await
                .unwrap();
        }
        upload.id
    }

    #[tokio::test]
    async fn test_completes_when_all_rows_processed() {
        let store = MemoryStore::new();
        let id = upload_with_progress(&store, 10, 10).await;

        assert_eq!(reconcile(&store, id, false).await.unwrap(), Reconciliation::Completed);
        assert_eq!(
            reconcile(&store, id, false).await.unwrap(),
            Reconciliation::Terminal(UploadStatus::Completed)
        );
    }

    #[tokio::test]
    async fn test_shortfall_fails_only_when_final() {
        let store = MemoryStore::new();
        let id = upload_with_progress(&store, 10, 4).await;

        assert_eq!(reconcile(&store, id, false).await.unwrap(), Reconciliation::InProgress);
        assert_eq!(reconcile(&store, id, true).await.unwrap(), Reconciliation::Failed);

        let upload = store.get_upload(id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Failed);
        assert_eq!(upload.error_message.as_deref(), Some("Processed 4 of 10 rows"));
    }

    #[tokio::test]
    async fn test_cancelled_upload_is_left_alone() {
        let store = MemoryStore::new();
        let id = upload_with_progress(&store, 10, 10).await;
        store.cancel_upload(id).await.unwrap();

        assert_eq!(
            reconcile(&store, id, true).await.unwrap(),
            Reconciliation::Terminal(UploadStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn test_mark_failed_records_message() {
        let store = MemoryStore::new();
        let id = upload_with_progress(&store, 10, 0).await;

        mark_failed(&store, id, &IngestError::MissingEinColumn).await.unwrap();
        let upload = store.get_upload(id).await.unwrap().unwrap();
        assert_eq!(upload.status, UploadStatus::Failed);
        assert_eq!(upload.error_message.as_deref(), Some("Header row has no EIN column"));
    }

    #[tokio::test]
    async fn test_missing_upload() {
        let store = MemoryStore::new();
        let err = reconcile(&store, Uuid::new_v4(), true).await.unwrap_err();
        assert!(matches!(err, IngestError::UploadNotFound(_)));
    }
}
