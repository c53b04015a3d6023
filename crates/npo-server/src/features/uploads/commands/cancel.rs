use mediator::Request;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::super::error::{UploadFeatureError, UploadView};
use crate::ingest::store::UploadStore;
use crate::ingest::IngestStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelUploadCommand {
    pub id: Uuid,
}

impl Request<Result<UploadView, UploadFeatureError>> for CancelUploadCommand {}

/// Cancel a pending or processing upload. Chunk work that already
/// committed is kept; queued chunks skip the cancelled upload.
#[tracing::instrument(skip(store))]
pub async fn handle(
    store: &dyn IngestStore,
    command: CancelUploadCommand,
) -> Result<UploadView, UploadFeatureError> {
    let upload = store
        .get_upload(command.id)
        .await?
        .ok_or(UploadFeatureError::NotFound(command.id))?;

    if !store.cancel_upload(command.id).await? {
        return Err(UploadFeatureError::not_active(command.id, upload.status));
    }

    info!(upload_id = %command.id, "Upload cancelled");

    let upload = store
        .get_upload(command.id)
        .await?
        .ok_or(UploadFeatureError::NotFound(command.id))?;
    Ok(upload.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::jobs::tests::harness;
    use crate::models::{NewUpload, UploadStatus};

    #[tokio::test]
    async fn test_cancel_pending_upload() {
        let h = harness();
        let upload = h
            .store
            .create_upload(NewUpload::user_upload("a.csv", "uploads/a.csv"))
            .await
            .unwrap();

        let view = handle(h.store.as_ref(), CancelUploadCommand { id: upload.id })
            .await
            .unwrap();
        assert_eq!(view.upload.status, UploadStatus::Cancelled);

        let again = handle(h.store.as_ref(), CancelUploadCommand { id: upload.id }).await;
        assert!(matches!(again, Err(UploadFeatureError::NotActive(_, "cancelled"))));
    }

    #[tokio::test]
    async fn test_cancel_unknown_upload() {
        let h = harness();
        let result = handle(h.store.as_ref(), CancelUploadCommand { id: Uuid::new_v4() }).await;
        assert!(matches!(result, Err(UploadFeatureError::NotFound(_))));
    }
}
