use mediator::Request;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::super::error::UploadFeatureError;
use super::DeleteAccepted;
use crate::ingest::jobs::{DeleteUploadedFile, Job};
use crate::ingest::store::{DeleteProgressStore, UploadStore};
use crate::ingest::{IngestStore, JobDispatcher};
use crate::models::DeleteProgress;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUploadCommand {
    pub id: Uuid,
}

impl Request<Result<DeleteAccepted, UploadFeatureError>> for DeleteUploadCommand {}

/// Queue removal of an upload with its rows, notes and stored file.
/// The delete operation id is the upload id.
#[tracing::instrument(skip(store, dispatcher))]
pub async fn handle(
    store: &dyn IngestStore,
    dispatcher: &dyn JobDispatcher,
    command: DeleteUploadCommand,
) -> Result<DeleteAccepted, UploadFeatureError> {
    if store.get_upload(command.id).await?.is_none() {
        return Err(UploadFeatureError::NotFound(command.id));
    }

    store
        .save_delete_progress(&DeleteProgress::running(command.id, 0, "queued"))
        .await?;

    let job_id = dispatcher
        .dispatch(Job::DeleteUploadedFile(DeleteUploadedFile {
            upload_id: command.id,
        }))
        .await?;

    info!(upload_id = %command.id, %job_id, "Upload deletion queued");
    Ok(DeleteAccepted {
        operation_id: command.id,
        job_id,
    })
}
