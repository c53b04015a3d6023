//! Register an uploaded spreadsheet and queue its import

use mediator::Request;
use std::path::Path;
use tracing::{info, warn};

use super::super::error::{UploadFeatureError, UploadView};
use crate::ingest::jobs::{Job, ProcessExcelFile};
use crate::ingest::reader::SourceFormat;
use crate::ingest::store::UploadStore;
use crate::ingest::{IngestStore, JobDispatcher};
use crate::models::NewUpload;
use crate::storage::FileStorage;

const MAX_NAME_LENGTH: usize = 255;

#[derive(Debug, Clone)]
pub struct CreateUploadCommand {
    pub original_name: String,
    pub content: Vec<u8>,
}

impl Request<Result<UploadView, UploadFeatureError>> for CreateUploadCommand {}

impl CreateUploadCommand {
    pub fn validate(&self) -> Result<(), UploadFeatureError> {
        let name = self.original_name.trim();
        if name.is_empty() {
            return Err(UploadFeatureError::Validation("File name is required".into()));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(UploadFeatureError::Validation(format!(
                "File name must be at most {} characters",
                MAX_NAME_LENGTH
            )));
        }
        SourceFormat::from_path(Path::new(name))
            .map_err(|e| UploadFeatureError::Validation(e.to_string()))?;
        if self.content.is_empty() {
            return Err(UploadFeatureError::Validation("Uploaded file is empty".into()));
        }
        Ok(())
    }
}

#[tracing::instrument(
    skip(store, storage, dispatcher, command),
    fields(name = %command.original_name, size = command.content.len())
)]
pub async fn handle(
    store: &dyn IngestStore,
    storage: &FileStorage,
    dispatcher: &dyn JobDispatcher,
    command: CreateUploadCommand,
) -> Result<UploadView, UploadFeatureError> {
    command.validate()?;

    let name = command.original_name.trim();
    let mut new = NewUpload::user_upload(name, "");
    new.storage_path = storage.upload_key(new.id, name);

    let saved = storage.save(&new.storage_path, &command.content).await?;
    let upload = store.create_upload(new.with_checksum(saved.checksum)).await?;

    let job = Job::ProcessExcelFile(ProcessExcelFile {
        upload_id: upload.id,
    });
    if let Err(e) = dispatcher.dispatch(job).await {
        warn!(upload_id = %upload.id, error = %e, "Could not queue import");
        store
            .mark_failed(upload.id, &format!("could not queue import: {}", e))
            .await?;
        return Err(e.into());
    }

    info!(upload_id = %upload.id, key = %saved.key, "Upload registered");
    Ok(upload.into())
}
