use mediator::Request;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::super::error::UploadFeatureError;
use super::DeleteAccepted;
use crate::ingest::jobs::{BulkDeleteExcelData, Job};
use crate::ingest::store::DeleteProgressStore;
use crate::ingest::{IngestStore, JobDispatcher};
use crate::models::DeleteProgress;

/// Row ids accepted by one bulk delete request
pub const MAX_BULK_DELETE_IDS: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDeleteRowsCommand {
    pub ids: Vec<i64>,
}

impl Request<Result<DeleteAccepted, UploadFeatureError>> for BulkDeleteRowsCommand {}

impl BulkDeleteRowsCommand {
    pub fn validate(&self) -> Result<(), UploadFeatureError> {
        if self.ids.is_empty() {
            return Err(UploadFeatureError::Validation("ids cannot be empty".into()));
        }
        if self.ids.len() > MAX_BULK_DELETE_IDS {
            return Err(UploadFeatureError::Validation(format!(
                "at most {} ids may be deleted at once",
                MAX_BULK_DELETE_IDS
            )));
        }
        if self.ids.iter().any(|&id| id <= 0) {
            return Err(UploadFeatureError::Validation("ids must be positive".into()));
        }
        Ok(())
    }
}

#[tracing::instrument(skip(store, dispatcher, command), fields(count = command.ids.len()))]
pub async fn handle(
    store: &dyn IngestStore,
    dispatcher: &dyn JobDispatcher,
    command: BulkDeleteRowsCommand,
) -> Result<DeleteAccepted, UploadFeatureError> {
    command.validate()?;

    let mut row_ids = command.ids;
    row_ids.sort_unstable();
    row_ids.dedup();

    let operation_id = Uuid::new_v4();
    store
        .save_delete_progress(&DeleteProgress::running(operation_id, 0, "queued"))
        .await?;

    let job_id = dispatcher
        .dispatch(Job::BulkDeleteExcelData(BulkDeleteExcelData {
            operation_id,
            row_ids,
        }))
        .await?;

    info!(%operation_id, %job_id, "Bulk delete queued");
    Ok(DeleteAccepted {
        operation_id,
        job_id,
    })
}
