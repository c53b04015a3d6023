use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::super::error::UploadFeatureError;
use crate::ingest::store::DeleteProgressStore;
use crate::ingest::IngestStore;
use crate::models::DeleteProgress;

/// Progress of a delete operation. For upload deletes the operation id is
/// the upload id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDeleteProgressQuery {
    pub operation_id: Uuid,
}

impl Request<Result<DeleteProgress, UploadFeatureError>> for GetDeleteProgressQuery {}

#[tracing::instrument(skip(store))]
pub async fn handle(
    store: &dyn IngestStore,
    query: GetDeleteProgressQuery,
) -> Result<DeleteProgress, UploadFeatureError> {
    store
        .get_delete_progress(query.operation_id)
        .await?
        .ok_or(UploadFeatureError::OperationNotFound(query.operation_id))
}
