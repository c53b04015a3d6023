use mediator::Request;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::super::error::{UploadFeatureError, UploadView};
use crate::ingest::store::UploadStore;
use crate::ingest::IngestStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUploadQuery {
    pub id: Uuid,
}

impl Request<Result<UploadView, UploadFeatureError>> for GetUploadQuery {}

#[tracing::instrument(skip(store))]
pub async fn handle(
    store: &dyn IngestStore,
    query: GetUploadQuery,
) -> Result<UploadView, UploadFeatureError> {
    store
        .get_upload(query.id)
        .await?
        .map(UploadView::from)
        .ok_or(UploadFeatureError::NotFound(query.id))
}
