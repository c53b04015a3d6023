//! Queue a refresh of the registry from the IRS Business Master File

use mediator::Request;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::super::error::{UploadFeatureError, UploadView};
use crate::ingest::config::check_remote_chunk_size;
use crate::ingest::jobs::{Job, ProcessIrsBmfSource};
use crate::ingest::store::UploadStore;
use crate::ingest::{IngestConfig, IngestStore, JobDispatcher};
use crate::models::NewUpload;
use crate::storage::FileStorage;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncIrsBmfCommand {
    /// Single extract to sync; all configured sources when absent
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub update_only: bool,
    /// Fan chunks out as separate jobs instead of one sequential pass
    #[serde(default)]
    pub dispatch_chunks: bool,
    #[serde(default)]
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncIrsBmfResponse {
    pub uploads: Vec<UploadView>,
}

impl Request<Result<SyncIrsBmfResponse, UploadFeatureError>> for SyncIrsBmfCommand {}

impl SyncIrsBmfCommand {
    pub fn validate(&self) -> Result<(), UploadFeatureError> {
        if let Some(url) = &self.source_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(UploadFeatureError::Validation(
                    "source_url must start with http:// or https://".into(),
                ));
            }
        }
        if let Some(size) = self.chunk_size {
            check_remote_chunk_size(size)
                .map_err(|e| UploadFeatureError::Validation(e.to_string()))?;
        }
        Ok(())
    }

    fn sources(&self, config: &IngestConfig) -> Vec<String> {
        match &self.source_url {
            Some(url) => vec![url.clone()],
            None => config.irs_bmf_sources.clone(),
        }
    }
}

#[tracing::instrument(skip(store, storage, dispatcher, config))]
pub async fn handle(
    store: &dyn IngestStore,
    storage: &FileStorage,
    dispatcher: &dyn JobDispatcher,
    config: &IngestConfig,
    command: SyncIrsBmfCommand,
) -> Result<SyncIrsBmfResponse, UploadFeatureError> {
    command.validate()?;

    let sources = command.sources(config);
    if sources.is_empty() {
        return Err(UploadFeatureError::Validation("no IRS BMF sources configured".into()));
    }
    let chunk_size = command.chunk_size.unwrap_or(config.remote_chunk_size);

    let mut uploads = Vec::with_capacity(sources.len());
    for source_url in sources {
        let mut new = NewUpload::irs_bmf(source_url.as_str(), "");
        new.storage_path = storage.irs_bmf_key(new.id);
        let upload = store.create_upload(new).await?;

        dispatcher
            .dispatch(Job::ProcessIrsBmfSource(ProcessIrsBmfSource {
                upload_id: upload.id,
                source_url,
                chunk_size,
                update_only: command.update_only,
                dispatch_chunks: command.dispatch_chunks,
            }))
            .await?;

        info!(upload_id = %upload.id, "IRS BMF sync queued");
        uploads.push(upload.into());
    }

    Ok(SyncIrsBmfResponse { uploads })
}
