//! Remote source downloader
//!
//! Streams an IRS BMF extract to a local file with a request timeout and a
//! fixed number of attempts, backing off exponentially between them.

use reqwest::Client;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::config::IngestConfig;
use super::error::{IngestError, IngestResult};

/// A finished download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
    /// Hex SHA-256 of the content
    pub checksum: String,
}

pub struct BmfDownloader {
    client: Client,
    max_attempts: u32,
    backoff: Duration,
}

impl BmfDownloader {
    pub fn new(config: &IngestConfig) -> IngestResult<Self> {
        let client = Client::builder()
            .timeout(config.download_timeout())
            .user_agent(concat!("npo-registry-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            max_attempts: config.download_max_retries.max(1),
            backoff: Duration::from_millis(config.download_backoff_ms),
        })
    }

    /// Download `url` into `dest`, replacing any partial file left by an earlier attempt
    pub async fn download_to(&self, url: &str, dest: &Path) -> IngestResult<DownloadedFile> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.download_once(url, dest).await {
                Ok(file) => {
                    info!(
                        url,
                        bytes = file.bytes,
                        attempt,
                        "Downloaded remote source"
                    );
                    return Ok(file);
                }
                Err(e) => {
                    warn!(url, attempt, max_attempts = self.max_attempts, error = %e, "Download attempt failed");
                    last_error = e.to_string();
                    let _ = tokio::fs::remove_file(dest).await;

                    if attempt < self.max_attempts {
                        let delay = self.backoff * 2u32.saturating_pow(attempt - 1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(IngestError::Download {
            url: url.to_string(),
            attempts: self.max_attempts,
            message: last_error,
        })
    }

    async fn download_once(&self, url: &str, dest: &Path) -> IngestResult<DownloadedFile> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut bytes: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(DownloadedFile {
            path: dest.to_path_buf(),
            bytes,
            checksum: format!("{:x}", hasher.finalize()),
        })
    }
}
