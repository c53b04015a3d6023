use sha2::{Digest, Sha256};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub mod config;

pub use config::StorageConfig;

/// Source files kept on a local directory, addressed by relative keys
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct SaveResult {
    pub key: String,
    pub checksum: String,
    pub size: u64,
}

impl FileStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self { root: config.root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Key for a user upload, keeping the original extension
    pub fn upload_key(&self, id: Uuid, original_name: &str) -> String {
        let ext = Path::new(original_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "csv".to_string());
        format!("uploads/{}.{}", id, ext)
    }

    /// Key for a downloaded IRS BMF extract
    pub fn irs_bmf_key(&self, id: Uuid) -> String {
        format!("irs_bmf/{}.csv", id)
    }

    /// Absolute path of a key; keys may not escape the root
    pub fn resolve(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if key.is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid storage key: {}", key),
            ));
        }
        Ok(self.root.join(relative))
    }

    #[instrument(skip(self, data))]
    pub async fn save(&self, key: &str, data: &[u8]) -> io::Result<SaveResult> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Writing {} bytes to {}", data.len(), path.display());
        tokio::fs::write(&path, data).await?;

        info!(key, size = data.len(), "Stored source file");
        Ok(SaveResult {
            key: key.to_string(),
            checksum: calculate_sha256(data),
            size: data.len() as u64,
        })
    }

    pub async fn exists(&self, key: &str) -> io::Result<bool> {
        tokio::fs::try_exists(self.resolve(key)?).await
    }

    /// Remove a stored file; a file that is already gone is not an error
    #[instrument(skip(self))]
    pub async fn remove(&self, key: &str) -> io::Result<bool> {
        match tokio::fs::remove_file(self.resolve(key)?).await {
            Ok(()) => {
                info!(key, "Removed source file");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key, "Source file already removed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
