//! Ingestion configuration
//!
//! Chunk sizes, failure policy, download behaviour and per-job retry budgets,
//! loaded from `INGEST_*` environment variables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use super::error::IngestError;

/// Rows per chunk for CSV uploads
pub const DEFAULT_CSV_CHUNK_SIZE: usize = 1000;
/// Rows per chunk for spreadsheet uploads
pub const DEFAULT_SPREADSHEET_CHUNK_SIZE: usize = 500;
/// Rows per chunk for remote IRS BMF syncs
pub const DEFAULT_REMOTE_CHUNK_SIZE: usize = 500;
pub const MIN_REMOTE_CHUNK_SIZE: usize = 100;
pub const MAX_REMOTE_CHUNK_SIZE: usize = 1000;
/// Rows or notes removed per delete batch
pub const DEFAULT_DELETE_BATCH_SIZE: usize = 1000;
/// Long single-file syncs release buffers every this many chunks
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 10;

pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_DOWNLOAD_MAX_RETRIES: u32 = 3;
pub const DEFAULT_DOWNLOAD_BACKOFF_MS: u64 = 2000;

pub const DEFAULT_IRS_BMF_SOURCES: [&str; 4] = [
    "https://www.irs.gov/pub/irs-soi/eo1.csv",
    "https://www.irs.gov/pub/irs-soi/eo2.csv",
    "https://www.irs.gov/pub/irs-soi/eo3.csv",
    "https://www.irs.gov/pub/irs-soi/eo4.csv",
];

/// What to do when the transactional write of a chunk fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkFailurePolicy {
    /// Surface the error; the chunk writes nothing
    Reject,
    /// Insert every row of the chunk without dedup so ingestion keeps moving.
    /// May produce duplicate EINs.
    #[default]
    BestEffortInsert,
}

impl FromStr for ChunkFailurePolicy {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(ChunkFailurePolicy::Reject),
            "best_effort_insert" | "best-effort-insert" | "best_effort" => {
                Ok(ChunkFailurePolicy::BestEffortInsert)
            }
            other => Err(IngestError::Config(format!("unknown chunk failure policy: {}", other))),
        }
    }
}

/// Retry budget and timeout for one job kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLimits {
    pub max_attempts: u32,
    pub timeout_secs: u64,
}

impl JobLimits {
    pub const fn new(max_attempts: u32, timeout_secs: u64) -> Self {
        Self {
            max_attempts,
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Limits per job kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLimitsConfig {
    pub excel_import: JobLimits,
    pub irs_source: JobLimits,
    pub irs_chunk: JobLimits,
    pub delete: JobLimits,
}

impl Default for JobLimitsConfig {
    fn default() -> Self {
        Self {
            excel_import: JobLimits::new(3, 20 * 60),
            irs_source: JobLimits::new(2, 3 * 60 * 60),
            irs_chunk: JobLimits::new(3, 20 * 60),
            delete: JobLimits::new(3, 60 * 60),
        }
    }
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Whether the server runs queue workers
    pub enabled: bool,
    pub worker_count: usize,
    pub poll_interval_ms: u64,
    pub csv_chunk_size: usize,
    pub spreadsheet_chunk_size: usize,
    pub remote_chunk_size: usize,
    pub delete_batch_size: usize,
    pub checkpoint_interval: usize,
    pub on_chunk_failure: ChunkFailurePolicy,
    pub download_timeout_secs: u64,
    pub download_max_retries: u32,
    pub download_backoff_ms: u64,
    pub irs_bmf_sources: Vec<String>,
    pub limits: JobLimitsConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_count: 4,
            poll_interval_ms: 1000,
            csv_chunk_size: DEFAULT_CSV_CHUNK_SIZE,
            spreadsheet_chunk_size: DEFAULT_SPREADSHEET_CHUNK_SIZE,
            remote_chunk_size: DEFAULT_REMOTE_CHUNK_SIZE,
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            on_chunk_failure: ChunkFailurePolicy::default(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            download_max_retries: DEFAULT_DOWNLOAD_MAX_RETRIES,
            download_backoff_ms: DEFAULT_DOWNLOAD_BACKOFF_MS,
            irs_bmf_sources: DEFAULT_IRS_BMF_SOURCES.iter().map(|s| s.to_string()).collect(),
            limits: JobLimitsConfig::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> Result<Self, IngestError> {
        let defaults = Self::default();

        let on_chunk_failure = match std::env::var("INGEST_ON_CHUNK_FAILURE") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.on_chunk_failure,
        };

        let irs_bmf_sources = std::env::var("INGEST_IRS_BMF_SOURCES")
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.irs_bmf_sources);

        let limits = JobLimitsConfig {
            excel_import: JobLimits::new(
                env_or("INGEST_IMPORT_MAX_ATTEMPTS", defaults.limits.excel_import.max_attempts),
                env_or("INGEST_IMPORT_TIMEOUT_SECS", defaults.limits.excel_import.timeout_secs),
            ),
            irs_source: JobLimits::new(
                env_or("INGEST_SOURCE_MAX_ATTEMPTS", defaults.limits.irs_source.max_attempts),
                env_or("INGEST_SOURCE_TIMEOUT_SECS", defaults.limits.irs_source.timeout_secs),
            ),
            irs_chunk: JobLimits::new(
                env_or("INGEST_CHUNK_MAX_ATTEMPTS", defaults.limits.irs_chunk.max_attempts),
                env_or("INGEST_CHUNK_TIMEOUT_SECS", defaults.limits.irs_chunk.timeout_secs),
            ),
            delete: JobLimits::new(
                env_or("INGEST_DELETE_MAX_ATTEMPTS", defaults.limits.delete.max_attempts),
                env_or("INGEST_DELETE_TIMEOUT_SECS", defaults.limits.delete.timeout_secs),
            ),
        };

        let config = Self {
            enabled: env_or("INGEST_ENABLED", defaults.enabled),
            worker_count: env_or("INGEST_WORKER_COUNT", defaults.worker_count),
            poll_interval_ms: env_or("INGEST_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            csv_chunk_size: env_or("INGEST_CSV_CHUNK_SIZE", defaults.csv_chunk_size),
            spreadsheet_chunk_size: env_or(
                "INGEST_SPREADSHEET_CHUNK_SIZE",
                defaults.spreadsheet_chunk_size,
            ),
            remote_chunk_size: env_or("INGEST_REMOTE_CHUNK_SIZE", defaults.remote_chunk_size),
            delete_batch_size: env_or("INGEST_DELETE_BATCH_SIZE", defaults.delete_batch_size),
            checkpoint_interval: env_or("INGEST_CHECKPOINT_INTERVAL", defaults.checkpoint_interval),
            on_chunk_failure,
            download_timeout_secs: env_or(
                "INGEST_DOWNLOAD_TIMEOUT_SECS",
                defaults.download_timeout_secs,
            ),
            download_max_retries: env_or(
                "INGEST_DOWNLOAD_MAX_RETRIES",
                defaults.download_max_retries,
            ),
            download_backoff_ms: env_or("INGEST_DOWNLOAD_BACKOFF_MS", defaults.download_backoff_ms),
            irs_bmf_sources,
            limits,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.worker_count == 0 {
            return Err(IngestError::Config("INGEST_WORKER_COUNT must be greater than 0".into()));
        }
        if self.csv_chunk_size == 0 || self.spreadsheet_chunk_size == 0 {
            return Err(IngestError::Config("chunk sizes must be greater than 0".into()));
        }
        check_remote_chunk_size(self.remote_chunk_size)?;
        if self.delete_batch_size == 0 {
            return Err(IngestError::Config("INGEST_DELETE_BATCH_SIZE must be greater than 0".into()));
        }
        if self.download_max_retries == 0 {
            return Err(IngestError::Config(
                "INGEST_DOWNLOAD_MAX_RETRIES must be at least 1".into(),
            ));
        }
        for limits in [
            self.limits.excel_import,
            self.limits.irs_source,
            self.limits.irs_chunk,
            self.limits.delete,
        ] {
            if limits.max_attempts == 0 || limits.timeout_secs == 0 {
                return Err(IngestError::Config(
                    "job attempts and timeouts must be greater than 0".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }
}

/// Remote sync chunk sizes must stay within 100..=1000 rows
pub fn check_remote_chunk_size(size: usize) -> Result<usize, IngestError> {
    if (MIN_REMOTE_CHUNK_SIZE..=MAX_REMOTE_CHUNK_SIZE).contains(&size) {
        Ok(size)
    } else {
        Err(IngestError::Config(format!(
            "remote chunk size must be between {} and {}, got {}",
            MIN_REMOTE_CHUNK_SIZE, MAX_REMOTE_CHUNK_SIZE, size
        )))
    }
}
