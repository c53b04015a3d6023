//! Job queue seams
//!
//! Jobs enqueue follow-up work through [`JobDispatcher`]. Workers drive a
//! [`JobQueue`]: `db::PgJobQueue` in the server, [`LocalQueue`] for inline
//! runs from the CLI and in tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use super::config::{JobLimits, JobLimitsConfig};
use super::error::IngestResult;
use super::jobs::Job;

/// Base delay before a failed job becomes claimable again
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(5);
/// Upper bound of the retry delay
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(600);

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: Job) -> IngestResult<Uuid>;
}

/// A job handed to a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: Job,
    /// Attempts including the current one
    pub attempts: i32,
    pub max_attempts: i32,
    pub timeout_secs: i32,
}

impl QueuedJob {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1) as u64)
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// What happened to a job after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    Retrying { delay: Duration },
    Permanent,
}

/// Result of returning expired locks to the queue
#[derive(Debug, Default)]
pub struct ReclaimReport {
    pub requeued: u64,
    /// Jobs whose expired attempt was their last one
    pub exhausted: Vec<QueuedJob>,
}

#[async_trait]
pub trait JobQueue: JobDispatcher {
    /// Lock the next available job for `worker`
    async fn claim(&self, worker: &str) -> IngestResult<Option<QueuedJob>>;

    async fn complete(&self, id: Uuid) -> IngestResult<()>;

    /// Retry with backoff while attempts remain and the error is retryable,
    /// otherwise fail permanently
    async fn fail(
        &self,
        job: &QueuedJob,
        error: &str,
        retryable: bool,
    ) -> IngestResult<FailureDisposition>;

    /// Release running jobs whose lock outlived their timeout
    async fn reclaim_stale(&self) -> IngestResult<ReclaimReport>;
}

/// Exponential retry delay after `attempts` failed attempts
pub fn retry_delay(attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, 16) as u32;
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(RETRY_MAX_DELAY)
}

/// Retry budget and timeout for a job
pub fn limits_for(job: &Job, limits: &JobLimitsConfig) -> JobLimits {
    match job {
        Job::ProcessExcelFile(_) => limits.excel_import,
        Job::ProcessIrsBmfSource(_) => limits.irs_source,
        Job::ProcessIrsBmfChunk(_) => limits.irs_chunk,
        Job::BulkDeleteExcelData(_) | Job::DeleteUploadedFile(_) => limits.delete,
    }
}

#[derive(Default)]
struct LocalState {
    pending: VecDeque<QueuedJob>,
    running: Vec<QueuedJob>,
    completed: Vec<Uuid>,
    failed: Vec<(QueuedJob, String)>,
}

/// In-process FIFO queue without delays between retries
#[derive(Default)]
pub struct LocalQueue {
    limits: JobLimitsConfig,
    state: Mutex<LocalState>,
}

impl LocalQueue {
    pub fn new(limits: JobLimitsConfig) -> Self {
        Self {
            limits,
            state: Mutex::new(LocalState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn pending_jobs(&self) -> Vec<Job> {
        self.lock().pending.iter().map(|q| q.job.clone()).collect()
    }

    pub fn completed_len(&self) -> usize {
        self.lock().completed.len()
    }

    /// Permanently failed jobs and their last error
    pub fn failed_jobs(&self) -> Vec<(Job, String)> {
        self.lock()
            .failed
            .iter()
            .map(|(q, e)| (q.job.clone(), e.clone()))
            .collect()
    }
}

#[async_trait]
impl JobDispatcher for LocalQueue {
    async fn dispatch(&self, job: Job) -> IngestResult<Uuid> {
        let limits = limits_for(&job, &self.limits);
        let id = Uuid::new_v4();
        self.lock().pending.push_back(QueuedJob {
            id,
            job,
            attempts: 0,
            max_attempts: limits.max_attempts as i32,
            timeout_secs: limits.timeout_secs.min(i32::MAX as u64) as i32,
        });
        Ok(id)
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn claim(&self, _worker: &str) -> IngestResult<Option<QueuedJob>> {
        let mut state = self.lock();
        let Some(mut job) = state.pending.pop_front() else {
            return Ok(None);
        };
        job.attempts += 1;
        state.running.push(job.clone());
        Ok(Some(job))
    }

    async fn complete(&self, id: Uuid) -> IngestResult<()> {
        let mut state = self.lock();
        state.running.retain(|j| j.id != id);
        state.completed.push(id);
        Ok(())
    }

    async fn fail(
        &self,
        job: &QueuedJob,
        error: &str,
        retryable: bool,
    ) -> IngestResult<FailureDisposition> {
        let mut state = self.lock();
        state.running.retain(|j| j.id != job.id);
        if !retryable || job.is_last_attempt() {
            state.failed.push((job.clone(), error.to_string()));
            Ok(FailureDisposition::Permanent)
        } else {
            state.pending.push_back(job.clone());
            Ok(FailureDisposition::Retrying {
                delay: Duration::ZERO,
            })
        }
    }

    async fn reclaim_stale(&self) -> IngestResult<ReclaimReport> {
        Ok(ReclaimReport::default())
    }
}
