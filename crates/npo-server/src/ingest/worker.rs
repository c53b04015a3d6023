//! Queue worker pool
//!
//! Workers poll a [`JobQueue`], run each claimed job under its timeout and
//! hand failures back to the queue. Parallelism only exists across jobs.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::error::{IngestError, IngestResult};
use super::jobs::{self, JobContext};
use super::queue::{FailureDisposition, JobQueue, QueuedJob};

/// How often expired job locks are returned to the queue
pub const RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// What happened to one claimed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Retrying,
    Failed,
}

/// Totals of a [`drain`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Run one claimed job to completion, timeout, or failure
pub async fn run_claimed<Q: JobQueue + ?Sized>(
    queue: &Q,
    ctx: &JobContext,
    claimed: QueuedJob,
) -> IngestResult<RunOutcome> {
    let kind = claimed.job.kind();
    let timeout = claimed.timeout();
    info!(job_id = %claimed.id, kind, attempt = claimed.attempts, "Running job");

    let result = match tokio::time::timeout(timeout, jobs::execute(&claimed.job, ctx)).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::Timeout(timeout.as_secs())),
    };

    let err = match result {
        Ok(()) => {
            queue.complete(claimed.id).await?;
            info!(job_id = %claimed.id, kind, "Job completed");
            return Ok(RunOutcome::Completed);
        }
        Err(e) => e,
    };

    let message = err.to_string();
    match queue.fail(&claimed, &message, err.is_retryable()).await? {
        FailureDisposition::Retrying { delay } => {
            warn!(
                job_id = %claimed.id,
                kind,
                attempt = claimed.attempts,
                max_attempts = claimed.max_attempts,
                retry_in_secs = delay.as_secs(),
                error = %message,
                "Job failed, retrying"
            );
            Ok(RunOutcome::Retrying)
        }
        FailureDisposition::Permanent => {
            jobs::on_failed(&claimed.job, ctx, &message).await?;
            Ok(RunOutcome::Failed)
        }
    }
}

/// Run queued jobs inline until the queue is empty
pub async fn drain<Q: JobQueue + ?Sized>(queue: &Q, ctx: &JobContext) -> IngestResult<DrainReport> {
    let mut report = DrainReport::default();
    while let Some(claimed) = queue.claim("inline").await? {
        match run_claimed(queue, ctx, claimed).await? {
            RunOutcome::Completed => report.completed += 1,
            RunOutcome::Retrying => report.retried += 1,
            RunOutcome::Failed => report.failed += 1,
        }
    }
    Ok(report)
}

/// Pool of tokio tasks polling a queue
pub struct JobWorker {
    queue: Arc<dyn JobQueue>,
    ctx: JobContext,
    worker_count: usize,
    poll_interval: Duration,
    hostname: String,
}

impl JobWorker {
    pub fn new(queue: Arc<dyn JobQueue>, ctx: JobContext) -> Self {
        let worker_count = ctx.config.worker_count.max(1);
        let poll_interval = ctx.config.poll_interval();
        Self {
            queue,
            ctx,
            worker_count,
            poll_interval,
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    /// Spawn the workers and the reclaim task
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(self.worker_count + 1);

        for index in 0..self.worker_count {
            let name = format!("{}-{}", self.hostname, index);
            tasks.push(tokio::spawn(worker_loop(
                name,
                self.queue.clone(),
                self.ctx.clone(),
                self.poll_interval,
                shutdown_rx.clone(),
            )));
        }
        tasks.push(tokio::spawn(reclaim_loop(
            self.queue.clone(),
            self.ctx.clone(),
            shutdown_rx,
        )));

        info!(workers = self.worker_count, host = %self.hostname, "Job workers started");
        WorkerHandle { shutdown_tx, tasks }
    }
}

/// Handle to a running [`JobWorker`]
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Stop polling and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Job workers stopped");
    }
}

async fn worker_loop(
    name: String,
    queue: Arc<dyn JobQueue>,
    ctx: JobContext,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.claim(&name).await {
            Ok(Some(claimed)) => {
                let job_id = claimed.id;
                if let Err(e) = run_claimed(&*queue, &ctx, claimed).await {
                    error!(worker = %name, %job_id, error = %e, "Failed to settle job");
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                error!(worker = %name, error = %e, "Failed to claim job");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

async fn reclaim_loop(queue: Arc<dyn JobQueue>, ctx: JobContext, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(RECLAIM_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        match queue.reclaim_stale().await {
            Ok(report) => {
                if report.requeued > 0 {
                    warn!(requeued = report.requeued, "Requeued jobs with expired locks");
                }
                for job in report.exhausted {
                    let message = format!("timed out after {} attempt(s)", job.attempts);
                    if let Err(e) = jobs::on_failed(&job.job, &ctx, &message).await {
                        error!(job_id = %job.id, error = %e, "Failed to run failure hook");
                    }
                }
            }
            Err(e) => error!(error = %e, "Failed to reclaim stale jobs"),
        }
    }
}
