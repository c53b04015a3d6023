//! Postgres-backed job queue (`job_queue`)
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so any number of workers, in one
//! process or many, can poll the same table.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{error, warn};
use uuid::Uuid;

use crate::ingest::config::JobLimitsConfig;
use crate::ingest::error::IngestResult;
use crate::ingest::jobs::Job;
use crate::ingest::queue::{
    limits_for, retry_delay, FailureDisposition, JobDispatcher, JobQueue, QueuedJob, ReclaimReport,
};

/// Extra time past its timeout before a running job counts as abandoned
const RECLAIM_GRACE_SECS: i32 = 60;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    payload: serde_json::Value,
    attempts: i32,
    max_attempts: i32,
    timeout_secs: i32,
}

#[derive(Debug, sqlx::FromRow)]
struct ReclaimedRow {
    id: Uuid,
    payload: serde_json::Value,
    attempts: i32,
    max_attempts: i32,
    timeout_secs: i32,
    status: String,
}

fn decode(
    id: Uuid,
    payload: serde_json::Value,
    attempts: i32,
    max_attempts: i32,
    timeout_secs: i32,
) -> Result<QueuedJob, serde_json::Error> {
    Ok(QueuedJob {
        id,
        job: serde_json::from_value(payload)?,
        attempts,
        max_attempts,
        timeout_secs,
    })
}

#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    limits: JobLimitsConfig,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, limits: JobLimitsConfig) -> Self {
        Self { pool, limits }
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> IngestResult<()> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'failed', last_error = $2, locked_at = NULL, locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobDispatcher for PgJobQueue {
    async fn dispatch(&self, job: Job) -> IngestResult<Uuid> {
        let limits = limits_for(&job, &self.limits);
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO job_queue (id, kind, payload, max_attempts, timeout_secs)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(job.kind())
        .bind(serde_json::to_value(&job)?)
        .bind(limits.max_attempts as i32)
        .bind(limits.timeout_secs.min(i32::MAX as u64) as i32)
        .execute(&self.pool)
        .await?;

        tracing::debug!(job_id = %id, kind = job.kind(), "Job enqueued");
        Ok(id)
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn claim(&self, worker: &str) -> IngestResult<Option<QueuedJob>> {
        loop {
            let row = sqlx::query_as::<_, JobRow>(
                r#"
                UPDATE job_queue
                SET status = 'running', attempts = attempts + 1, locked_at = NOW(),
                    locked_by = $1, updated_at = NOW()
                WHERE id = (
                    SELECT id FROM job_queue
                    WHERE status = 'pending' AND available_at <= NOW()
                    ORDER BY available_at, created_at
                    FOR UPDATE SKIP LOCKED
                    LIMIT 1
                )
                RETURNING id, payload, attempts, max_attempts, timeout_secs
                "#,
            )
            .bind(worker)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else {
                return Ok(None);
            };

            match decode(row.id, row.payload, row.attempts, row.max_attempts, row.timeout_secs) {
                Ok(job) => return Ok(Some(job)),
                Err(e) => {
                    error!(job_id = %row.id, error = %e, "Undecodable job payload");
                    self.mark_failed(row.id, &format!("invalid payload: {}", e)).await?;
                }
            }
        }
    }

    async fn complete(&self, id: Uuid) -> IngestResult<()> {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'completed', locked_at = NULL, locked_by = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(
        &self,
        job: &QueuedJob,
        error: &str,
        retryable: bool,
    ) -> IngestResult<FailureDisposition> {
        if !retryable || job.is_last_attempt() {
            self.mark_failed(job.id, error).await?;
            return Ok(FailureDisposition::Permanent);
        }

        let delay = retry_delay(job.attempts);
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'pending', last_error = $2, locked_at = NULL, locked_by = NULL,
                available_at = NOW() + make_interval(secs => $3), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(error)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(FailureDisposition::Retrying { delay })
    }

    async fn reclaim_stale(&self) -> IngestResult<ReclaimReport> {
        let rows = sqlx::query_as::<_, ReclaimedRow>(
            r#"
            UPDATE job_queue
            SET status = CASE WHEN attempts >= max_attempts THEN 'failed' ELSE 'pending' END,
                last_error = 'lock expired',
                locked_at = NULL,
                locked_by = NULL,
                available_at = NOW(),
                updated_at = NOW()
            WHERE status = 'running'
              AND locked_at < NOW() - make_interval(secs => timeout_secs + $1)
            RETURNING id, payload, attempts, max_attempts, timeout_secs, status
            "#,
        )
        .bind(RECLAIM_GRACE_SECS)
        .fetch_all(&self.pool)
        .await?;

        let mut report = ReclaimReport::default();
        for row in rows {
            if row.status != "failed" {
                report.requeued += 1;
                continue;
            }
            match decode(row.id, row.payload, row.attempts, row.max_attempts, row.timeout_secs) {
                Ok(job) => report.exhausted.push(job),
                Err(e) => warn!(job_id = %row.id, error = %e, "Undecodable job payload"),
            }
        }
        Ok(report)
    }
}
