//! `delete_progress` snapshots

use async_trait::async_trait;
use uuid::Uuid;

use super::PgStore;
use crate::ingest::error::IngestResult;
use crate::ingest::store::DeleteProgressStore;
use crate::models::progress::DeleteProgressRecord;
use crate::models::DeleteProgress;

#[async_trait]
impl DeleteProgressStore for PgStore {
    async fn save_delete_progress(&self, progress: &DeleteProgress) -> IngestResult<()> {
        sqlx::query(
            r#"
            INSERT INTO delete_progress (operation_id, percent, stage, status, message, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (operation_id) DO UPDATE
            SET percent = GREATEST(delete_progress.percent, EXCLUDED.percent),
                stage = EXCLUDED.stage,
                status = EXCLUDED.status,
                message = EXCLUDED.message,
                updated_at = NOW()
            "#,
        )
        .bind(progress.operation_id)
        .bind(progress.percent)
        .bind(&progress.stage)
        .bind(progress.status.as_str())
        .bind(&progress.message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_delete_progress(&self, operation_id: Uuid) -> IngestResult<Option<DeleteProgress>> {
        let record = sqlx::query_as::<_, DeleteProgressRecord>(
            r#"
            SELECT operation_id, percent, stage, status, message, updated_at
            FROM delete_progress
            WHERE operation_id = $1
            "#,
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }
}
