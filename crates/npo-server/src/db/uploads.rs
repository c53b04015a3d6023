//! `uploaded_files` lifecycle

use async_trait::async_trait;
use uuid::Uuid;

use super::PgStore;
use crate::ingest::error::{IngestError, IngestResult};
use crate::ingest::store::UploadStore;
use crate::models::upload::UploadedFileRecord;
use crate::models::{NewUpload, UploadedFile};

pub(crate) const UPLOAD_COLUMNS: &str = "id, original_name, storage_path, source_kind, source_url, \
     checksum, status, total_rows, processed_rows, total_chunks, processed_chunks, \
     last_committed_chunk, error_message, started_at, completed_at, created_at, updated_at";

impl PgStore {
    async fn upload_exists(&self, id: Uuid) -> IngestResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM uploaded_files WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}

#[async_trait]
impl UploadStore for PgStore {
    async fn create_upload(&self, upload: NewUpload) -> IngestResult<UploadedFile> {
        let record = sqlx::query_as::<_, UploadedFileRecord>(&format!(
            r#"
            INSERT INTO uploaded_files (id, original_name, storage_path, source_kind, source_url, checksum)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(upload.id)
        .bind(&upload.original_name)
        .bind(&upload.storage_path)
        .bind(upload.source_kind.as_str())
        .bind(&upload.source_url)
        .bind(&upload.checksum)
        .fetch_one(&self.pool)
        .await?;

        Ok(record.into())
    }

    async fn get_upload(&self, id: Uuid) -> IngestResult<Option<UploadedFile>> {
        let record = sqlx::query_as::<_, UploadedFileRecord>(&format!(
            "SELECT {} FROM uploaded_files WHERE id = $1",
            UPLOAD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Into::into))
    }

    async fn start_processing(&self, id: Uuid) -> IngestResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE uploaded_files
            SET status = 'processing',
                error_message = NULL,
                completed_at = NULL,
                started_at = COALESCE(started_at, NOW()),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing', 'failed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 && !self.upload_exists(id).await? {
            return Err(IngestError::UploadNotFound(id));
        }
        Ok(updated > 0)
    }

    async fn set_totals(&self, id: Uuid, total_rows: i64, total_chunks: i32) -> IngestResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE uploaded_files
            SET total_rows = $2, total_chunks = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(total_rows)
        .bind(total_chunks)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(IngestError::UploadNotFound(id));
        }
        Ok(())
    }

    async fn is_chunk_committed(&self, id: Uuid, chunk_index: i32) -> IngestResult<bool> {
        let committed: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM upload_chunks WHERE file_id = $1 AND chunk_index = $2)",
        )
        .bind(id)
        .bind(chunk_index)
        .fetch_one(&self.pool)
        .await?;
        Ok(committed)
    }

    async fn mark_completed(&self, id: Uuid) -> IngestResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE uploaded_files
            SET status = 'completed', completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
              AND status IN ('pending', 'processing')
              AND processed_rows >= total_rows
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> IngestResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE uploaded_files
            SET status = 'failed', error_message = $2, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn cancel_upload(&self, id: Uuid) -> IngestResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE uploaded_files
            SET status = 'cancelled', updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    async fn delete_upload(&self, id: Uuid) -> IngestResult<bool> {
        let deleted = sqlx::query("DELETE FROM uploaded_files WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}
