use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use super::super::error::{UploadFeatureError, UploadView};
use crate::db::uploads::UPLOAD_COLUMNS;
use crate::features::shared::{PaginationMetadata, PaginationParams};
use crate::models::upload::UploadedFileRecord;
use crate::models::{UploadStatus, UploadedFile};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListUploadsQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<UploadStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListUploadsResponse {
    pub items: Vec<UploadView>,
    pub pagination: PaginationMetadata,
}

impl Request<Result<ListUploadsResponse, UploadFeatureError>> for ListUploadsQuery {}

impl ListUploadsQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams::new(self.page, self.per_page)
    }

    pub fn validate(&self) -> Result<(), UploadFeatureError> {
        self.pagination()
            .validate()
            .map_err(|e| UploadFeatureError::Validation(e.to_string()))
    }
}

/// Uploads, newest first
#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: PgPool,
    query: ListUploadsQuery,
) -> Result<ListUploadsResponse, UploadFeatureError> {
    query.validate()?;
    let pagination = query.pagination();

    let status = query.status.map(|s| s.as_str());

    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM uploaded_files WHERE ($1::text IS NULL OR status = $1)",
    )
    .bind(status)
    .fetch_one(&pool)
    .await?;

    let records = sqlx::query_as::<_, UploadedFileRecord>(&format!(
        r#"
        SELECT {}
        FROM uploaded_files
        WHERE ($1::text IS NULL OR status = $1)
        ORDER BY created_at DESC, id
        LIMIT $2 OFFSET $3
        "#,
        UPLOAD_COLUMNS
    ))
    .bind(status)
    .bind(pagination.per_page())
    .bind(pagination.offset())
    .fetch_all(&pool)
    .await?;

    Ok(ListUploadsResponse {
        items: records
            .into_iter()
            .map(|r| UploadView::from(UploadedFile::from(r)))
            .collect(),
        pagination: PaginationMetadata::from_params(&pagination, total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_deserializes_status_filter() {
        let query: ListUploadsQuery =
            serde_json::from_value(serde_json::json!({ "page": 2, "status": "failed" })).unwrap();
        assert_eq!(query.pagination().page(), 2);
        assert_eq!(query.status, Some(UploadStatus::Failed));
        assert!(query.validate().is_ok());
    }
}
