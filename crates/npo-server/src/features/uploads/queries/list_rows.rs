//! Stored rows of one upload, filterable on the projected columns

use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::super::error::UploadFeatureError;
use crate::features::shared::{PaginationMetadata, PaginationParams};
use crate::models::ExcelDataRow;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRowsQuery {
    #[serde(skip)]
    pub upload_id: Uuid,
    pub ein: Option<String>,
    pub state: Option<String>,
    pub ntee_code: Option<String>,
    /// Include the header marker row
    #[serde(default)]
    pub include_header: bool,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// A stored row with its decoded cells
#[derive(Debug, Clone, Serialize)]
pub struct RowItem {
    pub id: i64,
    pub file_id: Uuid,
    pub cells: Vec<String>,
    pub ein: Option<String>,
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub ntee_code: Option<String>,
    pub is_header: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<ExcelDataRow> for RowItem {
    fn from(row: ExcelDataRow) -> Self {
        let cells = row.payload().unwrap_or_default();
        Self {
            id: row.id,
            file_id: row.file_id,
            cells,
            ein: row.ein,
            name: row.name,
            city: row.city,
            state: row.state,
            zip: row.zip,
            ntee_code: row.ntee_code,
            is_header: row.is_header,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListRowsResponse {
    pub items: Vec<RowItem>,
    pub pagination: PaginationMetadata,
}

impl Request<Result<ListRowsResponse, UploadFeatureError>> for ListRowsQuery {}

impl ListRowsQuery {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams::new(self.page, self.per_page)
    }

    pub fn validate(&self) -> Result<(), UploadFeatureError> {
        self.pagination()
            .validate()
            .map_err(|e| UploadFeatureError::Validation(e.to_string()))?;
        if let Some(state) = &self.state {
            if state.trim().len() != 2 {
                return Err(UploadFeatureError::Validation(
                    "state must be a two-letter code".into(),
                ));
            }
        }
        Ok(())
    }

    fn push_filters<'a>(&'a self, builder: &mut QueryBuilder<'a, Postgres>) {
        builder.push(" WHERE file_id = ").push_bind(self.upload_id);
        if !self.include_header {
            builder.push(" AND is_header = FALSE");
        }
        if let Some(ein) = &self.ein {
            builder.push(" AND ein = ").push_bind(ein.trim());
        }
        if let Some(state) = &self.state {
            builder
                .push(" AND state = ")
                .push_bind(state.trim().to_ascii_uppercase());
        }
        if let Some(ntee_code) = &self.ntee_code {
            builder.push(" AND ntee_code = ").push_bind(ntee_code.trim());
        }
    }
}

#[tracing::instrument(skip(pool))]
pub async fn handle(
    pool: PgPool,
    query: ListRowsQuery,
) -> Result<ListRowsResponse, UploadFeatureError> {
    query.validate()?;
    let pagination = query.pagination();

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM uploaded_files WHERE id = $1)")
            .bind(query.upload_id)
            .fetch_one(&pool)
            .await?;
    if !exists {
        return Err(UploadFeatureError::NotFound(query.upload_id));
    }

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM excel_data");
    query.push_filters(&mut count);
    let total: i64 = count.build_query_scalar::<i64>().fetch_one(&pool).await?;

    let mut select = QueryBuilder::<Postgres>::new(
        "SELECT id, file_id, row_data, ein, name, city, state, zip, ntee_code, is_header, \
         created_at, updated_at FROM excel_data",
    );
    query.push_filters(&mut select);
    select
        .push(" ORDER BY id LIMIT ")
        .push_bind(pagination.per_page())
        .push(" OFFSET ")
        .push_bind(pagination.offset());

    let rows = select
        .build_query_as::<ExcelDataRow>()
        .fetch_all(&pool)
        .await?;

    Ok(ListRowsResponse {
        items: rows.into_iter().map(RowItem::from).collect(),
        pagination: PaginationMetadata::from_params(&pagination, total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_filter_validation() {
        let query = ListRowsQuery {
            state: Some("NY".into()),
            ..Default::default()
        };
        assert!(query.validate().is_ok());

        let query = ListRowsQuery {
            state: Some("New York".into()),
            ..Default::default()
        };
        assert!(matches!(query.validate(), Err(UploadFeatureError::Validation(_))));
    }

    #[test]
    fn test_filters_render_in_order() {
        let query = ListRowsQuery {
            ein: Some("123456789".into()),
            ntee_code: Some("B20".into()),
            ..Default::default()
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM excel_data");
        query.push_filters(&mut builder);
        assert_eq!(
            builder.sql(),
            "SELECT COUNT(*) FROM excel_data WHERE file_id = $1 AND is_header = FALSE \
             AND ein = $2 AND ntee_code = $3"
        );
    }
}
