//! Upload API routes
//!
//! - `POST /api/v1/uploads` - Upload a CSV or spreadsheet (multipart `file`)
//! - `GET /api/v1/uploads` - List uploads with pagination and status filter
//! - `GET /api/v1/uploads/:id` - Upload status and percentage
//! - `POST /api/v1/uploads/:id/cancel` - Cancel a pending or processing upload
//! - `DELETE /api/v1/uploads/:id` - Queue deletion of an upload and its rows
//! - `GET /api/v1/uploads/:id/delete-progress` - Progress of that deletion
//! - `GET /api/v1/uploads/:id/rows` - Stored rows, filterable by EIN, state, NTEE code
//! - `GET /api/v1/delete-progress/:id` - Progress of any delete operation
//! - `POST /api/v1/irs-bmf/sync` - Queue an IRS BMF sync
//! - `POST /api/v1/rows/bulk-delete` - Queue deletion of selected rows

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;

use super::commands::{
    self, BulkDeleteRowsCommand, CancelUploadCommand, CreateUploadCommand, DeleteUploadCommand,
    SyncIrsBmfCommand,
};
use super::queries::{
    self, GetDeleteProgressQuery, GetUploadQuery, ListRowsQuery, ListUploadsQuery,
};
use crate::api::response::ApiResponse;
use crate::error::{ApiResult, AppError};
use crate::features::FeatureState;

/// Largest accepted multipart body
pub const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

pub fn uploads_routes() -> Router<FeatureState> {
    Router::new()
        .route(
            "/uploads",
            post(create_upload)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
                .get(list_uploads),
        )
        .route("/uploads/:id", get(get_upload).delete(delete_upload))
        .route("/uploads/:id/cancel", post(cancel_upload))
        .route("/uploads/:id/delete-progress", get(get_delete_progress))
        .route("/uploads/:id/rows", get(list_rows))
        .route("/delete-progress/:id", get(get_delete_progress))
        .route("/irs-bmf/sync", post(sync_irs_bmf))
        .route("/rows/bulk-delete", post(bulk_delete_rows))
}

// ============================================================================
// Command Handlers
// ============================================================================

#[tracing::instrument(skip(state, multipart))]
async fn create_upload(
    State(state): State<FeatureState>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name().unwrap_or("") != "file" {
            continue;
        }
        let name = field.file_name().unwrap_or("").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file bytes: {}", e)))?;
        file = Some((name, data.to_vec()));
    }

    let (original_name, content) = file
        .ok_or_else(|| AppError::BadRequest("No file field found in multipart data".into()))?;

    let view = commands::create::handle(
        state.store.as_ref(),
        &state.storage,
        state.dispatcher.as_ref(),
        CreateUploadCommand {
            original_name,
            content,
        },
    )
    .await?;

    tracing::info!(upload_id = %view.upload.id, "Upload accepted via API");
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))).into_response())
}

#[tracing::instrument(skip(state))]
async fn cancel_upload(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let view = commands::cancel::handle(state.store.as_ref(), CancelUploadCommand { id }).await?;
    Ok(ApiResponse::success(view).into_response())
}

#[tracing::instrument(skip(state))]
async fn delete_upload(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let accepted = commands::delete::handle(
        state.store.as_ref(),
        state.dispatcher.as_ref(),
        DeleteUploadCommand { id },
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(accepted))).into_response())
}

#[tracing::instrument(skip(state))]
async fn sync_irs_bmf(
    State(state): State<FeatureState>,
    Json(command): Json<SyncIrsBmfCommand>,
) -> ApiResult<Response> {
    let response = commands::sync_irs::handle(
        state.store.as_ref(),
        &state.storage,
        state.dispatcher.as_ref(),
        &state.ingest,
        command,
    )
    .await?;

    tracing::info!(sources = response.uploads.len(), "IRS BMF sync queued via API");
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(response))).into_response())
}

#[tracing::instrument(skip(state, command), fields(count = command.ids.len()))]
async fn bulk_delete_rows(
    State(state): State<FeatureState>,
    Json(command): Json<BulkDeleteRowsCommand>,
) -> ApiResult<Response> {
    let accepted = commands::bulk_delete::handle(
        state.store.as_ref(),
        state.dispatcher.as_ref(),
        command,
    )
    .await?;
    Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(accepted))).into_response())
}

// ============================================================================
// Query Handlers
// ============================================================================

#[tracing::instrument(skip(state))]
async fn get_upload(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let view = queries::get::handle(state.store.as_ref(), GetUploadQuery { id }).await?;
    Ok(ApiResponse::success(view).into_response())
}

#[tracing::instrument(skip(state))]
async fn list_uploads(
    State(state): State<FeatureState>,
    Query(query): Query<ListUploadsQuery>,
) -> ApiResult<Response> {
    let response = queries::list::handle(state.db.clone(), query).await?;
    let meta = json!({ "pagination": response.pagination });
    Ok(ApiResponse::success_with_meta(response.items, meta).into_response())
}

#[tracing::instrument(skip(state))]
async fn list_rows(
    State(state): State<FeatureState>,
    Path(id): Path<Uuid>,
    Query(mut query): Query<ListRowsQuery>,
) -> ApiResult<Response> {
    query.upload_id = id;
    let response = queries::list_rows::handle(state.db.clone(), query).await?;
    let meta = json!({ "pagination": response.pagination });
    Ok(ApiResponse::success_with_meta(response.items, meta).into_response())
}

#[tracing::instrument(skip(state))]
async fn get_delete_progress(
    State(state): State<FeatureState>,
    Path(operation_id): Path<Uuid>,
) -> ApiResult<Response> {
    let progress = queries::delete_progress::handle(
        state.store.as_ref(),
        GetDeleteProgressQuery { operation_id },
    )
    .await?;
    Ok(ApiResponse::success(progress).into_response())
}
