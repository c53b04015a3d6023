//! End-to-end ingestion against Postgres: upload import, IRS BMF sync, delete

mod common;

use anyhow::Result;
use common::{bmf_csv, TestPostgres};
use npo_server::db::PgStore;
use npo_server::features::uploads::commands::{
    self, CreateUploadCommand, DeleteUploadCommand, SyncIrsBmfCommand,
};
use npo_server::ingest::store::{DeleteProgressStore, UploadStore};
use npo_server::ingest::{drain, IngestConfig, JobContext, LocalQueue};
use npo_server::models::{DeleteStatus, UploadStatus};
use npo_server::storage::{FileStorage, StorageConfig};
use serial_test::serial;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[ctor::ctor]
fn init() {
    common::init_tracing();
}

struct Pipeline {
    _dir: TempDir,
    store: Arc<PgStore>,
    queue: Arc<LocalQueue>,
    ctx: JobContext,
}

fn pipeline(pg: &TestPostgres, config: IngestConfig) -> Result<Pipeline> {
    let dir = TempDir::new()?;
    let store = Arc::new(PgStore::new(pg.pool().clone()));
    let queue = Arc::new(LocalQueue::new(config.limits.clone()));
    let ctx = JobContext::new(
        store.clone(),
        FileStorage::new(StorageConfig::at(dir.path())),
        Arc::new(config),
        queue.clone(),
    );
    Ok(Pipeline {
        _dir: dir,
        store,
        queue,
        ctx,
    })
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_upload_import_and_delete() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let p = pipeline(
        &pg,
        IngestConfig {
            csv_chunk_size: 2,
            ..IngestConfig::default()
        },
    )?;

    let view = commands::create::handle(
        p.store.as_ref(),
        &p.ctx.storage,
        p.queue.as_ref(),
        CreateUploadCommand {
            original_name: "orgs.csv".into(),
            content: bmf_csv(&["111111111", "222222222", "333333333", "111111111"]).into_bytes(),
        },
    )
    .await?;

    let report = drain(p.queue.as_ref(), &p.ctx).await?;
    assert_eq!(report.failed, 0);

    let upload = p.store.get_upload(view.upload.id).await?.expect("upload exists");
    assert_eq!(upload.status, UploadStatus::Completed);
    assert_eq!(upload.total_rows, 4);
    assert_eq!(upload.processed_rows, 4);
    assert_eq!(upload.total_chunks, 2);

    // Header marker plus three distinct EINs; the repeat in chunk 1 matches chunk 0's row
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM excel_data WHERE file_id = $1")
        .bind(upload.id)
        .fetch_one(pg.pool())
        .await?;
    assert_eq!(rows, 4);

    commands::delete::handle(
        p.store.as_ref(),
        p.queue.as_ref(),
        DeleteUploadCommand { id: upload.id },
    )
    .await?;
    drain(p.queue.as_ref(), &p.ctx).await?;

    assert!(p.store.get_upload(upload.id).await?.is_none());
    let progress = p
        .store
        .get_delete_progress(upload.id)
        .await?
        .expect("progress recorded");
    assert_eq!(progress.status, DeleteStatus::Completed);
    assert_eq!(progress.percent, 100);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_irs_sync_with_chunk_fan_out() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let server = MockServer::start().await;
    let eins: Vec<String> = (0..250).map(|i| format!("{:09}", 100_000_000 + i)).collect();
    let ein_refs: Vec<&str> = eins.iter().map(String::as_str).collect();
    Mock::given(method("GET"))
        .and(path("/eo_xx.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(bmf_csv(&ein_refs)))
        .mount(&server)
        .await;

    let p = pipeline(&pg, IngestConfig::default())?;
    let response = commands::sync_irs::handle(
        p.store.as_ref(),
        &p.ctx.storage,
        p.queue.as_ref(),
        &p.ctx.config,
        SyncIrsBmfCommand {
            source_url: Some(format!("{}/eo_xx.csv", server.uri())),
            update_only: false,
            dispatch_chunks: true,
            chunk_size: Some(100),
        },
    )
    .await?;

    let report = drain(p.queue.as_ref(), &p.ctx).await?;
    assert_eq!(report.failed, 0);
    // Source job plus three chunk jobs
    assert_eq!(report.completed, 4);

    let id = response.uploads[0].upload.id;
    let upload = p.store.get_upload(id).await?.expect("upload exists");
    assert_eq!(upload.status, UploadStatus::Completed);
    assert_eq!(upload.processed_rows, 250);
    assert_eq!(upload.processed_chunks, 3);

    let distinct: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT ein) FROM excel_data WHERE file_id = $1 AND is_header = FALSE",
    )
    .bind(id)
    .fetch_one(pg.pool())
    .await?;
    assert_eq!(distinct, 250);
    Ok(())
}
