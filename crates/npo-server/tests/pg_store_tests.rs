//! Postgres store tests: chunk dedup, ledger idempotency, lifecycle, deletes

mod common;

use anyhow::Result;
use common::{chunk, projected, TestPostgres};
use npo_server::db::PgStore;
use npo_server::ingest::projector::project_header;
use npo_server::ingest::store::{ExcelDataStore, UploadStore, WriteMode};
use npo_server::models::{NewUpload, UploadStatus};
use serial_test::serial;

#[ctor::ctor]
fn init() {
    common::init_tracing();
}

async fn new_upload(store: &PgStore, name: &str) -> Result<uuid::Uuid> {
    let upload = store
        .create_upload(NewUpload::user_upload(name, format!("uploads/{}", name)))
        .await?;
    Ok(upload.id)
}

async fn count_ein(store: &PgStore, ein: &str) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM excel_data WHERE ein = $1 AND is_header = FALSE")
        .bind(ein)
        .fetch_one(store.pool())
        .await?)
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_write_chunk_dedups_across_uploads() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    let first = new_upload(&store, "first.csv").await?;
    store.start_processing(first).await?;
    let outcome = store
        .write_chunk(&chunk(
            first,
            0,
            vec![projected("111111111", "ALPHA"), projected("222222222", "BETA")],
            WriteMode::Upsert,
        ))
        .await?;
    assert_eq!(outcome.inserted, 2);

    let second = new_upload(&store, "second.csv").await?;
    store.start_processing(second).await?;
    let outcome = store
        .write_chunk(&chunk(
            second,
            0,
            vec![projected("111111111", "ALPHA RENAMED"), projected("333333333", "GAMMA")],
            WriteMode::Upsert,
        ))
        .await?;
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.updated, 1);

    assert_eq!(count_ein(&store, "111111111").await?, 1);
    let (name, file_id): (Option<String>, uuid::Uuid) =
        sqlx::query_as("SELECT name, file_id FROM excel_data WHERE ein = '111111111'")
            .fetch_one(store.pool())
            .await?;
    assert_eq!(name.as_deref(), Some("ALPHA RENAMED"));
    assert_eq!(file_id, first);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_committed_chunk_is_not_reapplied() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    let id = new_upload(&store, "orgs.csv").await?;
    store.start_processing(id).await?;
    store.set_totals(id, 2, 1).await?;

    let write = chunk(
        id,
        0,
        vec![projected("111111111", "ALPHA"), projected("222222222", "BETA")],
        WriteMode::Upsert,
    );
    store.write_chunk(&write).await?;
    let replay = store.write_chunk(&write).await?;
    assert!(replay.already_committed);
    assert!(store.is_chunk_committed(id, 0).await?);

    let upload = store.get_upload(id).await?.expect("upload exists");
    assert_eq!(upload.processed_rows, 2);
    assert_eq!(upload.processed_chunks, 1);
    assert_eq!(upload.last_committed_chunk, Some(0));

    assert!(store.mark_completed(id).await?);
    let upload = store.get_upload(id).await?.expect("upload exists");
    assert_eq!(upload.status, UploadStatus::Completed);
    assert_eq!(upload.percent_complete(), 100.0);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_concurrent_chunks_with_shared_eins_keep_one_row_each() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    let eins: Vec<String> = (0..60).map(|i| format!("{:09}", 100_000_000 + i)).collect();
    let left = new_upload(&store, "left.csv").await?;
    let right = new_upload(&store, "right.csv").await?;

    // 0..40 and 20..60 overlap on 20 EINs, ordered differently
    let left_rows = eins[..40].iter().map(|e| projected(e, "LEFT")).collect();
    let right_rows = eins[20..].iter().rev().map(|e| projected(e, "RIGHT")).collect();
    let left_write = chunk(left, 0, left_rows, WriteMode::Upsert);
    let right_write = chunk(right, 0, right_rows, WriteMode::Upsert);

    let (a, b) = tokio::join!(store.write_chunk(&left_write), store.write_chunk(&right_write));
    let (a, b) = (a?, b?);

    assert_eq!(a.inserted + b.inserted, 60);
    assert_eq!(a.updated + b.updated, 20);
    for ein in &eins {
        assert_eq!(count_ein(&store, ein).await?, 1, "EIN {}", ein);
    }
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_unchecked_insert_is_ledgered_as_fallback() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    let existing = new_upload(&store, "existing.csv").await?;
    store
        .write_chunk(&chunk(existing, 0, vec![projected("111111111", "ALPHA")], WriteMode::Upsert))
        .await?;

    let id = new_upload(&store, "fallback.csv").await?;
    store.start_processing(id).await?;
    store.set_totals(id, 2, 1).await?;
    let write = chunk(
        id,
        0,
        vec![projected("111111111", "ALPHA AGAIN"), projected("222222222", "BETA")],
        WriteMode::Upsert,
    );

    let outcome = store.insert_chunk_unchecked(&write).await?;
    assert!(outcome.fallback);
    assert_eq!(outcome.inserted, 2);

    let replay = store.insert_chunk_unchecked(&write).await?;
    assert!(replay.already_committed);

    let fallback: bool = sqlx::query_scalar(
        "SELECT fallback FROM upload_chunks WHERE file_id = $1 AND chunk_index = 0",
    )
    .bind(id)
    .fetch_one(store.pool())
    .await?;
    assert!(fallback);

    let upload = store.get_upload(id).await?.expect("upload exists");
    assert_eq!(upload.processed_rows, 2);
    assert_eq!(upload.processed_chunks, 1);

    // blind inserts skip the dedup lookup
    assert_eq!(count_ein(&store, "111111111").await?, 2);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_update_only_skips_unknown_eins() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    let id = new_upload(&store, "orgs.csv").await?;
    store
        .write_chunk(&chunk(id, 0, vec![projected("111111111", "ALPHA")], WriteMode::Upsert))
        .await?;

    let outcome = store
        .write_chunk(&chunk(
            id,
            1,
            vec![projected("111111111", "ALPHA"), projected("999999999", "NEW")],
            WriteMode::UpdateOnly,
        ))
        .await?;
    assert_eq!(outcome.unchanged, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(count_ein(&store, "999999999").await?, 0);
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_header_row_once_and_delete_order() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    let id = new_upload(&store, "orgs.csv").await?;
    let header = project_header(&common::bmf_header())?;
    assert!(store.insert_header_row(id, &header).await?);
    assert!(!store.insert_header_row(id, &header).await?);

    store
        .write_chunk(&chunk(id, 0, vec![projected("111111111", "ALPHA")], WriteMode::Upsert))
        .await?;
    let row_id: i64 = sqlx::query_scalar("SELECT id FROM excel_data WHERE ein = '111111111'")
        .fetch_one(store.pool())
        .await?;
    sqlx::query("INSERT INTO excel_data_notes (excel_data_id, note) VALUES ($1, 'call back')")
        .bind(row_id)
        .execute(store.pool())
        .await?;

    assert_eq!(store.count_rows_for_upload(id).await?, 2);
    assert_eq!(store.count_notes_for_upload(id).await?, 1);

    // Rows with notes cannot go first
    assert!(store.delete_rows_for_upload(id, 10).await.is_err());

    assert_eq!(store.delete_notes_for_upload(id, 10).await?, 1);
    assert_eq!(store.delete_rows_for_upload(id, 10).await?, 2);
    assert!(store.delete_upload(id).await?);
    assert!(store.get_upload(id).await?.is_none());
    Ok(())
}

#[tokio::test]
#[serial]
#[ignore] // Requires Docker
async fn test_lifecycle_guards() -> Result<()> {
    let pg = TestPostgres::start().await?;
    let store = PgStore::new(pg.pool().clone());

    let id = new_upload(&store, "orgs.csv").await?;
    assert!(store.start_processing(id).await?);
    assert!(store.mark_failed(id, "boom").await?);
    assert!(store.start_processing(id).await?);

    let upload = store.get_upload(id).await?.expect("upload exists");
    assert_eq!(upload.status, UploadStatus::Processing);
    assert!(upload.error_message.is_none());

    assert!(store.cancel_upload(id).await?);
    assert!(!store.start_processing(id).await?);
    assert!(!store.mark_failed(id, "late").await?);
    Ok(())
}
