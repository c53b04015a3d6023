//! `excel_data` writes and deletes
//!
//! A chunk commits in one transaction: ledger row, advisory locks on its
//! EINs, dedup lookup, inserts, updates, then the upload counters.

use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use super::PgStore;
use crate::ingest::error::IngestResult;
use crate::ingest::projector::ProjectedRow;
use crate::ingest::store::{ChunkOutcome, ChunkWrite, ExcelDataStore};
use crate::ingest::writer::{chunk_keys, plan_chunk, ExistingRow};

/// Rows per multi-row INSERT, well below the bind parameter limit
const INSERT_BATCH_ROWS: usize = 1000;

/// Claim the ledger slot of a chunk; false when it was already committed
async fn claim_chunk(
    tx: &mut Transaction<'_, Postgres>,
    write: &ChunkWrite,
    fallback: bool,
) -> IngestResult<bool> {
    let inserted = sqlx::query(
        r#"
        INSERT INTO upload_chunks (file_id, chunk_index, row_count, fallback)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (file_id, chunk_index) DO NOTHING
        "#,
    )
    .bind(write.upload_id)
    .bind(write.chunk_index)
    .bind(write.raw_row_count)
    .bind(fallback)
    .execute(&mut **tx)
    .await?
    .rows_affected();
    Ok(inserted > 0)
}

/// Serialize writers touching the same EINs. Keys are locked in hash order
/// so concurrent chunks cannot deadlock.
async fn lock_keys(tx: &mut Transaction<'_, Postgres>, keys: &[String]) -> IngestResult<()> {
    sqlx::query(
        r#"
        SELECT pg_advisory_xact_lock(k)
        FROM (
            SELECT DISTINCT hashtextextended(e, 0) AS k
            FROM unnest($1::text[]) AS e
            ORDER BY k
        ) AS keys
        "#,
    )
    .bind(keys)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Lowest-id stored row per EIN
async fn lookup_existing(
    tx: &mut Transaction<'_, Postgres>,
    keys: &[String],
) -> IngestResult<HashMap<String, ExistingRow>> {
    let rows: Vec<(i64, String, String)> = sqlx::query_as(
        r#"
        SELECT DISTINCT ON (ein) id, ein, row_data
        FROM excel_data
        WHERE ein = ANY($1) AND is_header = FALSE
        ORDER BY ein, id
        "#,
    )
    .bind(keys)
    .fetch_all(&mut **tx)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, ein, row_data)| (ein, ExistingRow { id, row_data }))
        .collect())
}

async fn insert_rows(
    tx: &mut Transaction<'_, Postgres>,
    upload_id: Uuid,
    rows: &[&ProjectedRow],
) -> IngestResult<()> {
    for batch in rows.chunks(INSERT_BATCH_ROWS) {
        let mut query_builder = QueryBuilder::<Postgres>::new(
            r#"
            INSERT INTO excel_data (
                file_id, row_data, ein, name, city, state, zip, ntee_code, is_header
            )
            "#,
        );

        query_builder.push_values(batch.iter(), |mut b, row| {
            b.push_bind(upload_id)
                .push_bind(&row.payload)
                .push_bind(&row.ein)
                .push_bind(&row.name)
                .push_bind(&row.city)
                .push_bind(&row.state)
                .push_bind(&row.zip)
                .push_bind(&row.ntee_code)
                .push_bind(row.is_header);
        });

        query_builder.build().execute(&mut **tx).await?;
    }
    Ok(())
}

/// Refresh payload and projections; the owning upload is kept
async fn update_row(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    row: &ProjectedRow,
) -> IngestResult<()> {
    sqlx::query(
        r#"
        UPDATE excel_data
        SET row_data = $2, name = $3, city = $4, state = $5, zip = $6,
            ntee_code = $7, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(&row.payload)
    .bind(&row.name)
    .bind(&row.city)
    .bind(&row.state)
    .bind(&row.zip)
    .bind(&row.ntee_code)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn record_progress(tx: &mut Transaction<'_, Postgres>, write: &ChunkWrite) -> IngestResult<()> {
    sqlx::query(
        r#"
        UPDATE uploaded_files
        SET processed_rows = processed_rows + $2,
            processed_chunks = processed_chunks + 1,
            last_committed_chunk = GREATEST(COALESCE(last_committed_chunk, -1), $3),
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(write.upload_id)
    .bind(write.raw_row_count)
    .bind(write.chunk_index)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ExcelDataStore for PgStore {
    async fn insert_header_row(&self, upload_id: Uuid, header: &ProjectedRow) -> IngestResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO excel_data (
                file_id, row_data, ein, name, city, state, zip, ntee_code, is_header
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE)
            ON CONFLICT (file_id) WHERE is_header DO NOTHING
            "#,
        )
        .bind(upload_id)
        .bind(&header.payload)
        .bind(&header.ein)
        .bind(&header.name)
        .bind(&header.city)
        .bind(&header.state)
        .bind(&header.zip)
        .bind(&header.ntee_code)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn write_chunk(&self, write: &ChunkWrite) -> IngestResult<ChunkOutcome> {
        let mut tx = self.pool.begin().await?;

        if !claim_chunk(&mut tx, write, false).await? {
            tx.rollback().await?;
            return Ok(ChunkOutcome::already_committed());
        }

        let keys = chunk_keys(&write.rows);
        let existing = if keys.is_empty() {
            HashMap::new()
        } else {
            lock_keys(&mut tx, &keys).await?;
            lookup_existing(&mut tx, &keys).await?
        };

        let plan = plan_chunk(&write.rows, &existing, write.mode);
        let inserts: Vec<&ProjectedRow> = plan.inserts.iter().map(|&i| &write.rows[i]).collect();
        insert_rows(&mut tx, write.upload_id, &inserts).await?;
        for &(id, index) in &plan.updates {
            update_row(&mut tx, id, &write.rows[index]).await?;
        }
        record_progress(&mut tx, write).await?;

        tx.commit().await?;

        debug!(
            upload_id = %write.upload_id,
            chunk = write.chunk_index,
            keys = keys.len(),
            matched = existing.len(),
            "Chunk committed"
        );
        Ok(plan.outcome())
    }

    async fn insert_chunk_unchecked(&self, write: &ChunkWrite) -> IngestResult<ChunkOutcome> {
        let mut tx = self.pool.begin().await?;

        if !claim_chunk(&mut tx, write, true).await? {
            tx.rollback().await?;
            return Ok(ChunkOutcome::already_committed());
        }

        let rows: Vec<&ProjectedRow> = write.rows.iter().collect();
        insert_rows(&mut tx, write.upload_id, &rows).await?;
        record_progress(&mut tx, write).await?;

        tx.commit().await?;

        Ok(ChunkOutcome {
            inserted: rows.len(),
            fallback: true,
            ..ChunkOutcome::default()
        })
    }

    async fn count_notes_for_upload(&self, upload_id: Uuid) -> IngestResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM excel_data_notes n
            JOIN excel_data d ON d.id = n.excel_data_id
            WHERE d.file_id = $1
            "#,
        )
        .bind(upload_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn count_rows_for_upload(&self, upload_id: Uuid) -> IngestResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM excel_data WHERE file_id = $1")
            .bind(upload_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn delete_notes_for_upload(&self, upload_id: Uuid, limit: usize) -> IngestResult<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM excel_data_notes
            WHERE id IN (
                SELECT n.id
                FROM excel_data_notes n
                JOIN excel_data d ON d.id = n.excel_data_id
                WHERE d.file_id = $1
                LIMIT $2
            )
            "#,
        )
        .bind(upload_id)
        .bind(limit as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(deleted)
    }

    async fn delete_rows_for_upload(&self, upload_id: Uuid, limit: usize) -> IngestResult<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM excel_data
            WHERE id IN (SELECT id FROM excel_data WHERE file_id = $1 LIMIT $2)
            "#,
        )
        .bind(upload_id)
        .bind(limit as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(deleted)
    }

    async fn delete_notes_for_rows(&self, row_ids: &[i64]) -> IngestResult<u64> {
        let deleted = sqlx::query("DELETE FROM excel_data_notes WHERE excel_data_id = ANY($1)")
            .bind(row_ids)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }

    async fn delete_rows(&self, row_ids: &[i64]) -> IngestResult<u64> {
        let deleted = sqlx::query("DELETE FROM excel_data WHERE id = ANY($1)")
            .bind(row_ids)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}
