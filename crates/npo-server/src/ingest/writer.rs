//! Chunked batch writer
//!
//! Planning is pure: given the projected rows of a chunk and the rows already
//! stored under their EINs, decide what to insert, update, or leave alone.
//! The store executes a plan inside one transaction; [`ChunkWriter`] applies
//! the configured failure policy when that transaction fails.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::ChunkFailurePolicy;
use super::error::{IngestError, IngestResult};
use super::projector::{project_chunk, ColumnLayout, ProjectedRow};
use super::reader::RawRow;
use super::store::{ChunkOutcome, ChunkWrite, IngestStore, WriteMode};
use crate::models::excel_data::decode_payload;

/// Stored row found under an EIN (the lowest id wins)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRow {
    pub id: i64,
    pub row_data: String,
}

/// Decision for one projected row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    Insert,
    Update { id: i64 },
    Unchanged { id: i64 },
    SkippedUpdateOnly,
}

/// Plan for a chunk, indices refer to the input rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkPlan {
    pub inserts: Vec<usize>,
    pub updates: Vec<(i64, usize)>,
    pub unchanged: usize,
    pub skipped: usize,
}

impl ChunkPlan {
    pub fn outcome(&self) -> ChunkOutcome {
        ChunkOutcome {
            inserted: self.inserts.len(),
            updated: self.updates.len(),
            unchanged: self.unchanged,
            skipped: self.skipped,
            ..ChunkOutcome::default()
        }
    }
}

/// Decide the action for a single row
pub fn plan_row(
    row: &ProjectedRow,
    existing: &HashMap<String, ExistingRow>,
    mode: WriteMode,
) -> RowAction {
    let Some(key) = row.key() else {
        return match mode {
            WriteMode::Upsert => RowAction::Insert,
            WriteMode::UpdateOnly => RowAction::SkippedUpdateOnly,
        };
    };

    match existing.get(key) {
        Some(stored) => {
            if decode_payload(&stored.row_data).as_deref() == Some(row.cells.as_slice()) {
                RowAction::Unchanged { id: stored.id }
            } else {
                RowAction::Update { id: stored.id }
            }
        }
        None => match mode {
            WriteMode::Upsert => RowAction::Insert,
            WriteMode::UpdateOnly => RowAction::SkippedUpdateOnly,
        },
    }
}

/// Plan a whole chunk. Repeated EINs inside one chunk are not merged.
pub fn plan_chunk(
    rows: &[ProjectedRow],
    existing: &HashMap<String, ExistingRow>,
    mode: WriteMode,
) -> ChunkPlan {
    let mut plan = ChunkPlan::default();
    for (index, row) in rows.iter().enumerate() {
        match plan_row(row, existing, mode) {
            RowAction::Insert => plan.inserts.push(index),
            RowAction::Update { id } => plan.updates.push((id, index)),
            RowAction::Unchanged { .. } => plan.unchanged += 1,
            RowAction::SkippedUpdateOnly => plan.skipped += 1,
        }
    }
    plan
}

/// Distinct EINs of a chunk, sorted so lock acquisition order is stable
pub fn chunk_keys(rows: &[ProjectedRow]) -> Vec<String> {
    let mut keys: Vec<String> = rows.iter().filter_map(|r| r.key().map(str::to_string)).collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Writes chunks through the store, applying the failure policy
#[derive(Clone)]
pub struct ChunkWriter {
    store: Arc<dyn IngestStore>,
    policy: ChunkFailurePolicy,
}

impl ChunkWriter {
    pub fn new(store: Arc<dyn IngestStore>, policy: ChunkFailurePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> ChunkFailurePolicy {
        self.policy
    }

    pub async fn write(&self, write: &ChunkWrite) -> IngestResult<ChunkOutcome> {
        let mut outcome = match self.store.write_chunk(write).await {
            Ok(outcome) => outcome,
            Err(e) => match self.policy {
                ChunkFailurePolicy::Reject => {
                    warn!(
                        upload_id = %write.upload_id,
                        chunk = write.chunk_index,
                        error = %e,
                        "Chunk write failed, rejecting chunk"
                    );
                    return Err(IngestError::ChunkRejected {
                        chunk: write.chunk_index,
                        message: e.to_string(),
                    });
                }
                ChunkFailurePolicy::BestEffortInsert => {
                    warn!(
                        upload_id = %write.upload_id,
                        chunk = write.chunk_index,
                        rows = write.rows.len(),
                        error = %e,
                        "Chunk write failed, falling back to insert without dedup"
                    );
                    self.store.insert_chunk_unchecked(write).await?
                }
            },
        };

        if !outcome.already_committed {
            outcome.malformed = write.malformed;
        }
        Ok(outcome)
    }

    /// Project raw rows and write them as chunk `chunk_index`
    pub async fn process_rows(
        &self,
        upload_id: Uuid,
        layout: &ColumnLayout,
        chunk_index: i32,
        first_row_number: usize,
        rows: Vec<RawRow>,
        mode: WriteMode,
    ) -> IngestResult<ChunkOutcome> {
        let projected = project_chunk(layout, rows, first_row_number)?;
        let write = ChunkWrite {
            upload_id,
            chunk_index,
            raw_row_count: projected.raw_count as i64,
            malformed: projected.malformed,
            rows: projected.rows,
            mode,
        };

        let outcome = self.write(&write).await?;

        if outcome.already_committed {
            info!(upload_id = %upload_id, chunk = chunk_index, "Chunk already committed, skipping");
        } else {
            info!(
                upload_id = %upload_id,
                chunk = chunk_index,
                rows = write.raw_row_count,
                inserted = outcome.inserted,
                updated = outcome.updated,
                unchanged = outcome.unchanged,
                skipped = outcome.skipped,
                malformed = outcome.malformed,
                fallback = outcome.fallback,
                "Chunk processed"
            );
        }

        Ok(outcome)
    }
}
