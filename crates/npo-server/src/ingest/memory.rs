//! In-memory store for exercising the pipeline without Postgres

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::error::{IngestError, IngestResult};
use super::projector::ProjectedRow;
use super::store::{ChunkOutcome, ChunkWrite, DeleteProgressStore, ExcelDataStore, UploadStore};
use super::writer::{plan_chunk, ExistingRow};
use crate::models::{
    DeleteProgress, ExcelDataNote, ExcelDataRow, NewUpload, UploadStatus, UploadedFile,
};

#[derive(Default)]
struct State {
    uploads: HashMap<Uuid, UploadedFile>,
    chunks: HashSet<(Uuid, i32)>,
    rows: BTreeMap<i64, ExcelDataRow>,
    notes: BTreeMap<i64, ExcelDataNote>,
    progress: HashMap<Uuid, DeleteProgress>,
    progress_history: HashMap<Uuid, Vec<i16>>,
    next_row_id: i64,
    next_note_id: i64,
}

impl State {
    fn insert_row(&mut self, upload_id: Uuid, row: &ProjectedRow) -> i64 {
        self.next_row_id += 1;
        let now = Utc::now();
        let id = self.next_row_id;
        self.rows.insert(
            id,
            ExcelDataRow {
                id,
                file_id: upload_id,
                row_data: row.payload.clone(),
                ein: row.ein.clone(),
                name: row.name.clone(),
                city: row.city.clone(),
                state: row.state.clone(),
                zip: row.zip.clone(),
                ntee_code: row.ntee_code.clone(),
                is_header: row.is_header,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    fn record_chunk(&mut self, write: &ChunkWrite) -> bool {
        if !self.chunks.insert((write.upload_id, write.chunk_index)) {
            return false;
        }
        if let Some(upload) = self.uploads.get_mut(&write.upload_id) {
            upload.processed_rows += write.raw_row_count;
            upload.processed_chunks += 1;
            upload.last_committed_chunk = Some(
                upload
                    .last_committed_chunk
                    .map_or(write.chunk_index, |last| last.max(write.chunk_index)),
            );
            upload.updated_at = Utc::now();
        }
        true
    }

    fn note_ids_for_upload(&self, upload_id: Uuid) -> Vec<i64> {
        self.notes
            .values()
            .filter(|n| {
                self.rows
                    .get(&n.excel_data_id)
                    .is_some_and(|r| r.file_id == upload_id)
            })
            .map(|n| n.id)
            .collect()
    }
}

/// Test double of the Postgres store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    failing_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `write_chunk` fail before touching state
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn add_note(&self, excel_data_id: i64, note: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_note_id += 1;
        let id = state.next_note_id;
        state.notes.insert(
            id,
            ExcelDataNote {
                id,
                excel_data_id,
                note: note.to_string(),
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn rows(&self) -> Vec<ExcelDataRow> {
        self.state.lock().unwrap().rows.values().cloned().collect()
    }

    pub fn rows_with_ein(&self, ein: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .rows
            .values()
            .filter(|r| !r.is_header && r.ein.as_deref() == Some(ein))
            .count()
    }

    pub fn header_rows(&self, upload_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .rows
            .values()
            .filter(|r| r.is_header && r.file_id == upload_id)
            .count()
    }

    pub fn note_count(&self) -> usize {
        self.state.lock().unwrap().notes.len()
    }

    /// Every percentage saved for an operation, in order
    pub fn progress_history(&self, operation_id: Uuid) -> Vec<i16> {
        self.state
            .lock()
            .unwrap()
            .progress_history
            .get(&operation_id)
            .cloned()
            .unwrap_or_default()
    }

    fn take_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl UploadStore for MemoryStore {
    async fn create_upload(&self, upload: NewUpload) -> IngestResult<UploadedFile> {
        let now = Utc::now();
        let file = UploadedFile {
            id: upload.id,
            original_name: upload.original_name,
            storage_path: upload.storage_path,
            source_kind: upload.source_kind,
            source_url: upload.source_url,
            checksum: upload.checksum,
            status: UploadStatus::Pending,
            total_rows: 0,
            processed_rows: 0,
            total_chunks: 0,
            processed_chunks: 0,
            last_committed_chunk: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.lock().unwrap().uploads.insert(file.id, file.clone());
        Ok(file)
    }

    async fn get_upload(&self, id: Uuid) -> IngestResult<Option<UploadedFile>> {
        Ok(self.state.lock().unwrap().uploads.get(&id).cloned())
    }

    async fn start_processing(&self, id: Uuid) -> IngestResult<bool> {
        let mut state = self.state.lock().unwrap();
        let upload = state.uploads.get_mut(&id).ok_or(IngestError::UploadNotFound(id))?;
        match upload.status {
            UploadStatus::Completed | UploadStatus::Cancelled => Ok(false),
            _ => {
                upload.status = UploadStatus::Processing;
                upload.error_message = None;
                upload.completed_at = None;
                upload.started_at.get_or_insert_with(Utc::now);
                Ok(true)
            }
        }
    }

    async fn set_totals(&self, id: Uuid, total_rows: i64, total_chunks: i32) -> IngestResult<()> {
        let mut state = self.state.lock().unwrap();
        let upload = state.uploads.get_mut(&id).ok_or(IngestError::UploadNotFound(id))?;
        upload.total_rows = total_rows;
        upload.total_chunks = total_chunks;
        Ok(())
    }

    async fn is_chunk_committed(&self, id: Uuid, chunk_index: i32) -> IngestResult<bool> {
        Ok(self.state.lock().unwrap().chunks.contains(&(id, chunk_index)))
    }

    async fn mark_completed(&self, id: Uuid) -> IngestResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(upload) = state.uploads.get_mut(&id) else {
            return Ok(false);
        };
        let active = matches!(upload.status, UploadStatus::Pending | UploadStatus::Processing);
        if active && upload.processed_rows >= upload.total_rows {
            upload.status = UploadStatus::Completed;
            upload.completed_at = Some(Utc::now());
            return Ok(true);
        }
        Ok(false)
    }

    async fn mark_failed(&self, id: Uuid, message: &str) -> IngestResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(upload) = state.uploads.get_mut(&id) else {
            return Ok(false);
        };
        if matches!(upload.status, UploadStatus::Pending | UploadStatus::Processing) {
            upload.status = UploadStatus::Failed;
            upload.error_message = Some(message.to_string());
            upload.completed_at = Some(Utc::now());
            return Ok(true);
        }
        Ok(false)
    }

    async fn cancel_upload(&self, id: Uuid) -> IngestResult<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(upload) = state.uploads.get_mut(&id) else {
            return Ok(false);
        };
        if matches!(upload.status, UploadStatus::Pending | UploadStatus::Processing) {
            upload.status = UploadStatus::Cancelled;
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_upload(&self, id: Uuid) -> IngestResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.rows.values().any(|r| r.file_id == id) {
            return Err(IngestError::Config(format!("upload {} still owns rows", id)));
        }
        state.chunks.retain(|(file_id, _)| *file_id != id);
        Ok(state.uploads.remove(&id).is_some())
    }
}

#[async_trait]
impl ExcelDataStore for MemoryStore {
    async fn insert_header_row(&self, upload_id: Uuid, header: &ProjectedRow) -> IngestResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.rows.values().any(|r| r.is_header && r.file_id == upload_id) {
            return Ok(false);
        }
        state.insert_row(upload_id, header);
        Ok(true)
    }

    async fn write_chunk(&self, write: &ChunkWrite) -> IngestResult<ChunkOutcome> {
        if self.take_failure() {
            return Err(IngestError::Database(sqlx::Error::Protocol(
                "injected write failure".to_string(),
            )));
        }

        let mut state = self.state.lock().unwrap();
        if state.chunks.contains(&(write.upload_id, write.chunk_index)) {
            return Ok(ChunkOutcome::already_committed());
        }

        let mut existing: HashMap<String, ExistingRow> = HashMap::new();
        for row in state.rows.values().filter(|r| !r.is_header) {
            if let Some(ein) = &row.ein {
                existing.entry(ein.clone()).or_insert_with(|| ExistingRow {
                    id: row.id,
                    row_data: row.row_data.clone(),
                });
            }
        }

        let plan = plan_chunk(&write.rows, &existing, write.mode);
        for &index in &plan.inserts {
            state.insert_row(write.upload_id, &write.rows[index]);
        }
        for &(id, index) in &plan.updates {
            let incoming = &write.rows[index];
            if let Some(stored) = state.rows.get_mut(&id) {
                stored.row_data = incoming.payload.clone();
                stored.name = incoming.name.clone();
                stored.city = incoming.city.clone();
                stored.state = incoming.state.clone();
                stored.zip = incoming.zip.clone();
                stored.ntee_code = incoming.ntee_code.clone();
                stored.updated_at = Utc::now();
            }
        }
        state.record_chunk(write);

        Ok(plan.outcome())
    }

    async fn insert_chunk_unchecked(&self, write: &ChunkWrite) -> IngestResult<ChunkOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.chunks.contains(&(write.upload_id, write.chunk_index)) {
            return Ok(ChunkOutcome::already_committed());
        }
        for row in &write.rows {
            state.insert_row(write.upload_id, row);
        }
        state.record_chunk(write);
        Ok(ChunkOutcome {
            inserted: write.rows.len(),
            fallback: true,
            ..ChunkOutcome::default()
        })
    }

    async fn count_notes_for_upload(&self, upload_id: Uuid) -> IngestResult<u64> {
        Ok(self.state.lock().unwrap().note_ids_for_upload(upload_id).len() as u64)
    }

    async fn count_rows_for_upload(&self, upload_id: Uuid) -> IngestResult<u64> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rows
            .values()
            .filter(|r| r.file_id == upload_id)
            .count() as u64)
    }

    async fn delete_notes_for_upload(&self, upload_id: Uuid, limit: usize) -> IngestResult<u64> {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<i64> = state.note_ids_for_upload(upload_id).into_iter().take(limit).collect();
        for id in &ids {
            state.notes.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn delete_rows_for_upload(&self, upload_id: Uuid, limit: usize) -> IngestResult<u64> {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<i64> = state
            .rows
            .values()
            .filter(|r| r.file_id == upload_id)
            .map(|r| r.id)
            .take(limit)
            .collect();
        if state.notes.values().any(|n| ids.contains(&n.excel_data_id)) {
            return Err(IngestError::Config("rows still referenced by notes".to_string()));
        }
        for id in &ids {
            state.rows.remove(id);
        }
        Ok(ids.len() as u64)
    }

    async fn delete_notes_for_rows(&self, row_ids: &[i64]) -> IngestResult<u64> {
        let mut state = self.state.lock().unwrap();
        let before = state.notes.len();
        state.notes.retain(|_, n| !row_ids.contains(&n.excel_data_id));
        Ok((before - state.notes.len()) as u64)
    }

    async fn delete_rows(&self, row_ids: &[i64]) -> IngestResult<u64> {
        let mut state = self.state.lock().unwrap();
        if state.notes.values().any(|n| row_ids.contains(&n.excel_data_id)) {
            return Err(IngestError::Config("rows still referenced by notes".to_string()));
        }
        let before = state.rows.len();
        state.rows.retain(|id, _| !row_ids.contains(id));
        Ok((before - state.rows.len()) as u64)
    }
}

#[async_trait]
impl DeleteProgressStore for MemoryStore {
    async fn save_delete_progress(&self, progress: &DeleteProgress) -> IngestResult<()> {
        let mut state = self.state.lock().unwrap();
        let mut next = progress.clone();
        if let Some(current) = state.progress.get(&progress.operation_id) {
            next.percent = next.percent.max(current.percent);
        }
        state
            .progress_history
            .entry(progress.operation_id)
            .or_default()
            .push(next.percent);
        state.progress.insert(progress.operation_id, next);
        Ok(())
    }

    async fn get_delete_progress(&self, operation_id: Uuid) -> IngestResult<Option<DeleteProgress>> {
        Ok(self.state.lock().unwrap().progress.get(&operation_id).cloned())
    }
}
