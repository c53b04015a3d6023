//! Spreadsheet ingestion pipeline
//!
//! Bulk ingestion of CSV/XLSX sources (user uploads and the IRS Business
//! Master File) into `excel_data`, deduplicated by EIN.
//!
//! # Architecture
//!
//! - **reader**: header plus a lazy row sequence over CSV or spreadsheet files
//! - **projector**: payload encoding and the virtual columns (EIN, name, city, ...)
//! - **writer**: dedup planning and the chunk failure policy
//! - **store**: storage traits implemented by `db::PgStore`
//! - **reconciler**: completion and failure of uploads
//! - **jobs**: the queued job kinds
//! - **queue** / **worker**: job queue seams and the worker pool
//! - **download**: remote IRS BMF downloads
//!
//! Chunks commit in their own transaction together with a ledger row, so a
//! retried job skips what is already committed and progress is counted once.

pub mod config;
pub mod download;
pub mod error;
pub mod jobs;
#[cfg(test)]
pub mod memory;
pub mod progress;
pub mod projector;
pub mod queue;
pub mod reader;
pub mod reconciler;
pub mod store;
pub mod worker;
pub mod writer;

pub use config::{ChunkFailurePolicy, IngestConfig, JobLimits, JobLimitsConfig};
pub use error::{IngestError, IngestResult};
pub use jobs::{Job, JobContext};
pub use queue::{JobDispatcher, JobQueue, LocalQueue, QueuedJob};
pub use store::{IngestStore, WriteMode};
pub use worker::{drain, JobWorker, WorkerHandle};
