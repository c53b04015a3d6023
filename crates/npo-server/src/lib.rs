//! NPO Registry server library
//!
//! Bulk ingestion of nonprofit registry data (user CSV/XLSX uploads and the
//! IRS Business Master File) into Postgres, deduplicated by EIN, with an HTTP
//! API for uploads, progress, and deletion.
//!
//! # Architecture
//!
//! - **ingest**: readers, projection, chunked writes, jobs, queue and workers
//! - **db**: Postgres implementations of the ingestion stores and job queue
//! - **features**: API slices built from commands and queries
//! - **api** / **middleware**: router assembly, envelopes, CORS and tracing
//! - **storage**: local directory holding uploaded and downloaded files
//!
//! # Example
//!
//! ```no_run
//! use npo_server::{config::Config, db};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     db::run_migrations(&pool).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod models;
pub mod storage;

pub use error::{ApiResult, AppError};
