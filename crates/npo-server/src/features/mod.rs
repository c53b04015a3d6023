//! Feature modules implementing the NPO Registry API
//!
//! Each feature is a vertical slice with its own commands, queries, and
//! routes. Commands and queries are request types implementing
//! `mediator::Request` and validate their own input.
//!
//! # Features
//!
//! - **uploads**: Upload registration, progress, cancellation, deletion,
//!   stored rows, and IRS BMF synchronisation

pub mod shared;
pub mod uploads;

use axum::Router;
use std::sync::Arc;

use crate::ingest::{IngestConfig, IngestStore, JobDispatcher};
use crate::storage::FileStorage;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// PostgreSQL pool for read-side queries
    pub db: sqlx::PgPool,
    /// Ingestion store used by commands
    pub store: Arc<dyn IngestStore>,
    pub storage: FileStorage,
    /// Queue that receives background jobs
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub ingest: Arc<IngestConfig>,
}

/// Creates the API router with all feature routes mounted
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().merge(uploads::uploads_routes().with_state(state))
}
