//! Shared utilities for NPO server integration tests
//!
//! Each test gets its own PostgreSQL container with migrations applied.
//! These tests need a running Docker daemon and are ignored by default:
//!
//! ```bash
//! cargo test -p npo-server --tests -- --ignored
//! ```

#![allow(dead_code)]

use anyhow::{Context, Result};
use npo_server::ingest::projector::{project_row, ColumnLayout, ProjectedRow};
use npo_server::ingest::store::{ChunkWrite, WriteMode};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;
use uuid::Uuid;

/// PostgreSQL container with migrations pre-applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!("postgresql://postgres:postgres@{}:{}/postgres", host, port))
            .await
            .context("Failed to connect to PostgreSQL")?;

        npo_server::db::run_migrations(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,npo_server=debug,sqlx=warn")),
        )
        .with_test_writer()
        .try_init();
}

pub const WIDTH: usize = 28;

/// BMF-shaped header row
pub fn bmf_header() -> Vec<String> {
    let mut header: Vec<String> = (0..WIDTH).map(|i| format!("COL{}", i)).collect();
    header[0] = "EIN".to_string();
    header[1] = "NAME".to_string();
    header[4] = "CITY".to_string();
    header[5] = "STATE".to_string();
    header[26] = "NTEE_CD".to_string();
    header
}

/// BMF-shaped data row
pub fn bmf_cells(ein: &str, name: &str, state: &str) -> Vec<String> {
    let mut row = vec![String::new(); WIDTH];
    row[0] = ein.to_string();
    row[1] = name.to_string();
    row[4] = "SPRINGFIELD".to_string();
    row[5] = state.to_string();
    row[26] = "B20".to_string();
    row
}

pub fn projected(ein: &str, name: &str) -> ProjectedRow {
    let layout = ColumnLayout { width: WIDTH, ein: 0 };
    project_row(&layout, bmf_cells(ein, name, "IL")).expect("row projects")
}

pub fn chunk(upload_id: Uuid, index: i32, rows: Vec<ProjectedRow>, mode: WriteMode) -> ChunkWrite {
    ChunkWrite {
        upload_id,
        chunk_index: index,
        raw_row_count: rows.len() as i64,
        rows,
        malformed: 0,
        mode,
    }
}

/// BMF CSV text with one row per EIN
pub fn bmf_csv(eins: &[&str]) -> String {
    let mut out = bmf_header().join(",");
    out.push('\n');
    for ein in eins {
        out.push_str(&bmf_cells(ein, &format!("ORG {}", ein), "NY").join(","));
        out.push('\n');
    }
    out
}
