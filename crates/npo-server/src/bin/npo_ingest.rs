//! NPO Registry operator CLI
//!
//! Runs ingestion work directly against the database, without the HTTP API.
//! `import`, `sync-irs` and `delete` execute their jobs inline on an
//! in-process queue; `worker` polls the shared Postgres queue.
//!
//! Usage:
//!   npo-ingest import ./orgs.xlsx
//!   npo-ingest sync-irs --url https://www.irs.gov/pub/irs-soi/eo1.csv --update-only
//!   npo-ingest status <upload-id>
//!   npo-ingest delete <upload-id>
//!   npo-ingest worker

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use npo_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use npo_server::{
    config::Config,
    db::{self, PgJobQueue, PgStore},
    features::uploads::commands::{
        self, CreateUploadCommand, DeleteUploadCommand, SyncIrsBmfCommand,
    },
    ingest::{
        drain, store::{DeleteProgressStore, UploadStore}, IngestConfig, JobContext, JobWorker,
        LocalQueue,
    },
    storage::FileStorage,
};

#[derive(Parser, Debug)]
#[command(name = "npo-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a local CSV or spreadsheet and import it
    Import {
        /// File to import
        path: PathBuf,
    },

    /// Download IRS BMF extracts and merge them into the registry
    SyncIrs {
        /// Single extract to sync (defaults to the configured sources)
        #[arg(long)]
        url: Option<String>,

        /// Only refresh organizations that already exist
        #[arg(long)]
        update_only: bool,

        /// Rows per chunk (100-1000)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Show the progress of an upload
    Status {
        /// Upload id
        id: Uuid,
    },

    /// Delete an upload with its rows, notes and stored file
    Delete {
        /// Upload id
        id: Uuid,
    },

    /// Run the queue worker pool until interrupted
    Worker,
}

/// Database-backed dependencies shared by the subcommands
struct Runtime {
    store: Arc<PgStore>,
    storage: FileStorage,
    config: Arc<IngestConfig>,
    pool: sqlx::PgPool,
}

impl Runtime {
    async fn connect() -> Result<Self> {
        let config = Config::load()?;
        let pool = db::create_pool(&config.database).await?;
        db::run_migrations(&pool).await?;

        Ok(Self {
            store: Arc::new(PgStore::new(pool.clone())),
            storage: FileStorage::new(config.storage),
            config: Arc::new(IngestConfig::from_env()?),
            pool,
        })
    }

    /// Context whose sub-jobs land on an in-process queue
    fn inline(&self) -> (Arc<LocalQueue>, JobContext) {
        let queue = Arc::new(LocalQueue::new(self.config.limits.clone()));
        let ctx = JobContext::new(
            self.store.clone(),
            self.storage.clone(),
            self.config.clone(),
            queue.clone(),
        );
        (queue, ctx)
    }

    async fn drain(&self, queue: &LocalQueue, ctx: &JobContext) -> Result<()> {
        let report = drain(queue, ctx).await?;
        info!(
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            "Inline jobs finished"
        );
        for (job, error) in queue.failed_jobs() {
            error!(kind = job.kind(), error = %error, "Job failed");
        }
        if report.failed > 0 {
            bail!("{} job(s) failed", report.failed);
        }
        Ok(())
    }

    async fn print_status(&self, id: Uuid) -> Result<()> {
        let upload = self
            .store
            .get_upload(id)
            .await?
            .with_context(|| format!("upload {} not found", id))?;

        println!("upload:    {}", upload.id);
        println!("name:      {}", upload.original_name);
        println!("status:    {}", upload.status.as_str());
        println!(
            "progress:  {}/{} rows ({:.1}%), {}/{} chunks",
            upload.processed_rows,
            upload.total_rows,
            upload.percent_complete(),
            upload.processed_chunks,
            upload.total_chunks
        );
        if let Some(message) = &upload.error_message {
            println!("error:     {}", message);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("npo-ingest")
        .filter_directives("sqlx=warn")
        .build()
        .merge_env()?;
    let _log_guard = init_logging(&log_config)?;

    let runtime = Runtime::connect().await?;

    match cli.command {
        Commands::Import { path } => import(&runtime, path).await,
        Commands::SyncIrs {
            url,
            update_only,
            chunk_size,
        } => sync_irs(&runtime, url, update_only, chunk_size).await,
        Commands::Status { id } => runtime.print_status(id).await,
        Commands::Delete { id } => delete(&runtime, id).await,
        Commands::Worker => worker(&runtime).await,
    }
}

async fn import(runtime: &Runtime, path: PathBuf) -> Result<()> {
    let original_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid file name: {}", path.display()))?
        .to_string();
    let content = tokio::fs::read(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let (queue, ctx) = runtime.inline();
    let view = commands::create::handle(
        runtime.store.as_ref(),
        &runtime.storage,
        queue.as_ref(),
        CreateUploadCommand {
            original_name,
            content,
        },
    )
    .await?;
    info!(upload_id = %view.upload.id, "Import registered");

    let result = runtime.drain(&queue, &ctx).await;
    runtime.print_status(view.upload.id).await?;
    result
}

async fn sync_irs(
    runtime: &Runtime,
    source_url: Option<String>,
    update_only: bool,
    chunk_size: Option<usize>,
) -> Result<()> {
    let (queue, ctx) = runtime.inline();
    let response = commands::sync_irs::handle(
        runtime.store.as_ref(),
        &runtime.storage,
        queue.as_ref(),
        &runtime.config,
        SyncIrsBmfCommand {
            source_url,
            update_only,
            dispatch_chunks: true,
            chunk_size,
        },
    )
    .await?;

    let result = runtime.drain(&queue, &ctx).await;
    for view in &response.uploads {
        runtime.print_status(view.upload.id).await?;
    }
    result
}

async fn delete(runtime: &Runtime, id: Uuid) -> Result<()> {
    let (queue, ctx) = runtime.inline();
    let accepted = commands::delete::handle(
        runtime.store.as_ref(),
        queue.as_ref(),
        DeleteUploadCommand { id },
    )
    .await?;

    runtime.drain(&queue, &ctx).await?;

    if let Some(progress) = runtime.store.get_delete_progress(accepted.operation_id).await? {
        println!(
            "delete {}: {} ({}%) {}",
            accepted.operation_id,
            progress.status.as_str(),
            progress.percent,
            progress.message.unwrap_or_default()
        );
    }
    Ok(())
}

async fn worker(runtime: &Runtime) -> Result<()> {
    let queue = Arc::new(PgJobQueue::new(
        runtime.pool.clone(),
        runtime.config.limits.clone(),
    ));
    let ctx = JobContext::new(
        runtime.store.clone(),
        runtime.storage.clone(),
        runtime.config.clone(),
        queue.clone(),
    );

    let handle = JobWorker::new(queue, ctx).start();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("Stopping workers");
    handle.shutdown().await;
    Ok(())
}
