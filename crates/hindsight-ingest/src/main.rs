//! Offline ingestion runner.
//!
//! Runs the full pipeline against a local archive (or an already-extracted
//! tree) without the HTTP surface, for batch imports and re-runs:
//!
//! ```bash
//! # Ingest an export archive end to end
//! hindsight-ingest --archive ./slack-export.zip
//!
//! # Resume from an extracted tree, e.g. after a failed training run
//! hindsight-ingest --extract-dir ./data/extracts/<job_id>
//!
//! # Stop after the import phase (no embeddings)
//! hindsight-ingest --archive ./slack-export.zip --skip-training
//! ```
//!
//! Ctrl+C cancels cooperatively: the running stage stops at its next
//! checkpoint and the job is left CANCELLED and resumable.

use anyhow::{bail, Context, Result};
use clap::Parser;
use hindsight_core::{Config, JobStatus};
use hindsight_ingest::{connect_mongo, Embedder, JobStore, Pipeline, Store, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Offline Slack export ingestion.
#[derive(Parser, Debug)]
#[command(name = "hindsight-ingest")]
#[command(about = "Ingest a Slack export archive into the search corpus")]
#[command(version)]
struct Args {
    /// Path to a Slack export ZIP archive.
    #[arg(long, conflicts_with = "extract_dir")]
    archive: Option<PathBuf>,

    /// Path to an already-extracted export tree.
    #[arg(long)]
    extract_dir: Option<PathBuf>,

    /// Stop after the import phase; skip embedding training.
    #[arg(long)]
    skip_training: bool,

    /// Poll interval for job progress, in milliseconds.
    #[arg(long, default_value = "500")]
    poll_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,hindsight_ingest=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(Config::from_env()?);

    let db = connect_mongo(&config).await?;
    let store = Store::new(&db);
    let jobs = JobStore::new(&db);
    let vector = VectorStore::new(&config.chroma_url())?;
    let embedder = Embedder::new(&config.ollama_url)?;
    let pipeline = Arc::new(Pipeline::new(
        config.clone(),
        store.clone(),
        jobs.clone(),
        vector,
        embedder,
    ));

    // Stage a job record for this run.
    let job_id = match (&args.archive, &args.extract_dir) {
        (Some(archive), None) => {
            let archive = archive
                .canonicalize()
                .with_context(|| format!("archive not found: {}", archive.display()))?;
            let size = std::fs::metadata(&archive)?.len() as i64;
            let filename = archive
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "export.zip".to_string());
            let id = jobs.create(&filename, size).await?;
            jobs.finish_upload(&id, &archive.display().to_string(), size)
                .await?;
            id
        }
        (None, Some(tree)) => {
            let tree = tree
                .canonicalize()
                .with_context(|| format!("extract dir not found: {}", tree.display()))?;
            let id = jobs.create("pre-extracted", 0).await?;
            jobs.finish_upload(&id, "", 0).await?;
            jobs.set_extract_path(&id, &tree.display().to_string())
                .await?;
            id
        }
        _ => bail!("exactly one of --archive or --extract-dir is required"),
    };

    pipeline.start_with(job_id, !args.skip_training).await?;
    tracing::info!(job_id = %job_id.to_hex(), "pipeline started");

    // Watch the job until it settles, cancelling on Ctrl+C.
    let mut last_line = String::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, cancelling job");
                pipeline.cancel(&job_id);
            }
            _ = tokio::time::sleep(Duration::from_millis(args.poll_ms)) => {}
        }

        let job = jobs.get(&job_id).await?;
        if job.progress != last_line {
            tracing::info!(
                status = %job.status,
                percent = job.progress_percent,
                "{}",
                job.progress
            );
            last_line = job.progress.clone();
        }

        if args.skip_training && job.status == JobStatus::Imported {
            tracing::info!("import finished; training skipped");
            break;
        }
        if job.status.is_terminal() {
            match job.status {
                JobStatus::Complete => tracing::info!("job complete"),
                JobStatus::Cancelled => tracing::warn!("job cancelled; extract tree preserved"),
                JobStatus::Error => {
                    bail!("job failed: {}", job.error.unwrap_or_default())
                }
                _ => {}
            }
            break;
        }
    }

    let messages = store.message_count().await?;
    let failures = store.failed_import_count().await?;
    tracing::info!(messages, failed_imports = failures, "corpus totals");
    Ok(())
}
