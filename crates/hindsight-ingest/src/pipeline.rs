//! Pipeline controller: sequences extraction → import → training.
//!
//! One background task per started job, drawn from a worker pool bounded
//! by the CPU count. Cancellation is cooperative: each job owns an atomic
//! flag that the stages poll between units of work (files during
//! extraction, batches during import and training), so a cancel lands
//! within one unit. Stage boundaries catch failures into job ERROR with a
//! short message; the extracted tree and any partial writes are always
//! left in place; only the dedicated clear operations delete artefacts.

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::extract;
use crate::indexer;
use crate::jobs::JobStore;
use crate::store::Store;
use crate::train;
use crate::vector::VectorStore;
use bson::oid::ObjectId;
use hindsight_core::{Config, Job, JobStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Where a started job picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartAt {
    Extract,
    Import,
}

/// The pipeline controller. Cheap to clone behind an `Arc`.
pub struct Pipeline {
    config: Arc<Config>,
    store: Store,
    jobs: JobStore,
    vector: VectorStore,
    embedder: Embedder,
    workers: Arc<Semaphore>,
    cancel_flags: Mutex<HashMap<ObjectId, Arc<AtomicBool>>>,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        store: Store,
        jobs: JobStore,
        vector: VectorStore,
        embedder: Embedder,
    ) -> Self {
        let workers = num_cpus::get().max(1);
        tracing::info!(workers, "pipeline worker pool ready");
        Self {
            config,
            store,
            jobs,
            vector,
            embedder,
            workers: Arc::new(Semaphore::new(workers)),
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Start (or resume) a job's pipeline run in the background.
    ///
    /// Validates the state machine guard: only UPLOADED, ERROR, and
    /// CANCELLED jobs are startable, and a job may have at most one
    /// active run.
    pub async fn start(self: &Arc<Self>, job_id: ObjectId) -> Result<()> {
        self.start_with(job_id, true).await
    }

    /// [`Pipeline::start`], optionally stopping after the import phase
    /// (the offline runner's `--skip-training`).
    pub async fn start_with(self: &Arc<Self>, job_id: ObjectId, train: bool) -> Result<()> {
        let job = self.jobs.get(&job_id).await?;
        if !JobStatus::STARTABLE.contains(&job.status) {
            return Err(Error::InvalidTransition {
                from: job.status,
                to: JobStatus::Extracting,
            });
        }

        let start_at = self.resume_target(&job)?;

        let flag = Arc::new(AtomicBool::new(false));
        {
            let mut flags = self.cancel_flags.lock();
            if flags.contains_key(&job_id) {
                return Err(Error::AlreadyRunning(job_id.to_hex()));
            }
            flags.insert(job_id, flag.clone());
        }

        tracing::info!(job_id = %job_id.to_hex(), ?start_at, "pipeline run enqueued");
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = pipeline
                .workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            pipeline.run_job(job_id, start_at, train, flag).await;
            pipeline.cancel_flags.lock().remove(&job_id);
        });
        Ok(())
    }

    /// Set a job's cancel flag. Returns false when no run is active.
    pub fn cancel(&self, job_id: &ObjectId) -> bool {
        match self.cancel_flags.lock().get(job_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                tracing::info!(job_id = %job_id.to_hex(), "cancel requested");
                true
            }
            None => false,
        }
    }

    /// Whether a run is currently active for the job.
    pub fn is_running(&self, job_id: &ObjectId) -> bool {
        self.cancel_flags.lock().contains_key(job_id)
    }

    /// Decide where to resume: an existing non-empty extract tree skips
    /// extraction entirely; otherwise the staged archive must still exist.
    fn resume_target(&self, job: &Job) -> Result<StartAt> {
        if let Some(extract_path) = &job.extract_path {
            if dir_is_nonempty(extract_path) {
                return Ok(StartAt::Import);
            }
        }
        let has_archive = job
            .upload_path
            .as_ref()
            .is_some_and(|p| std::path::Path::new(p).is_file());
        if has_archive {
            Ok(StartAt::Extract)
        } else {
            Err(Error::MissingExtract(format!(
                "job {} has neither an extracted tree nor a staged archive",
                job.id
            )))
        }
    }

    async fn run_job(
        &self,
        job_id: ObjectId,
        start_at: StartAt,
        train: bool,
        cancel: Arc<AtomicBool>,
    ) {
        match self.run_stages(&job_id, start_at, train, &cancel).await {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                if let Err(e) = self.jobs.record_cancel(&job_id).await {
                    tracing::error!(job_id = %job_id.to_hex(), error = %e, "failed to record cancel");
                }
            }
            Err(e) => {
                tracing::error!(job_id = %job_id.to_hex(), error = %e, "pipeline run failed");
                if let Err(e2) = self.jobs.record_error(&job_id, &e.to_string()).await {
                    tracing::error!(job_id = %job_id.to_hex(), error = %e2, "failed to record error");
                }
            }
        }
    }

    async fn run_stages(
        &self,
        job_id: &ObjectId,
        start_at: StartAt,
        train: bool,
        cancel: &Arc<AtomicBool>,
    ) -> Result<()> {
        let extract_root = match start_at {
            StartAt::Extract => self.run_extract_stage(job_id, cancel).await?,
            StartAt::Import => {
                let job = self.jobs.get(job_id).await?;
                let path = job
                    .extract_path
                    .ok_or_else(|| Error::MissingExtract(job_id.to_hex()))?;
                tracing::info!(job_id = %job_id.to_hex(), extract_path = %path, "resuming from extracted tree");
                self.jobs
                    .advance(job_id, JobStatus::Importing, "Resuming import…", 0)
                    .await?;
                PathBuf::from(path)
            }
        };

        if start_at == StartAt::Extract {
            self.jobs
                .advance(job_id, JobStatus::Importing, "Starting import…", 0)
                .await?;
        }
        let outcome = indexer::run_import(
            &self.store,
            &self.jobs,
            job_id,
            &extract_root,
            &self.config.file_storage,
            cancel,
        )
        .await?;
        self.jobs
            .advance(
                job_id,
                JobStatus::Imported,
                &format!(
                    "Import complete: {} messages from {} files",
                    outcome.inserted + outcome.skipped,
                    outcome.files
                ),
                100,
            )
            .await?;

        if !train {
            tracing::info!(job_id = %job_id.to_hex(), "training skipped by request");
            return Ok(());
        }

        self.jobs
            .advance(job_id, JobStatus::Training, "Starting training…", 0)
            .await?;
        let trained = train::run_training(
            &self.store,
            &self.jobs,
            &self.vector,
            &self.embedder,
            job_id,
            cancel,
        )
        .await?;
        self.jobs
            .advance(
                job_id,
                JobStatus::Complete,
                &format!("Training complete: {} embeddings", trained.embedded),
                100,
            )
            .await?;
        Ok(())
    }

    /// Extraction runs as blocking work on its own thread; progress flows
    /// back over a channel so the job store sees it as it happens.
    async fn run_extract_stage(
        &self,
        job_id: &ObjectId,
        cancel: &Arc<AtomicBool>,
    ) -> Result<PathBuf> {
        let job = self.jobs.get(job_id).await?;
        let archive = PathBuf::from(
            job.upload_path
                .ok_or_else(|| Error::MissingExtract(job_id.to_hex()))?,
        );
        let dest = self.config.extract_dir(&job_id.to_hex());

        self.jobs
            .advance(job_id, JobStatus::Extracting, "Starting extraction…", 0)
            .await?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(usize, usize, u8)>();
        let flag = Arc::clone(cancel);
        let dest_clone = dest.clone();
        let worker = tokio::task::spawn_blocking(move || {
            let mut progress = |files: usize, total: usize, percent: u8| {
                let _ = tx.send((files, total, percent));
            };
            extract::extract_archive(&archive, &dest_clone, &flag, &mut progress)
        });

        while let Some((files, total, percent)) = rx.recv().await {
            // Progress writes are best-effort; extraction keeps running
            // through a failed update.
            if let Err(e) = self
                .jobs
                .advance(
                    job_id,
                    JobStatus::Extracting,
                    &format!("Extracting files… {files}/{total}"),
                    percent,
                )
                .await
            {
                tracing::warn!(job_id = %job_id.to_hex(), error = %e, "progress update failed");
            }
        }

        let report = worker
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))??;

        self.jobs
            .set_extract_path(job_id, &dest.display().to_string())
            .await?;
        self.jobs
            .advance(job_id, JobStatus::Extracted, "Extraction complete", 100)
            .await?;
        tracing::info!(
            job_id = %job_id.to_hex(),
            files = report.files,
            bytes = report.bytes,
            "extract stage finished"
        );
        Ok(dest)
    }
}

fn dir_is_nonempty(path: &str) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_is_nonempty_checks() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!dir_is_nonempty(&dir.path().display().to_string()));
        std::fs::write(dir.path().join("x"), "y").unwrap();
        assert!(dir_is_nonempty(&dir.path().display().to_string()));
        assert!(!dir_is_nonempty("/definitely/not/here"));
    }

    // Full pipeline runs need live MongoDB/Chroma/Ollama endpoints; the
    // per-stage logic is covered in extract.rs, indexer.rs and train.rs,
    // and the transition guards in hindsight-core.
}
