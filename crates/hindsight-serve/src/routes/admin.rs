//! Admin endpoints: upload, pipeline control, and clearing.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Multipart, Path, State};
use axum::Json;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::io::AsyncWriteExt;

/// Job fields exposed to the UI poller.
#[derive(Debug, Serialize)]
pub struct JobStatusView {
    pub status: String,
    pub progress: String,
    pub progress_percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&hindsight_core::Job> for JobStatusView {
    fn from(job: &hindsight_core::Job) -> Self {
        Self {
            status: job.status.to_string(),
            progress: job.progress.clone(),
            progress_percent: job.progress_percent,
            error: job.error.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub filename: String,
    pub size: i64,
}

/// `POST /admin/upload` (multipart)
///
/// Streams the archive to `<DATA_DIR>/uploads/<job_id>_<filename>` and
/// leaves the job in UPLOADED.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        let Some(filename) = field.file_name().map(sanitize_filename) else {
            continue;
        };

        let job_id = state.jobs.create(&filename, 0).await?;
        let dest = state
            .config
            .uploads_dir()
            .join(format!("{}_{}", job_id.to_hex(), filename));

        let mut file = tokio::fs::File::create(&dest)
            .await
            .map_err(hindsight_ingest::Error::Io)?;
        let mut size: i64 = 0;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(format!("upload interrupted: {e}")))?
        {
            size += chunk.len() as i64;
            file.write_all(&chunk)
                .await
                .map_err(hindsight_ingest::Error::Io)?;
        }
        file.flush().await.map_err(hindsight_ingest::Error::Io)?;

        state
            .jobs
            .finish_upload(&job_id, &dest.display().to_string(), size)
            .await?;
        tracing::info!(job_id = %job_id.to_hex(), filename, size, "archive staged");

        return Ok(Json(UploadResponse {
            id: job_id.to_hex(),
            filename,
            size,
        }));
    }
    Err(ApiError::BadRequest(
        "multipart body carries no file field".to_string(),
    ))
}

/// `GET /admin/import-status`
pub async fn import_status(
    State(state): State<AppState>,
) -> Result<Json<HashMap<String, JobStatusView>>, ApiError> {
    let jobs = state.jobs.list().await?;
    Ok(Json(
        jobs.iter()
            .map(|job| (job.id.clone(), JobStatusView::from(job)))
            .collect(),
    ))
}

/// `GET /admin/import/{job_id}/status`
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusView>, ApiError> {
    let id = parse_job_id(&job_id)?;
    let job = state.jobs.get(&id).await?;
    Ok(Json(JobStatusView::from(&job)))
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub started: bool,
}

/// `POST /admin/import/{job_id}/start` and
/// `POST /admin/restart-import/{job_id}`
///
/// Enqueues a pipeline run, resuming from the extracted tree when one
/// already exists.
pub async fn start_import(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Accepted>, ApiError> {
    let id = parse_job_id(&job_id)?;
    state.pipeline.start(id).await?;
    Ok(Json(Accepted { started: true }))
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

/// `POST /admin/import/{job_id}/cancel`
///
/// Sets the per-job cancel flag; the running stage notices at its next
/// checkpoint. A job that lost its worker (process restart) is moved to
/// CANCELLED directly.
pub async fn cancel_import(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    if state.pipeline.cancel(&id) {
        return Ok(Json(CancelResponse { cancelled: true }));
    }
    // No active run; cancel the stored state if it is still active.
    state.jobs.record_cancel(&id).await?;
    Ok(Json(CancelResponse { cancelled: true }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub messages: bool,
    #[serde(default)]
    pub uploads: bool,
    #[serde(default)]
    pub embeddings: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub messages_deleted: u64,
    pub jobs_deleted: u64,
    pub embeddings_cleared: bool,
}

/// `POST /admin/clear` for selective truncation.
///
/// Clearing messages always clears the vector collection too; the
/// dual-write invariant does not survive half a clear.
pub async fn clear(
    State(state): State<AppState>,
    Json(request): Json<ClearRequest>,
) -> Result<Json<ClearResponse>, ApiError> {
    clear_inner(&state, &request).await
}

/// `POST /admin/clear-all`
pub async fn clear_all(State(state): State<AppState>) -> Result<Json<ClearResponse>, ApiError> {
    clear_inner(
        &state,
        &ClearRequest {
            messages: true,
            uploads: true,
            embeddings: true,
        },
    )
    .await
}

async fn clear_inner(
    state: &AppState,
    request: &ClearRequest,
) -> Result<Json<ClearResponse>, ApiError> {
    let mut response = ClearResponse {
        messages_deleted: 0,
        jobs_deleted: 0,
        embeddings_cleared: false,
    };

    if request.messages {
        response.messages_deleted = state.store.clear_corpus().await?;
        state.vector.clear().await?;
        response.embeddings_cleared = true;
    } else if request.embeddings {
        state.vector.clear().await?;
        response.embeddings_cleared = true;
    }

    if request.uploads {
        response.jobs_deleted = state.jobs.clear().await?;
        remove_dir_contents(&state.config.uploads_dir());
        remove_dir_contents(&state.config.data_dir.join("extracts"));
    }

    tracing::info!(
        messages = response.messages_deleted,
        jobs = response.jobs_deleted,
        embeddings = response.embeddings_cleared,
        "clear finished"
    );
    Ok(Json(response))
}

fn remove_dir_contents(dir: &std::path::Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove artefact");
        }
    }
}

fn parse_job_id(raw: &str) -> Result<ObjectId, ApiError> {
    ObjectId::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("invalid job id: {raw}")))
}

/// Keep uploaded filenames to a safe single path component.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches([' ', '.']).to_string();
    if trimmed.is_empty() {
        "export.zip".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_filename("export.zip"), "export.zip");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\evil\\x.zip"), "x.zip");
        assert_eq!(sanitize_filename("my export (1).zip"), "my export _1_.zip");
        assert_eq!(sanitize_filename("..."), "export.zip");
    }

    #[test]
    fn job_id_parsing() {
        assert!(parse_job_id("not-an-id").is_err());
        let id = ObjectId::new();
        assert_eq!(parse_job_id(&id.to_hex()).unwrap(), id);
    }
}
