//! Health check endpoint.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub messages: u64,
    /// Vector count, absent when the vector store is unreachable; the
    /// document store is the liveness authority.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vectors: Option<u64>,
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let messages = state.store.message_count().await?;
    let vectors = state.vector.count().await.ok();
    Ok(Json(HealthResponse {
        status: "ok",
        messages,
        vectors,
    }))
}
