//! Hybrid search endpoint.

use crate::error::ApiError;
use crate::search::{SearchResult, DEFAULT_LIMIT};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Mixing weight: 0 = pure lexical, 1 = pure vector.
    #[serde(default = "default_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_alpha() -> f64 {
    0.5
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub hybrid_alpha: f64,
    pub results: Vec<SearchResult>,
}

/// `POST /api/v1/search`
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    if !(0.0..=1.0).contains(&request.hybrid_alpha) {
        return Err(ApiError::BadRequest(format!(
            "hybrid_alpha must be within [0, 1], got {}",
            request.hybrid_alpha
        )));
    }

    let results = state
        .search
        .search(&request.query, request.hybrid_alpha, request.limit)
        .await?;

    Ok(Json(SearchResponse {
        query: request.query,
        hybrid_alpha: request.hybrid_alpha,
        results,
    }))
}
