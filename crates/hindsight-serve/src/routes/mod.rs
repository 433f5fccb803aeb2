//! API route definitions.

mod admin;
mod conversations;
mod health;
mod search;

use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the complete API router, including the request-tracing and CORS
/// middleware every deployment of this service wants.
///
/// # Route Structure
///
/// ## Health
/// - `GET /health` - Liveness plus corpus counts
///
/// ## Admin (pipeline control)
/// - `POST /admin/upload` - Stage an export archive (multipart)
/// - `GET /admin/import-status` - Status map for all jobs
/// - `GET /admin/import/{job_id}/status` - Status for one job
/// - `POST /admin/import/{job_id}/start` - Start or resume a run
/// - `POST /admin/import/{job_id}/cancel` - Cooperative cancel
/// - `POST /admin/restart-import/{job_id}` - Alias for start
/// - `POST /admin/clear` - Selective truncation
/// - `POST /admin/clear-all` - Full truncation
///
/// ## Query
/// - `POST /api/v1/search` - Hybrid lexical/semantic search
/// - `GET /conversations` - Conversation listing with counts
/// - `GET /conversations/{id}` - Paged messages for one conversation
/// - `GET /conversations/{id}/context` - Messages around a timestamp
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/admin/upload",
            post(admin::upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/admin/import-status", get(admin::import_status))
        .route("/admin/import/{job_id}/status", get(admin::job_status))
        .route("/admin/import/{job_id}/start", post(admin::start_import))
        .route("/admin/import/{job_id}/cancel", post(admin::cancel_import))
        .route("/admin/restart-import/{job_id}", post(admin::start_import))
        .route("/admin/clear", post(admin::clear))
        .route("/admin/clear-all", post(admin::clear_all))
        .route("/api/v1/search", post(search::search))
        .route("/conversations", get(conversations::list))
        .route("/conversations/{id}", get(conversations::show))
        .route(
            "/conversations/{id}/context",
            get(conversations::context),
        )
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
