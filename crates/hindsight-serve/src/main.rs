//! Hindsight Serve - HTTP API server.
//!
//! Boot sequence: environment (`.env` honoured when present), tracing,
//! configuration, store connections plus the background pipeline, then
//! the axum listener. All middleware lives in [`hindsight_serve::router`];
//! this binary only wires the pieces together.

use hindsight_core::Config;
use hindsight_serve::{router, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hindsight_serve=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let bind_addr = config.bind_addr.clone();

    // Connects MongoDB/Chroma/Ollama clients, builds the pipeline
    // controller, and creates the upload and file-storage directories.
    let state = AppState::connect(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "hindsight api listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
