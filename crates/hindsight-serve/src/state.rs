//! Application state.
//!
//! All clients (document store, vector store, embedder, pipeline) are
//! constructed once at startup and injected through [`AppState`]; request
//! handlers never reach for process-wide singletons or the environment.

use crate::search::SearchEngine;
use hindsight_core::Config;
use hindsight_ingest::{connect_mongo, Embedder, JobStore, Pipeline, Store, VectorStore};
use std::sync::Arc;

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub jobs: JobStore,
    pub vector: VectorStore,
    pub pipeline: Arc<Pipeline>,
    pub search: Arc<SearchEngine>,
}

impl AppState {
    /// Connect all collaborators and assemble the state.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let db = connect_mongo(&config).await?;
        let store = Store::new(&db);
        let jobs = JobStore::new(&db);
        let vector = VectorStore::new(&config.chroma_url())?;
        let embedder = Embedder::new(&config.ollama_url)?;

        let pipeline = Arc::new(Pipeline::new(
            config.clone(),
            store.clone(),
            jobs.clone(),
            vector.clone(),
            embedder.clone(),
        ));
        let search = Arc::new(SearchEngine::new(
            store.clone(),
            vector.clone(),
            embedder,
        ));

        std::fs::create_dir_all(config.uploads_dir())?;
        std::fs::create_dir_all(&config.file_storage)?;

        Ok(Self {
            config,
            store,
            jobs,
            vector,
            pipeline,
            search,
        })
    }
}
