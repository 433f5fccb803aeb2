//! Environment-driven configuration.
//!
//! Every deployable binary loads a [`Config`] once at startup (after
//! `dotenvy`) and passes it down; nothing else reads the environment.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server bind address (e.g. "0.0.0.0:8000").
    pub bind_addr: String,

    /// MongoDB connection URL.
    pub mongo_url: String,

    /// MongoDB database name.
    pub mongo_db: String,

    /// Chroma vector store host.
    pub chroma_host: String,

    /// Chroma vector store port.
    pub chroma_port: u16,

    /// Ollama embedding service base URL.
    pub ollama_url: String,

    /// Root directory for `uploads/` and `extracts/<job_id>/`.
    pub data_dir: PathBuf,

    /// Root directory for uploaded-file attachments surfaced by the export.
    pub file_storage: PathBuf,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// All variables have defaults matching the local compose setup:
    /// - `BIND_ADDR` (default `0.0.0.0:8000`)
    /// - `MONGO_URL` (default `mongodb://localhost:27017`)
    /// - `MONGO_DB` (default `slack_data`)
    /// - `CHROMA_HOST` (default `localhost`), `CHROMA_PORT` (default `8000`)
    /// - `OLLAMA_URL` (default `http://localhost:11434`)
    /// - `DATA_DIR` (default `data`), `FILE_STORAGE` (default `file_storage`)
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:8000");
        let mongo_url = env_or("MONGO_URL", "mongodb://localhost:27017");
        let mongo_db = env_or("MONGO_DB", "slack_data");
        let chroma_host = env_or("CHROMA_HOST", "localhost");
        let chroma_port = env_or("CHROMA_PORT", "8000")
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("CHROMA_PORT must be a port number: {e}")))?;
        let ollama_url = env_or("OLLAMA_URL", "http://localhost:11434");
        let data_dir = PathBuf::from(env_or("DATA_DIR", "data"));
        let file_storage = PathBuf::from(env_or("FILE_STORAGE", "file_storage"));

        tracing::info!(
            mongo_url = %mongo_url,
            mongo_db = %mongo_db,
            chroma = %format!("{chroma_host}:{chroma_port}"),
            ollama_url = %ollama_url,
            data_dir = %data_dir.display(),
            "configuration loaded"
        );

        Ok(Self {
            bind_addr,
            mongo_url,
            mongo_db,
            chroma_host,
            chroma_port,
            ollama_url,
            data_dir,
            file_storage,
        })
    }

    /// Chroma REST base URL.
    pub fn chroma_url(&self) -> String {
        format!("http://{}:{}", self.chroma_host, self.chroma_port)
    }

    /// Directory staged archives are uploaded into.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Extraction root for one job.
    pub fn extract_dir(&self, job_id: &str) -> PathBuf {
        self.data_dir.join("extracts").join(job_id)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths() {
        let config = Config {
            bind_addr: "0.0.0.0:8000".into(),
            mongo_url: "mongodb://localhost:27017".into(),
            mongo_db: "slack_data".into(),
            chroma_host: "chroma".into(),
            chroma_port: 8000,
            ollama_url: "http://localhost:11434".into(),
            data_dir: PathBuf::from("/data"),
            file_storage: PathBuf::from("/files"),
        };
        assert_eq!(config.chroma_url(), "http://chroma:8000");
        assert_eq!(config.uploads_dir(), PathBuf::from("/data/uploads"));
        assert_eq!(
            config.extract_dir("abc123"),
            PathBuf::from("/data/extracts/abc123")
        );
    }
}
