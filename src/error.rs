//! Error handling module for the syncer
//!
//! Every failure the engine can report is a [`SyncError`]. Configuration errors
//! abort before any task runs; everything else is caught at the task boundary,
//! wrapped with the task name and handed to the retry machinery.

use crate::concurrency::ConcurrencyError;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Malformed configuration; aborts task-list construction
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("unsupported repo url: {0}")]
    UnsupportedUrl(String),

    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("private key file {} does not exist", .0.display())]
    MissingKeyFile(PathBuf),

    #[error("invalid manifest type: {0}")]
    UnknownMediaType(String),

    #[error("Manifest decode error: {0}")]
    ManifestDecode(String),

    /// Any failure reported by a clone/push/fetch/put collaborator
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} during {operation}: {message}")]
    Http {
        status: u16,
        operation: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Concurrency error: {0}")]
    Concurrency(#[from] ConcurrencyError),

    #[error("task {name}: {source}")]
    Task {
        name: String,
        #[source]
        source: Box<SyncError>,
    },

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("{failed}/{total} task failed")]
    TasksFailed { failed: usize, total: usize },
}

impl SyncError {
    /// Wrap an error with the identity of the task it escaped from
    pub fn in_task(self, name: &str) -> Self {
        match self {
            // already carries an identity
            SyncError::Task { .. } => self,
            other => SyncError::Task {
                name: name.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// True for errors that must halt startup rather than be retried
    pub fn is_config(&self) -> bool {
        matches!(self, SyncError::Config(_))
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidReference(err.to_string())
    }
}
