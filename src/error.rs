use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort an analysis run. Per-file parse problems and cache
/// I/O errors never surface here; they degrade into diagnostics.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("cannot read project root {}: {source}", root.display())]
    Collection {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project root {} is not a directory", root.display())]
    NotADirectory { root: PathBuf },

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("analysis cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("worker pool: {0}")]
    WorkerPool(String),
}

impl AnalysisError {
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            AnalysisError::Collection { .. } | AnalysisError::NotADirectory { .. }
        )
    }
}

/// Raised on the consumer side when a document cannot be accepted.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema version mismatch: expected {expected}, found {found:?}")]
    VersionMismatch { expected: String, found: String },

    #[error("malformed analysis document: {0}")]
    Malformed(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("path {0:?} escapes the project root")]
    Escape(String),

    #[error("file {0:?} not found under the project root")]
    NotFound(String),

    #[error("read {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

