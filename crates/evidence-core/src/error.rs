use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A single document could not be turned into chunks. The corpus build
    /// skips it and keeps going.
    #[error("Chunking failed for {file}: {reason}")]
    Chunking { file: String, reason: String },

    /// The embedding port failed or returned an inconsistent shape while
    /// building. Nothing is committed for that build attempt.
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// A persisted snapshot failed validation. Callers treat this as a cache miss.
    #[error("Corrupt index at {}: {reason}", path.display())]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("Duplicate chunk id: {0}")]
    DuplicateChunkId(String),

    #[error("Index build cancelled")]
    Cancelled,

    #[error("Build already in progress for cache key {0}")]
    BuildInProgress(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptIndex { path: path.into(), reason: reason.into() }
    }

    pub fn is_corrupt_index(&self) -> bool {
        matches!(self, Self::CorruptIndex { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
