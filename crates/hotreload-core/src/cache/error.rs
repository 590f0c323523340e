use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Corrupted cache entry: {reason}")]
    Corrupted { reason: String },

    #[error("Cache entry too large: {what}")]
    TooLarge { what: String },

    #[error("Unit not found: {name}")]
    UnknownUnit { name: String },

    #[error("No usable cache partition at {path}: {reason}")]
    Unusable { path: PathBuf, reason: String },

    #[error("Cache partition {path} is open read-only")]
    ReadOnly { path: PathBuf },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupted(reason: impl Into<String>) -> Self {
        CacheError::Corrupted {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
