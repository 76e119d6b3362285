use miette::Diagnostic;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Common error type for cache file operations
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache file {} is corrupt: {reason}", path.display())]
    #[diagnostic(
        code(flake_cache::corruption),
        help("discard the cache file to start over with an empty cache")
    )]
    Corruption { path: PathBuf, reason: String },

    #[error("Timed out after {waited:?} waiting for the cache lock {}", path.display())]
    #[diagnostic(code(flake_cache::lock_timeout), help("another process is writing the cache; retry later"))]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Invalid path: {}", .0.display())]
    InvalidPath(PathBuf),
}

impl CacheError {
    /// Create a new corruption error
    pub fn corruption<S: ToString>(path: impl Into<PathBuf>, reason: S) -> Self {
        Self::Corruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A specialized result type for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;
