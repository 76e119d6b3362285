use flake_cache_core::CacheError;
use flake_selector::MalformedSelectorError;
use miette::Diagnostic;
use nix_executor::CommandError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Any failure surfaced by the flake cache.
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Selector(#[from] MalformedSelectorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] CacheError),
}

impl Error {
    /// Stable machine-readable tag of the failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Selector(_) => "malformed-selector",
            Error::Command(err) => match err {
                CommandError::Spawn { .. } => "spawn",
                CommandError::Evaluation { .. } => "evaluation",
                CommandError::Build { .. } => "build",
                CommandError::MalformedOutput { .. } => "malformed-output",
                CommandError::Timeout { .. } => "timeout",
                CommandError::NotConcrete { .. } => "not-concrete",
            },
            Error::Cache(err) => match err {
                CacheError::Corruption { .. } => "cache-corruption",
                CacheError::LockTimeout { .. } => "cache-lock-timeout",
                CacheError::Io(_) => "io",
                CacheError::Json(_) => "json",
                CacheError::InvalidPath(_) => "invalid-path",
            },
        }
    }

    /// Captured evaluator stderr, when the failure came from a nix invocation.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::Command(err) => err.stderr(),
            Error::Selector(_) | Error::Cache(_) => None,
        }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Cache(CacheError::Corruption { .. }))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Cache(CacheError::Io(std::io::Error::other(err)))
    }
}
