use miette::Diagnostic;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Diagnostic, Debug)]
pub enum StoreError {
    #[error("{} is not a path inside the store at {}", path.display(), store.display())]
    #[diagnostic(code(isolated_store::invalid_store_path))]
    InvalidStorePath { path: PathBuf, store: PathBuf },

    #[error("cannot resolve {}: {reason}", path.display())]
    #[diagnostic(code(isolated_store::unresolvable_path))]
    UnresolvablePath { path: PathBuf, reason: String },

    #[error("invalid gc root name `{0}`")]
    #[diagnostic(
        code(isolated_store::invalid_root_name),
        help("root names are single non-empty path components")
    )]
    InvalidRootName(String),

    #[error("failed to seed {}", path.display())]
    #[diagnostic(code(isolated_store::seed))]
    Seed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to register seeded paths in the store database")]
    #[diagnostic(code(isolated_store::registration))]
    Registration { stderr: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}
