use flake_cache_core::compute_string_hash;
use nix_executor::DebugChannels;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the lock file guarding cache writes.
pub const CACHE_LOCK_PATH_ENV: &str = "CACHE_LOCK_PATH";

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`crate::FlakeCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one JSON document per flake reference.
    pub cache_dir: PathBuf,
    /// Lock file shared by all documents. Each document has its own lock when unset.
    pub lock_path: Option<PathBuf>,
    /// Bounded wait for the write lock.
    pub lock_timeout: Duration,
    /// Drop cached entries of a local flake when its `flake.lock` or `flake.nix` changed.
    pub validate_fingerprint: bool,
    /// How many expanded selectors are evaluated at once.
    pub parallelism: usize,
    pub debug: DebugChannels,
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            lock_path: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            validate_fingerprint: true,
            parallelism: 4,
            debug: DebugChannels::default(),
        }
    }

    /// Read `CACHE_LOCK_PATH` and the debug channels from the process environment.
    pub fn from_env(cache_dir: impl Into<PathBuf>) -> Self {
        Self::from_lookup(cache_dir, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(cache_dir: impl Into<PathBuf>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            lock_path: lookup(CACHE_LOCK_PATH_ENV)
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            debug: DebugChannels::from_lookup(&lookup),
            ..Self::new(cache_dir)
        }
    }

    /// The document holding the entries of `flake_ref`.
    pub fn document_path(&self, flake_ref: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.json", compute_string_hash(flake_ref)))
    }

    pub fn lock_path_for(&self, document: &Path) -> PathBuf {
        self.lock_path
            .clone()
            .unwrap_or_else(|| document.with_extension("json.lock"))
    }
}

/// `$XDG_CACHE_HOME/flake-cache`.
pub fn default_cache_dir() -> Option<PathBuf> {
    xdg::BaseDirectories::new()
        .get_cache_home()
        .map(|home| home.join("flake-cache"))
}
