use nix_executor::Options;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::StoreResult;
use crate::refs::STORE_DIR;
use crate::resolve;

/// Root directory of the private store.
pub const ISOLATED_STORE_ROOT_ENV: &str = "ISOLATED_STORE_ROOT";
/// Set to `1` for processes running against an isolated store.
pub const IN_SANDBOX_FLAG_ENV: &str = "IN_SANDBOX_FLAG";

const NIX_CONF: &str = "\
experimental-features = nix-command flakes
sandbox = false
substitute = false
build-users-group =
";

/// Create (or reopen) the isolated store rooted at `base_dir`.
///
/// Creating the same store twice is harmless.
pub fn create_isolated_store(base_dir: impl AsRef<Path>) -> StoreResult<StoreHandle> {
    fs::create_dir_all(base_dir.as_ref())?;
    let handle = StoreHandle {
        base: fs::canonicalize(base_dir.as_ref())?,
    };

    for dir in [
        handle.store_dir(),
        handle.state_dir(),
        handle.gcroots_dir(),
        handle.conf_dir(),
    ] {
        fs::create_dir_all(dir)?;
    }

    let conf = handle.conf_dir().join("nix.conf");
    if fs::read_to_string(&conf).ok().as_deref() != Some(NIX_CONF) {
        fs::write(&conf, NIX_CONF)?;
    }

    debug!(base = %handle.base.display(), "Created isolated store");
    Ok(handle)
}

/// A private store directory tree and the environment that selects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHandle {
    base: PathBuf,
}

impl StoreHandle {
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Physical location of logical `/nix/store` paths.
    pub fn store_dir(&self) -> PathBuf {
        self.base.join("nix/store")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.base.join("nix/var/nix")
    }

    pub fn gcroots_dir(&self) -> PathBuf {
        self.state_dir().join("gcroots")
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.base.join("etc/nix")
    }

    /// Environment bindings that point nix at this store.
    pub fn env(&self) -> BTreeMap<String, String> {
        let base = self.base.to_string_lossy();
        BTreeMap::from([
            (ISOLATED_STORE_ROOT_ENV.to_string(), base.to_string()),
            (IN_SANDBOX_FLAG_ENV.to_string(), "1".to_string()),
            ("NIX_REMOTE".to_string(), format!("local?root={base}")),
            (
                "NIX_STATE_DIR".to_string(),
                self.state_dir().to_string_lossy().into_owned(),
            ),
            (
                "NIX_CONF_DIR".to_string(),
                self.conf_dir().to_string_lossy().into_owned(),
            ),
        ])
    }

    /// Add this store's bindings to executor options, overriding existing ones.
    pub fn apply(&self, options: &mut Options) {
        options.env.extend(self.env());
    }

    /// Map a logical store path to its physical location. Other paths are returned as is.
    pub fn to_physical(&self, path: &Path) -> PathBuf {
        resolve::redirect(path.to_path_buf(), Some(&self.store_dir()))
    }

    /// Follow symlinks to the real path, mapping logical store paths into this store
    /// at every hop.
    pub fn resolve_physical_path(&self, path: &Path) -> StoreResult<PathBuf> {
        resolve::resolve(path, Some(&self.store_dir()))
    }

    /// Whether `path` resolves to something below the store directory.
    pub fn contains(&self, path: &Path) -> bool {
        let store = self.store_dir();
        self.resolve_physical_path(path)
            .is_ok_and(|physical| physical != store && physical.starts_with(&store))
    }

    /// Delete the whole tree, including read-only store objects.
    pub fn remove(self) -> StoreResult<()> {
        crate::seed::remove_tree(&self.base)?;
        debug!(base = %self.base.display(), "Removed isolated store");
        Ok(())
    }

    /// The logical store path of the top-level store object containing `physical`.
    pub(crate) fn logical_object(&self, physical: &Path) -> Option<PathBuf> {
        let name = physical
            .strip_prefix(self.store_dir())
            .ok()?
            .components()
            .next()?;
        Some(Path::new(STORE_DIR).join(name))
    }
}
