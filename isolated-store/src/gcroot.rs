use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::store::StoreHandle;

/// A named root in the isolated store's gcroots directory.
///
/// The link points at the logical store path so nix sees it as a root of
/// the store it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcRoot {
    name: String,
    link: PathBuf,
    target: PathBuf,
}

impl GcRoot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn link(&self) -> &Path {
        &self.link
    }

    /// The logical store path kept alive by this root.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Delete the root. Removing a root that is already gone is not an error.
    pub fn remove(self) -> StoreResult<()> {
        match fs::remove_file(&self.link) {
            Ok(()) => {
                debug!(root = %self.name, "Removed gc root");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl StoreHandle {
    /// Root the store object that `store_path` resolves to.
    ///
    /// `store_path` may be logical (`/nix/store/...`), physical, or any symlink chain
    /// ending in the store. An existing root with the same name is replaced.
    pub fn add_gc_root(&self, store_path: &Path, root_name: &str) -> StoreResult<GcRoot> {
        if root_name.is_empty()
            || root_name == "."
            || root_name == ".."
            || root_name.contains('/')
            || root_name.contains('\0')
        {
            return Err(StoreError::InvalidRootName(root_name.to_string()));
        }

        let invalid = || StoreError::InvalidStorePath {
            path: store_path.to_path_buf(),
            store: self.store_dir(),
        };
        let physical = match self.resolve_physical_path(store_path) {
            Ok(physical) => physical,
            Err(StoreError::UnresolvablePath { .. }) => return Err(invalid()),
            Err(e) => return Err(e),
        };
        let target = self.logical_object(&physical).ok_or_else(invalid)?;

        let gcroots = self.gcroots_dir();
        fs::create_dir_all(&gcroots)?;
        let link = gcroots.join(root_name);
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link)?;
        }
        symlink(&target, &link)?;

        debug!(root = root_name, target = %target.display(), "Added gc root");
        Ok(GcRoot {
            name: root_name.to_string(),
            link,
            target,
        })
    }

    /// All roots in the gcroots directory, sorted by name.
    pub fn gc_roots(&self) -> StoreResult<Vec<GcRoot>> {
        let mut roots = Vec::new();
        let entries = match fs::read_dir(self.gcroots_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(roots),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_symlink() {
                continue;
            }
            let link = entry.path();
            roots.push(GcRoot {
                name: entry.file_name().to_string_lossy().into_owned(),
                target: fs::read_link(&link)?,
                link,
            });
        }

        roots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roots)
    }
}
