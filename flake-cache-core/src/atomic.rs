//! Whole-file replacement that is never observable half-written.
//!
//! Contents are written to a temporary file in the target's directory, flushed to disk
//! and renamed over the target. Readers see either the previous file or the new one.

use crate::error::{CacheError, CacheResult};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::trace;

/// A fully written temporary file waiting to replace its target.
///
/// Dropping a `StagedWrite` without committing removes the temporary file and
/// leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    /// Write `contents` next to `target` without touching `target` itself.
    pub fn stage(target: &Path, contents: &[u8]) -> CacheResult<Self> {
        let dir = target
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .ok_or_else(|| CacheError::InvalidPath(target.to_path_buf()))?;
        fs::create_dir_all(dir)?;

        let file_name = target
            .file_name()
            .ok_or_else(|| CacheError::InvalidPath(target.to_path_buf()))?;
        let mut prefix = std::ffi::OsString::from(".");
        prefix.push(file_name);
        prefix.push(".");

        let mut temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".tmp")
            .tempfile_in(dir)?;
        temp.write_all(contents)?;
        temp.as_file().sync_all()?;

        Ok(Self {
            temp,
            target: target.to_path_buf(),
        })
    }

    /// Path of the temporary file holding the staged contents.
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically replace the target with the staged contents.
    pub fn commit(self) -> CacheResult<()> {
        let Self { temp, target } = self;
        temp.persist(&target).map_err(|e| CacheError::Io(e.error))?;

        // Persist the rename itself.
        if let Some(dir) = target.parent()
            && let Ok(dir) = File::open(dir)
        {
            let _ = dir.sync_all();
        }

        trace!(path = %target.display(), "Replaced file atomically");
        Ok(())
    }
}

/// Stage and commit in one step.
pub fn write_atomic(target: &Path, contents: &[u8]) -> CacheResult<()> {
    StagedWrite::stage(target, contents)?.commit()
}

/// Read a file, treating a missing file as `None`.
pub fn read_if_exists(path: &Path) -> CacheResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
