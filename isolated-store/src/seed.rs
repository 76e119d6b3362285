use futures::future::join_all;
use nix_executor::Options;
use std::fs;
use std::ffi::OsString;
use std::io;
use std::os::unix::fs::{PermissionsExt, symlink};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::refs::STORE_DIR;
use crate::store::StoreHandle;

/// Store paths to copy into an isolated store, as produced by `closureInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureManifest {
    /// Logical store paths, in manifest order.
    pub store_paths: Vec<PathBuf>,
    /// Output of `nix-store --dump-db` for the paths, loaded after copying.
    pub registration: Option<Vec<u8>>,
    /// Where the store paths are read from.
    pub source_store: PathBuf,
}

impl ClosureManifest {
    pub fn new<I, P>(store_paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut paths: Vec<PathBuf> = Vec::new();
        for path in store_paths {
            let path = path.into();
            if !paths.contains(&path) {
                paths.push(path);
            }
        }
        Self {
            store_paths: paths,
            registration: None,
            source_store: PathBuf::from(STORE_DIR),
        }
    }

    /// Parse a newline-separated list of store paths.
    pub fn parse(text: &str) -> Self {
        Self::new(text.lines().map(str::trim).filter(|line| !line.is_empty()))
    }

    /// Read a `closureInfo` directory (`store-paths` plus optional `registration`)
    /// or a plain list of store paths.
    pub fn read(path: &Path) -> StoreResult<Self> {
        if !path.is_dir() {
            return Ok(Self::parse(&fs::read_to_string(path)?));
        }

        let mut manifest = Self::parse(&fs::read_to_string(path.join("store-paths"))?);
        match fs::read(path.join("registration")) {
            Ok(registration) => manifest.registration = Some(registration),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(manifest)
    }

    pub fn with_registration(mut self, registration: impl Into<Vec<u8>>) -> Self {
        self.registration = Some(registration.into());
        self
    }

    pub fn with_source_store(mut self, source_store: impl Into<PathBuf>) -> Self {
        self.source_store = source_store.into();
        self
    }
}

/// The single component below the store directory that names a store object.
fn object_name(path: &Path) -> Option<PathBuf> {
    let mut components = path.strip_prefix(STORE_DIR).ok()?.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(name)), None) => Some(PathBuf::from(name)),
        _ => None,
    }
}

impl StoreHandle {
    /// Copy every path of `manifest` into this store, then register them.
    ///
    /// Paths are copied in parallel. Paths already present are left alone. If any
    /// path fails to copy, or registration fails, every path copied by this call is
    /// removed again. Returns the logical paths that were copied.
    #[instrument(skip_all, fields(store = %self.base().display(), paths = manifest.store_paths.len()))]
    pub async fn seed_from_closure(
        &self,
        manifest: &ClosureManifest,
        nix: &Options,
    ) -> StoreResult<Vec<PathBuf>> {
        let mut jobs = Vec::with_capacity(manifest.store_paths.len());
        for path in &manifest.store_paths {
            let name = object_name(path).ok_or_else(|| StoreError::InvalidStorePath {
                path: path.clone(),
                store: PathBuf::from(STORE_DIR),
            })?;
            jobs.push((
                path.clone(),
                manifest.source_store.join(&name),
                self.store_dir().join(&name),
            ));
        }

        let tasks = jobs.iter().map(|(_, src, dst)| {
            let (src, dst) = (src.clone(), dst.clone());
            tokio::task::spawn_blocking(move || copy_store_path(&src, &dst))
        });
        let results = join_all(tasks).await;

        let mut copied = Vec::new();
        let mut failure = None;
        for ((logical, _, dst), result) in jobs.into_iter().zip(results) {
            match result.map_err(io::Error::other).and_then(|r| r) {
                Ok(true) => copied.push((logical, dst)),
                Ok(false) => debug!(path = %logical.display(), "Already present"),
                Err(source) => {
                    if failure.is_none() {
                        failure = Some(StoreError::Seed {
                            path: logical,
                            source,
                        });
                    }
                }
            }
        }

        if failure.is_none()
            && let Err(e) = self.register(manifest, !copied.is_empty(), nix).await
        {
            failure = Some(e);
        }

        if let Some(error) = failure {
            for (logical, dst) in &copied {
                if let Err(e) = remove_tree(dst) {
                    warn!(path = %logical.display(), "Failed to roll back seeded path: {e}");
                }
            }
            return Err(error);
        }

        info!(copied = copied.len(), "Seeded isolated store");
        Ok(copied.into_iter().map(|(logical, _)| logical).collect())
    }

    /// Register the manifest's paths in this store's database.
    ///
    /// Without a registration in the manifest, one is dumped from the source
    /// database, and only when something new was copied.
    async fn register(
        &self,
        manifest: &ClosureManifest,
        copied_any: bool,
        nix: &Options,
    ) -> StoreResult<()> {
        let dumped;
        let registration = match &manifest.registration {
            Some(registration) => registration,
            None if !copied_any || manifest.store_paths.is_empty() => return Ok(()),
            None => {
                let mut args = vec![OsString::from("--dump-db")];
                args.extend(manifest.store_paths.iter().map(|p| p.as_os_str().to_owned()));
                dumped = nix_store(nix, &args, None).await?;
                &dumped
            }
        };

        let mut options = nix.clone();
        self.apply(&mut options);
        nix_store(&options, &[OsString::from("--load-db")], Some(registration.as_slice())).await?;
        Ok(())
    }
}

/// Run `nix-store` next to the configured nix binary and collect its stdout.
async fn nix_store(
    options: &Options,
    args: &[OsString],
    stdin: Option<&[u8]>,
) -> StoreResult<Vec<u8>> {
    let program = options.sibling_binary("nix-store");
    let command = format!(
        "nix-store {}",
        args.first().map(|a| a.to_string_lossy()).unwrap_or_default()
    );
    debug!(%command, "Running");

    let mut child = tokio::process::Command::new(&program)
        .args(args)
        .envs(&options.env)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut written = Ok(());
    if let Some(input) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        written = pipe.write_all(input).await;
        drop(pipe);
    }

    let output = tokio::time::timeout(options.timeout, child.wait_with_output())
        .await
        .map_err(|_| StoreError::Registration {
            stderr: format!("`{command}` timed out after {:?}", options.timeout),
        })??;

    if !output.status.success() {
        return Err(StoreError::Registration {
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    written?;
    Ok(output.stdout)
}

/// Copy one store object. Returns `false` if it was already present.
///
/// The copy is assembled under a hidden name and renamed into place, so a
/// half-copied object is never visible under its real name.
fn copy_store_path(src: &Path, dst: &Path) -> io::Result<bool> {
    if fs::symlink_metadata(dst).is_ok() {
        return Ok(false);
    }
    fs::symlink_metadata(src)?;

    let file_name = dst
        .file_name()
        .ok_or_else(|| io::Error::other("store path has no name"))?;
    let mut staging_name = OsString::from(".seed-");
    staging_name.push(file_name);
    let staging = dst.with_file_name(staging_name);
    remove_tree(&staging)?;

    if let Err(e) = copy_tree(src, &staging) {
        let _ = remove_tree(&staging);
        return Err(e);
    }

    match fs::rename(&staging, dst) {
        Ok(()) => Ok(true),
        // Another seeder won the race.
        Err(_) if fs::symlink_metadata(dst).is_ok() => {
            remove_tree(&staging)?;
            Ok(false)
        }
        Err(e) => {
            let _ = remove_tree(&staging);
            Err(e)
        }
    }
}

/// Recursive copy preserving symlinks and permissions.
///
/// `fs::copy` uses `copy_file_range`, which shares extents on filesystems that
/// support reflinks.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let mut dirs = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = if relative.as_os_str().is_empty() {
            dst.to_path_buf()
        } else {
            dst.join(relative)
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            symlink(fs::read_link(entry.path())?, &target)?;
        } else if file_type.is_dir() {
            fs::create_dir(&target)?;
            dirs.push((target, entry.metadata()?.permissions()));
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    // Read-only directories are restored last, deepest first.
    for (dir, permissions) in dirs.into_iter().rev() {
        fs::set_permissions(dir, permissions)?;
    }
    Ok(())
}

/// Remove a file or directory tree, including read-only directories.
pub(crate) fn remove_tree(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !metadata.is_dir() {
        return fs::remove_file(path);
    }

    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            let mut permissions = entry.metadata()?.permissions();
            permissions.set_mode(permissions.mode() | 0o700);
            fs::set_permissions(entry.path(), permissions)?;
        }
    }
    fs::remove_dir_all(path)
}
