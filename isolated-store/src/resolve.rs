use std::collections::{HashSet, VecDeque};
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::refs::STORE_DIR;

/// Upper bound on symlinks followed while resolving one path, as in Linux.
const MAX_HOPS: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Part {
    Root,
    Parent,
    Name(OsString),
}

/// Follow symlinks to the real underlying path.
///
/// Fails with [`StoreError::UnresolvablePath`] when a component is missing, a link
/// is broken, or links form a cycle.
pub fn resolve_physical_path(path: &Path) -> StoreResult<PathBuf> {
    resolve(path, None)
}

/// Map a logical store path below `store_dir`.
pub(crate) fn redirect(path: PathBuf, store_dir: Option<&Path>) -> PathBuf {
    let Some(store_dir) = store_dir else {
        return path;
    };
    match path.strip_prefix(STORE_DIR) {
        Ok(rest) if rest.as_os_str().is_empty() => store_dir.to_path_buf(),
        Ok(rest) => store_dir.join(rest),
        Err(_) => path,
    }
}

pub(crate) fn resolve(path: &Path, store_dir: Option<&Path>) -> StoreResult<PathBuf> {
    let unresolvable = |reason: String| StoreError::UnresolvablePath {
        path: path.to_path_buf(),
        reason,
    };

    let start = if path.is_relative() {
        std::env::current_dir()?.join(path)
    } else {
        path.to_path_buf()
    };
    // Logical store paths never touch the host's `/nix`.
    let mut queue = VecDeque::new();
    push_front(&mut queue, &redirect(start, store_dir));

    let mut resolved = PathBuf::from("/");
    let mut hops = 0;
    let mut seen = HashSet::new();

    while let Some(part) = queue.pop_front() {
        let name = match part {
            Part::Root => {
                resolved = PathBuf::from("/");
                continue;
            }
            Part::Parent => {
                resolved.pop();
                continue;
            }
            Part::Name(name) => name,
        };

        let candidate = redirect(resolved.join(&name), store_dir);
        let metadata = fs::symlink_metadata(&candidate)
            .map_err(|e| unresolvable(format!("{}: {e}", candidate.display())))?;
        if !metadata.file_type().is_symlink() {
            resolved = candidate;
            continue;
        }

        hops += 1;
        if hops > MAX_HOPS || !seen.insert((candidate.clone(), queue.clone())) {
            return Err(unresolvable(format!(
                "symlink cycle through {}",
                candidate.display()
            )));
        }

        let target = fs::read_link(&candidate)
            .map_err(|e| unresolvable(format!("{}: {e}", candidate.display())))?;
        trace!(link = %candidate.display(), target = %target.display(), "Following symlink");

        resolved = candidate
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        push_front(&mut queue, &redirect(target, store_dir));
    }

    Ok(resolved)
}

fn push_front(queue: &mut VecDeque<Part>, path: &Path) {
    for component in path.components().rev() {
        let part = match component {
            Component::RootDir => Part::Root,
            Component::ParentDir => Part::Parent,
            Component::Normal(name) => Part::Name(name.to_os_string()),
            Component::CurDir | Component::Prefix(_) => continue,
        };
        queue.push_front(part);
    }
}
