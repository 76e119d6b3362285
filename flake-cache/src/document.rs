//! The on-disk cache document of one flake reference.
//!
//! ```json
//! { "version": 1, "flake_ref": ".", "fingerprint": "…", "revision": null, "show": null,
//!   "entries": [ { "selector": "packages.hello", "value": {}, "created_at": 0, "hits": 0 } ] }
//! ```

use flake_cache_core::time::now_as_unix_seconds;
use flake_cache_core::{CacheError, CacheResult, read_if_exists, write_atomic};
use flake_selector::Selector;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 1;

/// One cached evaluation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Implied by the document the entry lives in.
    #[serde(skip)]
    pub flake_ref: String,
    pub selector: Selector,
    pub value: serde_json::Value,
    /// Unix seconds.
    pub created_at: u64,
    pub hits: u64,
}

impl CacheEntry {
    pub fn new(flake_ref: &str, selector: Selector, value: serde_json::Value) -> Self {
        Self {
            flake_ref: flake_ref.to_string(),
            selector,
            value,
            created_at: now_as_unix_seconds(),
            hits: 0,
        }
    }

    pub fn key(&self) -> String {
        self.selector.canonical()
    }

    /// Whether `other` is the same evaluation result, possibly with a different hit count.
    fn same_result(&self, other: &CacheEntry) -> bool {
        self.created_at == other.created_at && self.value == other.value
    }
}

#[derive(Serialize, Deserialize)]
struct DiskDocument {
    version: u32,
    flake_ref: String,
    #[serde(default)]
    fingerprint: Option<String>,
    #[serde(default)]
    revision: Option<String>,
    #[serde(default)]
    show: Option<serde_json::Value>,
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

/// All cached state of one flake reference.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CacheDocument {
    pub flake_ref: String,
    /// Hash of the flake's lock and nix files when the entries were produced.
    pub fingerprint: Option<String>,
    /// Source fingerprint reported by `nix flake metadata`.
    pub revision: Option<String>,
    /// `nix flake show` tree used to expand wildcards and sets.
    pub show: Option<serde_json::Value>,
    /// Keyed by canonical selector.
    pub entries: IndexMap<String, CacheEntry>,
}

/// A change to a document, applied under the write lock to the latest
/// on-disk state.
#[derive(Debug, Clone)]
pub(crate) enum Mutation {
    Upsert(CacheEntry),
    /// Drop every entry the selector matches.
    RemoveMatching(Selector),
    /// Drop all entries and the stored tree.
    Clear,
    /// Like `Clear`, recording the state the flake is now in.
    Reset {
        fingerprint: Option<String>,
        revision: Option<String>,
    },
    SetRevision(Option<String>),
    SetShow(serde_json::Value),
    DropShow,
}

impl CacheDocument {
    pub fn new(flake_ref: &str) -> Self {
        Self {
            flake_ref: flake_ref.to_string(),
            fingerprint: None,
            revision: None,
            show: None,
            entries: IndexMap::new(),
        }
    }

    /// Apply a mutation, returning how many entries it removed.
    pub fn apply(&mut self, mutation: Mutation) -> usize {
        let before = self.entries.len();
        match mutation {
            Mutation::Upsert(mut entry) => {
                entry.flake_ref = self.flake_ref.clone();
                self.entries.insert(entry.key(), entry);
                return 0;
            }
            Mutation::RemoveMatching(selector) => {
                self.entries.retain(|_, entry| !selector.matches(&entry.selector));
            }
            Mutation::Clear => {
                self.entries.clear();
                self.show = None;
            }
            Mutation::Reset {
                fingerprint,
                revision,
            } => {
                self.entries.clear();
                self.show = None;
                self.fingerprint = fingerprint;
                self.revision = revision;
            }
            Mutation::SetRevision(revision) => self.revision = revision,
            Mutation::SetShow(show) => self.show = Some(show),
            Mutation::DropShow => self.show = None,
        }
        before - self.entries.len()
    }

    /// Whether nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.show.is_none()
    }

    /// Carry over hit counts from `other` for entries holding the same result.
    pub fn merge_hits(&mut self, other: &CacheDocument) {
        for (key, entry) in &mut self.entries {
            if let Some(theirs) = other.entries.get(key)
                && entry.same_result(theirs)
            {
                entry.hits = entry.hits.max(theirs.hits);
            }
        }
    }

    /// Read the document at `path`.
    ///
    /// A missing file is `None`. Anything that is not a complete document for
    /// `flake_ref` is [`CacheError::Corruption`].
    pub fn read(path: &Path, flake_ref: &str) -> CacheResult<Option<Self>> {
        let Some(bytes) = read_if_exists(path)? else {
            return Ok(None);
        };

        let disk: DiskDocument = serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::corruption(path, format!("invalid JSON: {e}")))?;

        if disk.version != SCHEMA_VERSION {
            return Err(CacheError::corruption(
                path,
                format!(
                    "schema version {} (expected {SCHEMA_VERSION})",
                    disk.version
                ),
            ));
        }
        if disk.flake_ref != flake_ref {
            return Err(CacheError::corruption(
                path,
                format!("belongs to `{}`, not `{flake_ref}`", disk.flake_ref),
            ));
        }

        let mut entries = IndexMap::with_capacity(disk.entries.len());
        for mut entry in disk.entries {
            if !entry.selector.is_concrete() {
                return Err(CacheError::corruption(
                    path,
                    format!("entry for pattern `{}`", entry.selector),
                ));
            }
            entry.flake_ref = disk.flake_ref.clone();
            let key = entry.key();
            if entries.insert(key.clone(), entry).is_some() {
                return Err(CacheError::corruption(path, format!("duplicate entry `{key}`")));
            }
        }

        Ok(Some(Self {
            flake_ref: disk.flake_ref,
            fingerprint: disk.fingerprint,
            revision: disk.revision,
            show: disk.show,
            entries,
        }))
    }

    /// Atomically replace the document at `path`.
    pub fn write(&self, path: &Path) -> CacheResult<()> {
        let disk = DiskDocument {
            version: SCHEMA_VERSION,
            flake_ref: self.flake_ref.clone(),
            fingerprint: self.fingerprint.clone(),
            revision: self.revision.clone(),
            show: self.show.clone(),
            entries: self.entries.values().cloned().collect(),
        };
        write_atomic(path, &serde_json::to_vec_pretty(&disk)?)
    }
}
