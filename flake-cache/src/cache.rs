use crate::config::CacheConfig;
use crate::document::{CacheDocument, CacheEntry, Mutation};
use crate::error::Result;
use flake_cache_core::time::age;
use flake_cache_core::{CacheError, LockFile, fingerprint_files};
use flake_selector::{Selector, SelectorKind};
use futures::stream::{self, StreamExt};
use nix_executor::{Evaluated, FlakeEvaluator};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

const SELECTOR_TARGET: &str = "flake_cache::selectors";

/// Result of [`FlakeCache::get`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Selected {
    Value(serde_json::Value),
    /// An optional segment of the selector does not exist.
    Absent,
    /// One result per concrete selector a wildcard or set expanded to, in discovery order.
    Expanded(Vec<ResolvedEntry>),
}

impl Selected {
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Selected::Value(value) => Some(value),
            Selected::Absent | Selected::Expanded(_) => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Selected::Absent)
    }

    pub fn expanded(&self) -> &[ResolvedEntry] {
        match self {
            Selected::Expanded(entries) => entries,
            Selected::Value(_) | Selected::Absent => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Lookup {
    Found(serde_json::Value),
    Absent,
}

/// One concrete result of an expanded selector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedEntry {
    /// The names that filled the wildcard and set positions.
    pub name: String,
    pub selector: Selector,
    pub lookup: Lookup,
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub absent: u64,
    pub invalidations: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    absent: AtomicU64,
    invalidations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

/// Evaluation cache for flake outputs.
///
/// Results are kept in memory and in one JSON document per flake reference
/// under [`CacheConfig::cache_dir`]. Every change to a document is a locked
/// read-modify-write of the current file, so separate processes sharing the
/// directory never lose each other's entries.
pub struct FlakeCache<E> {
    evaluator: E,
    config: CacheConfig,
    documents: Mutex<HashMap<String, CacheDocument>>,
    counters: Counters,
}

impl<E: FlakeEvaluator> FlakeCache<E> {
    pub fn new(evaluator: E, config: CacheConfig) -> Self {
        Self {
            evaluator,
            config,
            documents: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            absent: self.counters.absent.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
        }
    }

    fn documents(&self) -> MutexGuard<'_, HashMap<String, CacheDocument>> {
        self.documents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Parse `text` and look it up.
    pub async fn get_str(&self, flake: &str, text: &str) -> Result<Selected> {
        let selector = Selector::parse(text)?;
        self.trace(&selector, "parsed");
        self.get(flake, &selector).await
    }

    /// Look up a selector, evaluating and caching what is not cached yet.
    ///
    /// Wildcards and sets are expanded against the flake's output tree and
    /// each concrete selector is cached under its own key.
    #[instrument(skip_all, fields(flake = %flake, selector = %selector))]
    pub async fn get(&self, flake: &str, selector: &Selector) -> Result<Selected> {
        self.load(flake).await?;

        if !selector.is_concrete() {
            return self.get_expanded(flake, selector).await.map(Selected::Expanded);
        }

        let (lookup, entry) = self.lookup(flake, selector).await?;
        if let Some(entry) = entry {
            self.commit(flake, vec![Mutation::Upsert(entry)]).await?;
        }
        Ok(match lookup {
            Lookup::Found(value) => Selected::Value(value),
            Lookup::Absent => Selected::Absent,
        })
    }

    /// Serve a concrete selector from memory or the evaluator. A fresh value is
    /// returned along with the entry still to be persisted.
    async fn lookup(&self, flake: &str, selector: &Selector) -> Result<(Lookup, Option<CacheEntry>)> {
        if let Some((value, created_at)) = self.hit(flake, &selector.canonical()) {
            Counters::bump(&self.counters.hits, 1);
            self.trace(selector, "hit");
            debug!(selector = %selector, age = ?age(created_at), "Serving cached value");
            return Ok((Lookup::Found(value), None));
        }

        match self.evaluator.evaluate(flake, selector).await? {
            Evaluated::Absent => {
                Counters::bump(&self.counters.absent, 1);
                self.trace(selector, "absent");
                Ok((Lookup::Absent, None))
            }
            Evaluated::Value(value) => {
                Counters::bump(&self.counters.misses, 1);
                self.trace(selector, "miss");
                let entry = CacheEntry::new(flake, selector.clone(), value.clone());
                Ok((Lookup::Found(value), Some(entry)))
            }
        }
    }

    fn hit(&self, flake: &str, key: &str) -> Option<(serde_json::Value, u64)> {
        let mut documents = self.documents();
        let entry = documents.get_mut(flake)?.entries.get_mut(key)?;
        entry.hits = entry.hits.saturating_add(1);
        Some((entry.value.clone(), entry.created_at))
    }

    async fn get_expanded(&self, flake: &str, pattern: &Selector) -> Result<Vec<ResolvedEntry>> {
        let mut mutations = Vec::new();

        // Sets list their alternatives, only wildcards need the output tree.
        let show = if pattern.kind() == SelectorKind::Wildcard {
            let cached_show = self.documents().get(flake).and_then(|doc| doc.show.clone());
            match cached_show {
                Some(show) => show,
                None => {
                    let show = self.evaluator.flake_show(flake).await?;
                    mutations.push(Mutation::SetShow(show.clone()));
                    show
                }
            }
        } else {
            serde_json::Value::Null
        };

        let concrete: Vec<Selector> = pattern.expand(&show).collect();
        self.trace(pattern, &format!("expanded to {} selectors", concrete.len()));

        let results: Vec<_> = stream::iter(concrete.iter().cloned())
            .map(|selector| async move { self.lookup(flake, &selector).await })
            .buffered(self.config.parallelism.max(1))
            .collect()
            .await;

        let mut resolved = Vec::with_capacity(concrete.len());
        let mut names = HashSet::new();
        let mut first_error = None;
        for (selector, result) in concrete.into_iter().zip(results) {
            match result {
                Ok((lookup, entry)) => {
                    mutations.extend(entry.map(Mutation::Upsert));
                    let name = pattern.resolved_name(&selector);
                    if names.insert(name.clone()) {
                        resolved.push(ResolvedEntry {
                            name,
                            selector,
                            lookup,
                        });
                    }
                }
                Err(err) => {
                    debug!(selector = %selector, error = %err, "Expanded selector failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        // Keep what did evaluate even when one of the selectors failed.
        if !mutations.is_empty() {
            self.commit(flake, mutations).await?;
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(resolved),
        }
    }

    /// Remove the entries `selector` addresses, or every entry of `flake` when
    /// no selector is given. Returns the number of removed entries.
    ///
    /// A wildcard or set removes every entry it could expand to, and the stored
    /// output tree with them.
    #[instrument(skip_all, fields(flake = %flake))]
    pub async fn invalidate(&self, flake: &str, selector: Option<&Selector>) -> Result<usize> {
        self.load(flake).await?;

        let mutations = match selector {
            None => vec![Mutation::Clear],
            Some(selector) if selector.is_concrete() => {
                vec![Mutation::RemoveMatching(selector.clone())]
            }
            Some(selector) => vec![
                Mutation::RemoveMatching(selector.clone()),
                Mutation::DropShow,
            ],
        };

        let removed = self.commit(flake, mutations).await?;
        Counters::bump(&self.counters.invalidations, removed as u64);
        if let Some(selector) = selector {
            self.trace(selector, "invalidated");
        }
        debug!(removed, "Invalidated cache entries");
        Ok(removed)
    }

    /// Read the document of `flake` unless it is already in memory.
    ///
    /// A missing document is an empty cache. A corrupt one is an error and
    /// stays on disk until [`FlakeCache::discard`] removes it.
    #[instrument(skip_all, fields(flake = %flake))]
    pub async fn load(&self, flake: &str) -> Result<()> {
        if self.documents().contains_key(flake) {
            return Ok(());
        }

        let path = self.config.document_path(flake);
        let flake_ref = flake.to_string();
        let inputs = if self.config.validate_fingerprint {
            local_flake_dir(flake).map(|dir| [dir.join("flake.lock"), dir.join("flake.nix")])
        } else {
            None
        };

        let (document, fingerprint) = tokio::task::spawn_blocking(move || {
            let document = CacheDocument::read(&path, &flake_ref)?;
            let fingerprint = match inputs {
                Some(paths) => fingerprint_files(&paths)?,
                None => None,
            };
            Ok::<_, CacheError>((document, fingerprint))
        })
        .await??;

        let found = document.is_some();
        let mut document = document.unwrap_or_else(|| CacheDocument::new(flake));
        debug!(found, entries = document.entries.len(), "Loaded cache document");

        let stale = fingerprint.is_some() && document.fingerprint != fingerprint;
        if stale && !document.is_empty() {
            info!(
                flake,
                entries = document.entries.len(),
                "Flake inputs changed, dropping cached entries"
            );
            let revision = document.revision.clone();
            self.documents()
                .entry(flake.to_string())
                .or_insert(document);
            let removed = self
                .commit(
                    flake,
                    vec![Mutation::Reset {
                        fingerprint,
                        revision,
                    }],
                )
                .await?;
            Counters::bump(&self.counters.invalidations, removed as u64);
            return Ok(());
        }

        if stale {
            document.fingerprint = fingerprint;
        }
        self.documents()
            .entry(flake.to_string())
            .or_insert(document);
        Ok(())
    }

    /// Write pending hit counts of `flake` to disk.
    pub async fn persist(&self, flake: &str) -> Result<()> {
        if !self.documents().contains_key(flake) {
            return Ok(());
        }
        self.commit(flake, Vec::new()).await.map(|_| ())
    }

    /// [`FlakeCache::persist`] every loaded flake reference.
    pub async fn persist_all(&self) -> Result<()> {
        let flakes: Vec<String> = self.documents().keys().cloned().collect();
        for flake in flakes {
            self.commit(&flake, Vec::new()).await?;
        }
        Ok(())
    }

    /// Delete the document of `flake`, for instance after it was reported corrupt.
    #[instrument(skip_all, fields(flake = %flake))]
    pub async fn discard(&self, flake: &str) -> Result<()> {
        self.documents().remove(flake);

        let path = self.config.document_path(flake);
        let lock = LockFile::new(self.config.lock_path_for(&path), self.config.lock_timeout);
        let shown = path.display().to_string();

        let removed = tokio::task::spawn_blocking(move || {
            lock.with_lock(|| match std::fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(e.into()),
            })
        })
        .await??;

        if removed {
            warn!(path = %shown, "Discarded cache document");
        }
        Ok(())
    }

    /// Compare the source revision reported by `nix flake metadata` with the one
    /// recorded for `flake` and drop all entries when it changed.
    ///
    /// The first call only records the revision. Returns whether entries were dropped.
    #[instrument(skip_all, fields(flake = %flake))]
    pub async fn revalidate(&self, flake: &str) -> Result<bool> {
        self.load(flake).await?;
        let revision = self.evaluator.metadata(flake).await?.fingerprint();

        let (recorded, fingerprint) = match self.documents().get(flake) {
            Some(doc) => (doc.revision.clone(), doc.fingerprint.clone()),
            None => (None, None),
        };

        if recorded == revision {
            return Ok(false);
        }

        let Some(recorded) = recorded else {
            self.commit(flake, vec![Mutation::SetRevision(revision)])
                .await?;
            return Ok(false);
        };

        info!(%recorded, ?revision, "Flake revision changed, dropping cached entries");
        let removed = self
            .commit(
                flake,
                vec![Mutation::Reset {
                    fingerprint,
                    revision,
                }],
            )
            .await?;
        Counters::bump(&self.counters.invalidations, removed as u64);
        Ok(true)
    }

    /// Snapshot of the cached entries of `flake`.
    pub async fn entries(&self, flake: &str) -> Result<Vec<CacheEntry>> {
        self.load(flake).await?;
        Ok(self
            .documents()
            .get(flake)
            .map(|doc| doc.entries.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Apply `mutations` to the current on-disk document under the write lock,
    /// then install the result in memory. Returns the number of removed entries.
    async fn commit(&self, flake: &str, mutations: Vec<Mutation>) -> Result<usize> {
        let path = self.config.document_path(flake);
        let lock = LockFile::new(self.config.lock_path_for(&path), self.config.lock_timeout);
        let flake_ref = flake.to_string();
        let memory = self.documents().get(flake).cloned();

        let (document, removed) = tokio::task::spawn_blocking(move || {
            lock.with_lock(|| {
                let mut document = CacheDocument::read(&path, &flake_ref)?
                    .unwrap_or_else(|| CacheDocument::new(&flake_ref));

                if let Some(memory) = &memory {
                    document.merge_hits(memory);
                    if document.is_empty() {
                        document.fingerprint = memory.fingerprint.clone();
                    }
                }

                let removed = mutations
                    .into_iter()
                    .map(|mutation| document.apply(mutation))
                    .sum::<usize>();

                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                document.write(&path)?;
                Ok((document, removed))
            })
        })
        .await??;

        debug!(
            flake,
            entries = document.entries.len(),
            removed,
            "Wrote cache document"
        );

        let mut documents = self.documents();
        let mut document = document;
        if let Some(current) = documents.get(flake) {
            // Hits recorded while the write was in progress.
            document.merge_hits(current);
        }
        documents.insert(flake.to_string(), document);
        Ok(removed)
    }

    fn trace(&self, selector: &Selector, decision: &str) {
        if self.config.debug.selectors {
            info!(target: SELECTOR_TARGET, selector = %selector, decision);
        } else {
            debug!(selector = %selector, decision);
        }
    }
}

/// Directory of a flake reference that points at the local filesystem.
fn local_flake_dir(flake: &str) -> Option<PathBuf> {
    let path = match flake.strip_prefix("path:") {
        Some(path) => path,
        None if flake.starts_with('.') || flake.starts_with('/') => flake,
        None => return None,
    };
    let path = path.split(['?', '#']).next().unwrap_or(path);
    Some(PathBuf::from(path))
}
