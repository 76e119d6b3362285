use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The subset of `nix flake metadata --json` used to decide whether cached results
/// for a flake are still valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlakeMetadata {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub original_url: Option<String>,
    #[serde(default)]
    pub resolved_url: Option<String>,
    /// The locked URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Commit hash of a clean git tree.
    #[serde(default)]
    pub revision: Option<String>,
    /// Set instead of `revision` when the tree has uncommitted changes.
    #[serde(default)]
    pub dirty_revision: Option<String>,
    #[serde(default)]
    pub last_modified: Option<u64>,
    #[serde(default)]
    pub locked: Option<serde_json::Value>,
    /// The lock graph (`nodes`, `root`, `version`).
    #[serde(default)]
    pub locks: Option<serde_json::Value>,
}

impl FlakeMetadata {
    /// A string that changes whenever the flake's content changes.
    ///
    /// Prefers the content hash of the locked source, which also covers dirty trees,
    /// then the revision.
    pub fn fingerprint(&self) -> Option<String> {
        self.locked
            .as_ref()
            .and_then(|locked| locked.get("narHash"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .or_else(|| self.revision.clone())
            .or_else(|| self.dirty_revision.clone())
    }

    pub fn is_dirty(&self) -> bool {
        self.revision.is_none() && self.dirty_revision.is_some()
    }
}
