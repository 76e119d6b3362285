use regex::Regex;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::LazyLock;

/// The logical store directory that store paths are named under.
pub const STORE_DIR: &str = "/nix/store";

/// A store path: 32 nix-base32 characters followed by a name. Only the first
/// component below the store directory is matched.
static STORE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/nix/store/[0-9a-df-np-sv-z]{32}-[A-Za-z0-9+\-._?=]+")
        .expect("store path pattern is valid")
});

/// Every distinct store path mentioned in `text`.
pub fn find_store_references(text: &str) -> BTreeSet<PathBuf> {
    STORE_PATH
        .find_iter(text)
        .map(|m| PathBuf::from(m.as_str()))
        .collect()
}
