//! Cached evaluation of flake outputs.
//!
//! [`FlakeCache`] serves selector lookups from memory and from one JSON
//! document per flake reference, and calls the evaluator only for what is not
//! cached yet. [`api`] wraps the operations in tagged responses for a
//! command-line front end.

pub mod api;
mod cache;
mod config;
mod document;
mod error;
pub mod log;

pub use cache::{CacheStats, FlakeCache, Lookup, ResolvedEntry, Selected};
pub use config::{CACHE_LOCK_PATH_ENV, CacheConfig, DEFAULT_LOCK_TIMEOUT, default_cache_dir};
pub use document::{CacheEntry, SCHEMA_VERSION};
pub use error::{Error, Result};
