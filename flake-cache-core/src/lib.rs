//! # flake-cache-core
//!
//! Core utilities for the on-disk flake evaluation cache:
//!
//! - content hashing used for cache file names and flake fingerprints
//! - staged writes that replace a file atomically (write, fsync, rename)
//! - an advisory file lock with a bounded acquisition timeout
//! - time conversion helpers
//! - the common error type

pub mod atomic;
pub mod error;
pub mod file;
pub mod lock;
pub mod time;

pub use atomic::{StagedWrite, read_if_exists, write_atomic};
pub use error::{CacheError, CacheResult};
pub use file::{compute_file_hash, compute_string_hash, fingerprint_files};
pub use lock::LockFile;
