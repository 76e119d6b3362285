use nix_executor::Options;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Records every invocation as one line of `\x1f`-separated arguments.
const PRELUDE: &str = r#"#!/bin/sh
printf '%s\037' "$@" >> "$FAKE_NIX_LOG"
echo >> "$FAKE_NIX_LOG"
"#;

/// A shell script standing in for the `nix` binary.
pub struct FakeNix {
    pub dir: TempDir,
    pub binary: PathBuf,
}

impl FakeNix {
    pub fn new(body: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let binary = write_script(dir.path(), "nix", body);
        Self { dir, binary }
    }

    /// Add a sibling tool such as `nix-store`.
    pub fn with_sibling(self, name: &str, body: &str) -> Self {
        write_script(self.dir.path(), name, body);
        self
    }

    pub fn options(&self) -> Options {
        let mut env = BTreeMap::new();
        env.insert(
            "FAKE_NIX_LOG".to_string(),
            self.log_path().to_string_lossy().into_owned(),
        );
        Options {
            nix_binary: self.binary.clone(),
            timeout: Duration::from_secs(10),
            env,
            ..Default::default()
        }
    }

    fn log_path(&self) -> PathBuf {
        self.dir.path().join("calls")
    }

    /// Arguments of every invocation so far, global flags included.
    pub fn calls(&self) -> Vec<Vec<String>> {
        let Ok(log) = fs::read_to_string(self.log_path()) else {
            return Vec::new();
        };
        log.lines()
            .map(|line| {
                line.split('\x1f')
                    .filter(|arg| !arg.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .collect()
    }

    /// Arguments of every invocation with the default global flags stripped.
    pub fn subcommands(&self) -> Vec<Vec<String>> {
        let flags = nix_executor::DEFAULT_NIX_FLAGS.len();
        self.calls()
            .into_iter()
            .map(|call| call.into_iter().skip(flags).collect())
            .collect()
    }
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("{PRELUDE}{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}
