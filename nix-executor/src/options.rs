use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Enables tracing of every command line the executor runs.
pub const COMMAND_TRACE_ENV: &str = "DEBUG_COMMAND_TRACE";
/// Enables tracing of selector parsing, expansion and cache decisions.
pub const SELECTOR_TRACE_ENV: &str = "DEBUG_SELECTOR_TRACE";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub const DEFAULT_NIX_FLAGS: &[&str] = &[
    "--extra-experimental-features",
    "nix-command",
    "--extra-experimental-features",
    "flakes",
    "--option",
    "warn-dirty",
    "false",
];

/// Values accepted as "on" for the debug environment variables.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// The two independent debug channels.
///
/// Enabling one never enables the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugChannels {
    /// Log every command line, its duration and exit status at INFO.
    pub commands: bool,
    /// Log selector resolution and cache decisions at INFO.
    pub selectors: bool,
}

impl DebugChannels {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key| lookup(key).is_some_and(|value| is_truthy(&value));
        Self {
            commands: flag(COMMAND_TRACE_ENV),
            selectors: flag(SELECTOR_TRACE_ENV),
        }
    }
}

/// Options for running nix commands
#[derive(Debug, Clone)]
pub struct Options {
    /// The `nix` executable. `nix-store` is looked up next to it.
    pub nix_binary: PathBuf,
    /// Flags passed before every subcommand.
    pub nix_flags: Vec<String>,
    /// Upper bound on a single invocation. The process is killed when it elapses.
    pub timeout: Duration,
    pub cwd: Option<PathBuf>,
    /// Extra environment bindings, e.g. those of an isolated store.
    pub env: BTreeMap<String, String>,
    pub debug: DebugChannels,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            nix_binary: PathBuf::from("nix"),
            nix_flags: DEFAULT_NIX_FLAGS.iter().map(|s| s.to_string()).collect(),
            timeout: DEFAULT_TIMEOUT,
            cwd: None,
            env: BTreeMap::new(),
            debug: DebugChannels::default(),
        }
    }
}

impl Options {
    /// Path of a sibling tool such as `nix-store`.
    ///
    /// A bare `nix` resolves through `PATH`, so its siblings do too.
    pub fn sibling_binary(&self, name: &str) -> PathBuf {
        match self.nix_binary.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
            _ => PathBuf::from(name),
        }
    }
}
