//! Typed wrapper around the `nix` command line.
//!
//! Every subcommand goes through a single subprocess primitive: the argument vector is
//! built without a shell, stdout and stderr are captured separately, a timeout is enforced
//! and a non-zero exit becomes a [`CommandError`] carrying the captured stderr.

mod apply;
mod command;
mod error;
mod evaluator;
mod metadata;
mod options;

pub use command::{NixCommand, Output, ShellCommand, ShellMode, ShellSession};
pub use error::{CommandError, CommandResult};
pub use evaluator::{Evaluated, FlakeEvaluator};
pub use metadata::FlakeMetadata;
pub use nix_conf_parser::NixConfig;
pub use options::{
    COMMAND_TRACE_ENV, DEFAULT_NIX_FLAGS, DEFAULT_TIMEOUT, DebugChannels, Options,
    SELECTOR_TRACE_ENV, is_truthy,
};
