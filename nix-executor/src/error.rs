use miette::Diagnostic;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub type CommandResult<T> = Result<T, CommandError>;

/// Failure of a nix invocation.
///
/// The `Display` text never includes the captured stderr, which is available through
/// [`CommandError::stderr`] so it is rendered exactly once.
#[derive(Error, Diagnostic, Debug)]
pub enum CommandError {
    #[error("failed to start `{command}`")]
    #[diagnostic(code(nix_executor::spawn))]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed: {}", describe_exit(*code))]
    #[diagnostic(code(nix_executor::evaluation))]
    Evaluation {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` failed: {}", describe_exit(*code))]
    #[diagnostic(code(nix_executor::build))]
    Build {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` produced unexpected output: {reason}")]
    #[diagnostic(
        code(nix_executor::malformed_output),
        help("the command succeeded, so this is a defect in how its output is read")
    )]
    MalformedOutput {
        command: String,
        reason: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {after:?}")]
    #[diagnostic(code(nix_executor::timeout))]
    Timeout { command: String, after: Duration },

    #[error("`{selector}` addresses more than one attribute")]
    #[diagnostic(
        code(nix_executor::not_concrete),
        help("expand wildcard and set segments before evaluating")
    )]
    NotConcrete { selector: String },
}

impl CommandError {
    /// Captured stderr of the failed command, if any was produced.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::Evaluation { stderr, .. }
            | CommandError::Build { stderr, .. }
            | CommandError::MalformedOutput { stderr, .. } => {
                Some(stderr.as_str()).filter(|s| !s.trim().is_empty())
            }
            CommandError::Spawn { .. }
            | CommandError::Timeout { .. }
            | CommandError::NotConcrete { .. } => None,
        }
    }

    /// The command line that failed, if one was run.
    pub fn command(&self) -> Option<&str> {
        match self {
            CommandError::Spawn { command, .. }
            | CommandError::Evaluation { command, .. }
            | CommandError::Build { command, .. }
            | CommandError::MalformedOutput { command, .. }
            | CommandError::Timeout { command, .. } => Some(command),
            CommandError::NotConcrete { .. } => None,
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "terminated by a signal".to_string(),
    }
}
