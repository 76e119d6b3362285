use async_trait::async_trait;
use flake_selector::Selector;
use nix_conf_parser::{NixConf, NixConfig};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

use crate::apply::{self, Probe};
use crate::error::{CommandError, CommandResult};
use crate::evaluator::{Evaluated, FlakeEvaluator};
use crate::metadata::FlakeMetadata;
use crate::options::Options;

const TRACE_TARGET: &str = "nix_executor::trace";
const SELECTOR_TARGET: &str = "nix_executor::selectors";

/// Captured output of a successful invocation.
#[derive(Debug, Clone)]
pub struct Output {
    pub command: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration: Duration,
}

impl Output {
    /// Decode stdout as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> CommandResult<T> {
        serde_json::from_slice(&self.stdout).map_err(|e| self.malformed(e.to_string()))
    }

    fn malformed(&self, reason: impl Into<String>) -> CommandError {
        CommandError::MalformedOutput {
            command: self.command.clone(),
            reason: reason.into(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
        }
    }
}

/// How a failing exit status is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Evaluation,
    Build,
}

/// How [`NixCommand::shell`] enters a development shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellMode {
    /// An interactive shell.
    Interactive,
    /// Run a command inside the shell.
    Command(Vec<String>),
    /// Capture the shell environment without entering it.
    Environment,
}

/// A command line for the caller to run with inherited stdio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl ShellCommand {
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShellSession {
    Interactive(ShellCommand),
    /// Output of `nix print-dev-env --json`.
    Environment(serde_json::Value),
}

/// Runs nix subcommands.
#[derive(Debug, Clone, Default)]
pub struct NixCommand {
    options: Options,
}

impl NixCommand {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Run `nix` with the configured global flags followed by `args`.
    pub async fn run<I, S>(&self, args: I) -> CommandResult<Output>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args = args.into_iter().map(Into::into).collect();
        self.run_nix(args, Failure::Evaluation).await
    }

    async fn run_nix(&self, args: Vec<OsString>, failure: Failure) -> CommandResult<Output> {
        let mut argv: Vec<OsString> = self.options.nix_flags.iter().map(OsString::from).collect();
        argv.extend(args);
        self.run_program(&self.options.nix_binary, argv, failure).await
    }

    /// The subprocess primitive every operation goes through.
    async fn run_program(
        &self,
        program: &Path,
        args: Vec<OsString>,
        failure: Failure,
    ) -> CommandResult<Output> {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(&args)
            .envs(&self.options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.options.cwd {
            cmd.current_dir(cwd);
        }

        let command = display_command(program, &args);
        self.trace_start(&command);

        let start = Instant::now();
        let child = cmd.spawn().map_err(|source| CommandError::Spawn {
            command: command.clone(),
            source,
        })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.options.timeout, child.wait_with_output())
            .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(CommandError::Spawn { command, source }),
            Err(_) => {
                self.trace_finish(&command, start.elapsed(), "timed out");
                return Err(CommandError::Timeout {
                    command,
                    after: self.options.timeout,
                });
            }
        };

        let duration = start.elapsed();
        self.trace_finish(&command, duration, &output.status.to_string());

        if !output.status.success() {
            let code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(match failure {
                Failure::Evaluation => CommandError::Evaluation {
                    command,
                    code,
                    stderr,
                },
                Failure::Build => CommandError::Build {
                    command,
                    code,
                    stderr,
                },
            });
        }

        Ok(Output {
            command,
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
        })
    }

    fn trace_start(&self, command: &str) {
        if self.options.debug.commands {
            info!(target: TRACE_TARGET, command, "Running command");
        } else {
            debug!("Running command: {command}");
        }
    }

    fn trace_finish(&self, command: &str, duration: Duration, status: &str) {
        if self.options.debug.commands {
            info!(target: TRACE_TARGET, command, ?duration, status, "Command finished");
        } else {
            debug!(?duration, status, "Finished: {command}");
        }
    }

    fn trace_selector(&self, selector: &Selector, decision: &str) {
        if self.options.debug.selectors {
            info!(target: SELECTOR_TARGET, selector = %selector, decision);
        }
    }

    /// Evaluate a concrete selector with `nix eval --json`.
    #[instrument(skip_all, fields(flake = %flake, selector = %selector))]
    pub async fn evaluate(&self, flake: &str, selector: &Selector) -> CommandResult<Evaluated> {
        let plan = apply::plan(selector).ok_or_else(|| CommandError::NotConcrete {
            selector: selector.canonical(),
        })?;

        if let Some(root) = plan.root_check {
            let show = self.flake_show(flake).await?;
            if show.get(root).is_none() {
                self.trace_selector(selector, "absent at top level");
                return Ok(Evaluated::Absent);
            }
        }

        let mut args: Vec<OsString> = vec![
            "eval".into(),
            "--json".into(),
            installable(flake, &plan.attr_path()).into(),
        ];
        let apply = plan.apply_function();
        if let Some(function) = &apply {
            args.push("--apply".into());
            args.push(function.into());
        }

        let output = self.run_nix(args, Failure::Evaluation).await?;

        if apply.is_none() {
            return output.json().map(Evaluated::Value);
        }
        let probe: Probe = output.json()?;
        if !probe.present {
            self.trace_selector(selector, "absent");
            return Ok(Evaluated::Absent);
        }
        Ok(Evaluated::Value(
            probe.value.unwrap_or(serde_json::Value::Null),
        ))
    }

    /// Build a selector, expanding wildcards and sets against `flake show` first.
    ///
    /// Returns the output store paths. Without `out_link` no result link is created.
    #[instrument(skip_all, fields(flake = %flake, selector = %selector))]
    pub async fn build(
        &self,
        flake: &str,
        selector: &Selector,
        out_link: Option<&Path>,
    ) -> CommandResult<Vec<PathBuf>> {
        let targets: Vec<Selector> = if selector.is_concrete() {
            vec![selector.clone()]
        } else {
            let show = self.flake_show(flake).await?;
            selector.expand(&show).collect()
        };
        if targets.is_empty() {
            self.trace_selector(selector, "nothing to build");
            return Ok(Vec::new());
        }

        let mut args: Vec<OsString> = vec!["build".into(), "--print-out-paths".into()];
        match out_link {
            Some(link) => {
                args.push("--out-link".into());
                args.push(link.into());
            }
            None => args.push("--no-link".into()),
        }
        for target in &targets {
            if let Some(path) = target.attr_path() {
                args.push(installable(flake, &path).into());
            }
        }

        let output = self.run_nix(args, Failure::Build).await?;
        let paths: Vec<PathBuf> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect();
        if paths.is_empty() {
            return Err(output.malformed("no output paths printed"));
        }
        Ok(paths)
    }

    /// Enter, or capture the environment of, the development shell of a concrete selector.
    pub async fn shell(
        &self,
        flake: &str,
        selector: &Selector,
        mode: ShellMode,
    ) -> CommandResult<ShellSession> {
        let attr_path = selector
            .attr_path()
            .ok_or_else(|| CommandError::NotConcrete {
                selector: selector.canonical(),
            })?;
        let installable = installable(flake, &attr_path);

        let command = match mode {
            ShellMode::Environment => {
                let output = self
                    .run_nix(
                        vec!["print-dev-env".into(), "--json".into(), installable.into()],
                        Failure::Evaluation,
                    )
                    .await?;
                return output.json().map(ShellSession::Environment);
            }
            ShellMode::Interactive => Vec::new(),
            ShellMode::Command(command) => command,
        };

        let mut args = self.options.nix_flags.clone();
        args.push("develop".to_string());
        args.push(installable);
        if !command.is_empty() {
            args.push("--command".to_string());
            args.extend(command);
        }

        Ok(ShellSession::Interactive(ShellCommand {
            program: self.options.nix_binary.clone(),
            args,
            env: self.options.env.clone(),
            cwd: self.options.cwd.clone(),
        }))
    }

    /// The output tree of `nix flake show --json --all-systems`.
    #[instrument(skip(self))]
    pub async fn flake_show(&self, flake: &str) -> CommandResult<serde_json::Value> {
        let output = self
            .run_nix(
                vec![
                    "flake".into(),
                    "show".into(),
                    "--json".into(),
                    "--all-systems".into(),
                    flake.into(),
                ],
                Failure::Evaluation,
            )
            .await?;
        let tree: serde_json::Value = output.json()?;
        if !tree.is_object() {
            return Err(output.malformed("expected a JSON object"));
        }
        Ok(tree)
    }

    #[instrument(skip(self))]
    pub async fn metadata(&self, flake: &str) -> CommandResult<FlakeMetadata> {
        self.run_nix(
            vec![
                "flake".into(),
                "metadata".into(),
                "--json".into(),
                flake.into(),
            ],
            Failure::Evaluation,
        )
        .await?
        .json()
    }

    /// The evaluator's effective configuration.
    pub async fn config(&self) -> CommandResult<NixConfig> {
        let output = self
            .run_nix(
                vec!["config".into(), "show".into(), "--json".into()],
                Failure::Evaluation,
            )
            .await?;
        let conf = NixConf::parse_json(&output.stdout).map_err(|e| output.malformed(e.to_string()))?;
        Ok(conf.to_config())
    }

    /// Realise `store_path` and register `link` as a gc root for it.
    pub async fn add_gc_root(&self, store_path: &Path, link: &Path) -> CommandResult<PathBuf> {
        let nix_store = self.options.sibling_binary("nix-store");
        self.run_program(
            &nix_store,
            vec![
                "--add-root".into(),
                link.into(),
                "--realise".into(),
                store_path.into(),
            ],
            Failure::Build,
        )
        .await?;
        Ok(link.to_path_buf())
    }
}

#[async_trait]
impl FlakeEvaluator for NixCommand {
    async fn evaluate(&self, flake: &str, selector: &Selector) -> CommandResult<Evaluated> {
        NixCommand::evaluate(self, flake, selector).await
    }

    async fn flake_show(&self, flake: &str) -> CommandResult<serde_json::Value> {
        NixCommand::flake_show(self, flake).await
    }

    async fn metadata(&self, flake: &str) -> CommandResult<FlakeMetadata> {
        NixCommand::metadata(self, flake).await
    }
}

fn installable(flake: &str, attr_path: &str) -> String {
    format!("{flake}#{attr_path}")
}

/// Display a command as a shell-escaped string.
fn display_command(program: &Path, args: &[OsString]) -> String {
    std::iter::once(program.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(|arg| shell_escape::escape(Cow::Owned(arg.to_string_lossy().into_owned())))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_command_escapes() {
        let args: Vec<OsString> = vec!["eval".into(), ".#a b".into(), "--apply".into()];
        assert_eq!(
            display_command(Path::new("nix"), &args),
            "nix eval '.#a b' --apply"
        );
    }

    #[test]
    fn test_installable() {
        assert_eq!(installable(".", "packages.hello"), ".#packages.hello");
    }
}
