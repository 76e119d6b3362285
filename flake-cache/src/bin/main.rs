use clap::{Parser, Subcommand, crate_version};
use flake_cache::api::{self, Response};
use flake_cache::log::{Level, LogFormat, init_tracing};
use flake_cache::{CacheConfig, FlakeCache, default_cache_dir};
use miette::{IntoDiagnostic, Result, miette};
use nix_executor::{DebugChannels, NixCommand, Options};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::warn;

#[derive(Parser)]
#[command(
    color = clap::ColorChoice::Auto,
    about = format!("Cached evaluation of flake outputs {}", crate_version!())
)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug log level.")]
    verbose: bool,

    #[arg(short, long, global = true, conflicts_with = "verbose", help = "Silence all logs.")]
    quiet: bool,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Full)]
    log_format: LogFormat,

    #[arg(long, global = true, default_value = ".", help = "Flake reference to operate on.")]
    flake: String,

    #[arg(
        long,
        global = true,
        help = "Directory holding the cache documents. Defaults to $XDG_CACHE_HOME/flake-cache."
    )]
    cache_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "Path to the nix binary.")]
    nix: Option<PathBuf>,

    #[arg(long, global = true, help = "Seconds before a nix invocation is killed.")]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Evaluate a selector, serving it from the cache when possible.")]
    Eval { selector: String },

    #[command(about = "Drop cached entries of a selector, or of the whole flake.")]
    Invalidate { selector: Option<String> },

    #[command(about = "Build a selector and print the output paths.")]
    Build {
        selector: String,

        #[arg(long, help = "Create a result link at this path.")]
        out_link: Option<PathBuf>,
    },

    #[command(about = "Print the nix configuration.")]
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::Debug
    } else if cli.quiet {
        Level::Silent
    } else {
        Level::default()
    };
    init_tracing(level, cli.log_format);

    let mut options = Options {
        debug: DebugChannels::from_env(),
        ..Options::default()
    };
    if let Some(nix) = cli.nix {
        options.nix_binary = nix;
    }
    if let Some(timeout) = cli.timeout {
        options.timeout = Duration::from_secs(timeout);
    }
    let command = NixCommand::new(options);

    let cache = || -> Result<FlakeCache<NixCommand>> {
        let cache_dir = cli
            .cache_dir
            .clone()
            .or_else(default_cache_dir)
            .ok_or_else(|| miette!("Could not determine a cache directory, pass --cache-dir"))?;
        Ok(FlakeCache::new(
            NixCommand::new(command.options().clone()),
            CacheConfig::from_env(cache_dir),
        ))
    };

    let ok = match cli.command {
        Command::Eval { selector } => {
            let cache = cache()?;
            let response = api::evaluate(&cache, &cli.flake, &selector).await;
            if let Err(err) = cache.persist(&cli.flake).await {
                warn!(error = %err, "Failed to record cache hits");
            }
            print(&response)?
        }
        Command::Invalidate { selector } => {
            let cache = cache()?;
            print(&api::invalidate(&cache, &cli.flake, selector.as_deref()).await)?
        }
        Command::Build { selector, out_link } => print(
            &api::build(&command, &cli.flake, &selector, out_link.as_deref()).await,
        )?,
        Command::ShowConfig => print(&Response::from(command.config().await))?,
    };

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print<T: Serialize>(response: &Response<T>) -> Result<bool> {
    println!(
        "{}",
        serde_json::to_string_pretty(response).into_diagnostic()?
    );
    Ok(response.is_ok())
}
