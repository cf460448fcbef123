//! `apod` fetches NASA's Astronomy Picture of the Day into a local,
//! content-addressed image cache and sets it as the desktop background.

mod commands;
mod error;
mod wallpaper;

use crate::commands::{AdmitArgs, FetchArgs, ListArgs, VerifyArgs};
use crate::error::ErrorKind;
use apod_config::Config;
use clap::{ArgAction, Parser, Subcommand};
use exn::ResultExt;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "apod", version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Additional configuration file (TOML, YAML or JSON).
    #[arg(long, global = true, env = "APOD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download a picture of the day into the cache.
    Fetch(FetchArgs),
    /// Admit a local image file into the cache.
    Admit(AdmitArgs),
    /// List the cached images.
    List(ListArgs),
    /// Check the cached files against the metadata store.
    Verify(VerifyArgs),
}

fn filter(cli: &Cli) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    EnvFilter::new(level)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_env_filter(filter(&cli)).with_target(false).with_writer(std::io::stderr).init();

    let result = match Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config) {
        Ok(config) => match cli.command {
            Commands::Fetch(args) => commands::fetch(&config, args).await,
            Commands::Admit(args) => commands::admit(args).await,
            Commands::List(args) => commands::list(&config, args).await,
            Commands::Verify(args) => commands::verify(&config, args).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:?}");
            eprintln!("Error: {}", &*e);
            if e.is_retryable() {
                eprintln!("This may be temporary; try again later.");
            }
            ExitCode::FAILURE
        },
    }
}
