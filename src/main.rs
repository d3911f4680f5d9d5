//! `canvas-tasks-sync`: mirrors Canvas LMS to-dos into a Google Tasks list.
//!
//! One run fetches the to-do feed, keeps items due inside the window and
//! creates or updates their tasks. Tasks are never deleted or completed.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod config;
mod errors;
mod integrations;
mod models;
mod sync;
#[cfg(test)]
mod test_util;

use config::{Config, config_path, google_token_path};
use errors::{Result, SyncError};
use integrations::canvas::CanvasClient;
use integrations::google::{self, GoogleTasksClient};
use sync::SyncOptions;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "canvas-tasks-sync", about = "Sync Canvas to-dos into Google Tasks", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one sync pass (the default).
    Sync {
        /// Override the look-ahead window in days.
        #[arg(long)]
        window_days: Option<u32>,

        /// Plan the changes without writing to Google Tasks.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run the Google consent flow and print the refresh token.
    Auth,
}

fn main() -> ExitCode {
    let args = Cli::parse();
    if let Err(err) = init_tracing(args.log_format) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let label = failure_label(args.command.as_ref());
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.completed() {
                Some(done) => error!(completed = %done, "{label}: {err}"),
                None => error!("{label}: {err}"),
            }
            ExitCode::FAILURE
        }
    }
}

fn failure_label(command: Option<&Command>) -> &'static str {
    match command {
        Some(Command::Auth) => "authorization failed",
        Some(Command::Sync { .. }) | None => "sync failed",
    }
}

fn run(args: Cli) -> Result<()> {
    let path = args.config.unwrap_or_else(config_path);
    let mut config = Config::load(&path);
    info!(path = %path.display(), "configuration loaded");

    let (window_days, dry_run) = match args.command {
        Some(Command::Auth) => return authorize(&config),
        Some(Command::Sync {
            window_days,
            dry_run,
        }) => (window_days, dry_run),
        None => (None, false),
    };
    if let Some(days) = window_days {
        config.sync.window_days = days;
    }

    config.validate_google()?;
    let token_path = google_token_path(&config);
    let stored = google::load_token(&token_path).ok();

    let refresh_token = match config.google.refresh_token() {
        Some(token) => token.to_string(),
        None => match stored.as_ref().map(|t| t.refresh_token.trim()) {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => {
                warn!("no Google refresh token configured, starting consent flow");
                return authorize(&config);
            }
        },
    };
    config.validate_sync(Some(refresh_token.as_str()))?;

    let access_token = google::ensure_access_token(&config.google, &refresh_token, &token_path)?;
    let mut store = GoogleTasksClient::new(access_token)?;
    let mut source = CanvasClient::new(&config.canvas)?;

    let options = SyncOptions {
        list_name: config.google.list_name.clone(),
        window_days: config.sync.window_days,
        dry_run,
    };
    let outcome = sync::run(&mut source, &mut store, &options)?;

    info!(
        fetched = outcome.fetched,
        scoped = outcome.scoped,
        existing = outcome.existing,
        dry_run,
        "{} (windowDays={})",
        outcome.report,
        options.window_days
    );
    Ok(())
}

/// Interactive consent. The token is printed so it can be placed in the
/// environment, and is also stored for later runs.
fn authorize(config: &Config) -> Result<()> {
    config.validate_google()?;
    let session = google::start_local_oauth_flow(&config.google)?;
    println!("Open this URL to authorize Google Tasks access:\n{}", session.auth_url);
    google::try_open_in_browser(&session.auth_url);

    let token = session.wait_for_token(&config.google, &google_token_path(config))?;
    println!("\nAdd this to your environment or config file:");
    println!("GOOGLE_REFRESH_TOKEN=\"{}\"", token.refresh_token);
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| SyncError::Io(io::Error::other(format!("failed to init tracing: {err}"))))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| SyncError::Io(io::Error::other(format!("failed to init tracing: {err}"))))?,
    }

    Ok(())
}
