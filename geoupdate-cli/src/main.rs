//! geoupdate — keep local GeoIP databases current.
//!
//! # Usage
//!
//! ```text
//! geoupdate [-f CONFIG] [-d DIR] [--parallelism N] [-v] [-o] [--log-json]
//! ```
//!
//! Exits non-zero when the configuration is invalid, another run holds the
//! lock, or any edition failed to update.

mod http;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use geoupdate_core::config::DEFAULT_CONFIG_FILE;
use geoupdate_core::{Config, ConfigOverrides};
use geoupdate_runner::{init_tracing, start_blocking};

use http::HttpFetcher;

#[derive(Parser, Debug)]
#[command(
    name = "geoupdate",
    version,
    about = "Download and install updated GeoIP databases",
    long_about = None,
)]
struct Cli {
    /// Configuration file.
    #[arg(short = 'f', long = "config-file", default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,

    /// Store databases in this directory instead of the configured one.
    #[arg(short = 'd', long = "database-directory")]
    database_directory: Option<PathBuf>,

    /// Number of editions to update concurrently (0 keeps the configured value).
    #[arg(long, default_value_t = 0)]
    parallelism: usize,

    /// Log progress to stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Print a JSON array describing each edition's result to stdout.
    #[arg(short, long)]
    output: bool,

    /// Emit log lines as JSON.
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let overrides = ConfigOverrides {
        database_directory: cli.database_directory.clone(),
        parallelism: cli.parallelism,
        verbose: cli.verbose,
    };
    let config = Config::load(&cli.config_file, &overrides).with_context(|| {
        format!("error loading configuration file {}", cli.config_file.display())
    })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = %cli.config_file.display(),
        database_directory = %config.database_directory.display(),
        editions = config.edition_ids.len(),
        "starting update",
    );

    let fetcher = HttpFetcher::new(&config).context("error configuring update client")?;
    let report = start_blocking(&config, Arc::new(fetcher)).context("error retrieving updates")?;

    if cli.output {
        let json = serde_json::to_string(&report.to_json()).context("failed to render JSON output")?;
        println!("{json}");
    }

    report.into_result().context("error retrieving updates")?;
    Ok(())
}
