//! linkedin-crawl main entry point
//!
//! This is the command-line interface for the authenticated profile crawler.

use anyhow::Context;
use clap::builder::BoolishValueParser;
use clap::Parser;
use linkedin_crawl::config::{load_config, validate_profile_slug, Config, CrawlRequest, Credentials};
use linkedin_crawl::crawler::run_crawl;
use linkedin_crawl::Stage;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Exit status of a failed crawl; checkpoints allow a re-run to resume
const EXIT_FAILURE: u8 = 1;
/// Exit status when the crawl could not start (configuration, storage or browser)
const EXIT_STARTUP: u8 = 2;
/// Exit status after a clean stop on Ctrl-C
const EXIT_CANCELLED: u8 = 130;

/// linkedin-crawl: an authenticated profile crawler
///
/// Logs into the site with a real browser, extracts the requested profiles
/// and their connection lists, and writes structured records to the
/// configured sink. Interrupted crawls resume from their last checkpoint.
#[derive(Parser, Debug)]
#[command(name = "linkedin-crawl")]
#[command(version = "1.0.0")]
#[command(about = "An authenticated profile and connection crawler", long_about = None)]
struct Cli {
    /// Profile slug to crawl (the part after /in/); repeat for several profiles
    #[arg(long = "profile", value_name = "SLUG", required = true)]
    profiles: Vec<String>,

    /// Path to TOML configuration file; built-in defaults are used otherwise
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Login email
    #[arg(long, env = "EMAIL")]
    email: String,

    /// Login password
    #[arg(long, env = "PASSWORD", hide_env_values = true)]
    password: String,

    /// Run the browser without a window (defaults to the config file's value)
    #[arg(
        long,
        env = "HEADLESS",
        value_parser = BoolishValueParser::new(),
        num_args = 0..=1,
        default_missing_value = "true",
        conflicts_with = "headed"
    )]
    headless: Option<bool>,

    /// Show the browser window, e.g. to complete a verification challenge
    #[arg(long)]
    headed: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start over, ignoring checkpoints of the requested profiles
    #[arg(long)]
    fresh: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (config, request) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::error!("{:#}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    if cli.fresh {
        tracing::info!("Starting fresh crawl (ignoring previous checkpoints)");
    } else {
        tracing::info!("Starting crawl (will resume from checkpoints)");
    }

    match run_crawl(config, request, cli.fresh, cancel).await {
        Ok(report) if report.cancelled => {
            tracing::info!("Crawl stopped on request; re-run to resume");
            ExitCode::from(EXIT_CANCELLED)
        }
        Ok(_) => {
            tracing::info!("Crawl completed successfully");
            ExitCode::SUCCESS
        }
        Err(failure) if failure.stage == Stage::Startup => {
            tracing::error!("Could not start: {}", failure.source);
            ExitCode::from(EXIT_STARTUP)
        }
        Err(failure) => {
            tracing::error!("Crawl failed: {}", failure);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Loads configuration and builds the crawl request from the arguments
fn prepare(cli: &Cli) -> anyhow::Result<(Config, CrawlRequest)> {
    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            load_config(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?
        }
        None => Config::default(),
    };

    for slug in &cli.profiles {
        validate_profile_slug(slug).with_context(|| format!("invalid profile slug '{}'", slug))?;
    }

    let headless = if cli.headed {
        false
    } else {
        cli.headless.unwrap_or(config.browser.headless)
    };

    let request = CrawlRequest {
        profile_slugs: cli.profiles.clone(),
        credentials: Credentials::new(cli.email.as_str(), cli.password.as_str()),
        headless,
    };

    Ok((config, request))
}

/// Cancels `token` on the first Ctrl-C so the crawl stops after the current page
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; stopping after the current page");
            token.cancel();
        }
    });
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("linkedin_crawl=info,warn"),
            1 => EnvFilter::new("linkedin_crawl=debug,info"),
            2 => EnvFilter::new("linkedin_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}
