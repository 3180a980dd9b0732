//! Exposes the command line application.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use shopquery_service::config::Config;
use shopquery_service::metrics;
use shopquery_service::rest::{Entity, ListFilters};

use crate::commands;
use crate::logging;

/// Shopquery commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch one page of a listing and print it as JSON.
    List(Target),

    /// Keep a listing query open and print every change of its state.
    ///
    /// Every interval, the window is considered to regain focus, which refreshes stale data
    /// if `refetch_on_window_focus` is configured.
    Watch {
        #[command(flatten)]
        target: Target,

        /// Time between simulated window focus events.
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        interval: Duration,

        /// Number of focus events before exiting.
        #[arg(long, default_value_t = 10)]
        count: usize,
    },

    /// Print the effective query timings of every entity.
    Config,
}

/// The listing to query.
#[derive(Debug, Args)]
struct Target {
    /// One of orders, products, customers, outlets, or categories.
    entity: Entity,

    /// Free text search.
    #[arg(long)]
    search: Option<String>,

    /// Only list items with this status.
    #[arg(long)]
    status: Option<String>,

    /// Only list items of this outlet.
    #[arg(long)]
    outlet: Option<String>,

    /// The page to fetch, starting at 1.
    #[arg(long)]
    page: Option<u32>,

    /// The number of items per page.
    #[arg(long)]
    limit: Option<u32>,

    /// Additional filters as `KEY=VALUE`.
    #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    filters: Vec<(String, String)>,
}

impl Target {
    fn filters(&self) -> ListFilters {
        ListFilters {
            search: self.search.clone(),
            status: self.status.clone(),
            outlet_id: self.outlet.clone(),
            page: self.page,
            limit: self.limit,
            extra: self.filters.iter().cloned().collect(),
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected `KEY=VALUE`, got `{s}`"))?;
    Ok((key.to_owned(), value.to_owned()))
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: No other threads have been started yet.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )?;
    }

    if let Command::Config = cli.command {
        commands::print_config(&config);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("shopquery-worker")
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async move {
        match cli.command {
            Command::List(target) => {
                commands::list(&config, target.entity, target.filters()).await
            }
            Command::Watch {
                target,
                interval,
                count,
            } => commands::watch(&config, target.entity, target.filters(), interval, count).await,
            Command::Config => Ok(()),
        }
    })
}
