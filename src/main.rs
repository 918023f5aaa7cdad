//! CLI Entry Point for stdf-analytics
//!
//! Runs the analytics service against files in the configured data directory
//! and prints results as JSON.
//!
//! # Usage
//!
//! ```bash
//! stdf-analytics files
//! stdf-analytics parse lot42.stdf
//! stdf-analytics summary lot42.stdf
//! stdf-analytics results lot42.stdf --site 1 --page 2 --page-size 50
//! stdf-analytics cache list
//! ```

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use stdf_analytics::analytics::TestResultsQuery;
use stdf_analytics::config::{AppConfig, DEFAULT_CONFIG_PATH};
use stdf_analytics::jobs::JobStatus;
use stdf_analytics::{logging, StdfError, StdfService};
use tokio::runtime::Handle;

/// Poll interval while waiting on a parse job.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "stdf-analytics")]
#[command(about = "Yield and test analytics over STDF files", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List input files in the data directory
    Files,

    /// Decode a file in the background and follow its progress
    Parse { file: String },

    /// Yield, site and hard-bin summary
    Summary { file: String },

    /// One die per part result
    WaferMap { file: String },

    /// Per-test statistics, worst fail rate first
    Tests { file: String },

    /// Parametric test rows, filtered and paginated
    Results {
        file: String,

        #[arg(long)]
        test: Option<u32>,

        #[arg(long)]
        site: Option<u8>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Defaults to analytics.default_page_size
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Inspect or evict the persistent cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Totals for files, payloads and bytes
    Stats,

    /// Cached file records, most recently accessed first
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Remove one cached file record and its payloads
    Delete { id: i64 },

    /// Remove every cached record
    Clear,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Runs a synchronous service call on the blocking pool.
async fn blocking<T, F>(service: &StdfService, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(StdfService) -> stdf_analytics::AppResult<T> + Send + 'static,
{
    let service = service.clone();
    let result = tokio::task::spawn_blocking(move || call(service))
        .await
        .map_err(|e| StdfError::Task(e.to_string()))?;
    Ok(result?)
}

async fn parse(service: &StdfService, file: String) -> Result<()> {
    let job = service.submit(&file)?;
    tracing::info!(job_id = %job.job_id, "following parse job");
    let mut last_percent = None;
    loop {
        let snapshot = service.poll(job.job_id)?;
        if last_percent != Some(snapshot.percent) {
            eprintln!("{}: {:>3}% ({:?})", snapshot.filename, snapshot.percent, snapshot.status);
            last_percent = Some(snapshot.percent);
        }
        match snapshot.status {
            JobStatus::Done => return print_json(&snapshot),
            JobStatus::Error => {
                print_json(&snapshot)?;
                bail!(
                    "parse failed: {}",
                    snapshot.error.unwrap_or_else(|| "unknown error".into())
                );
            }
            JobStatus::Pending | JobStatus::Running => tokio::time::sleep(POLL_INTERVAL).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config)?;
    logging::init_from_config(&config)?;

    let service = StdfService::open(config, Handle::current())?;

    match cli.command {
        Commands::Files => print_json(&service.list_files()?),
        Commands::Parse { file } => parse(&service, file).await,
        Commands::Summary { file } => {
            print_json(&blocking(&service, move |s| s.summary(&file)).await?)
        }
        Commands::WaferMap { file } => {
            print_json(&blocking(&service, move |s| s.wafer_map(&file)).await?)
        }
        Commands::Tests { file } => {
            print_json(&blocking(&service, move |s| s.test_list(&file)).await?)
        }
        Commands::Results {
            file,
            test,
            site,
            page,
            page_size,
        } => {
            let defaults = service.default_query();
            let query = TestResultsQuery {
                test_num: test,
                site_num: site,
                page,
                page_size: page_size.unwrap_or(defaults.page_size),
            };
            print_json(&blocking(&service, move |s| s.test_results(&file, &query)).await?)
        }
        Commands::Cache { action } => match action {
            CacheAction::Stats => print_json(&service.stats()?),
            CacheAction::List { limit, offset } => print_json(&service.list_cached(limit, offset)?),
            CacheAction::Delete { id } => {
                service.delete_cached(id)?;
                eprintln!("Deleted cached file {id}");
                Ok(())
            }
            CacheAction::Clear => {
                let removed = service.clear_all()?;
                eprintln!("Removed {removed} cached files");
                Ok(())
            }
        },
    }
}
