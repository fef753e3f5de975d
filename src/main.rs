//! # Lemon Leads
//!
//! A lead-generation scraper that searches Reddit for posts mentioning a set
//! of keywords, turns them into flat spreadsheet rows (optionally with a
//! lexical sentiment score) and saves them to a Google Sheet.
//!
//! ## Features
//!
//! - Global or per-subreddit keyword search, or keyword-filtered listings
//! - Bounded retries with backoff for every query; a failing query never
//!   stops the run
//! - Batched, paced sheet writes with one credential refresh on 401
//! - An HTTP API that runs one scrape at a time in the background
//! - Optional JSON run reports
//!
//! ## Usage
//!
//! ```sh
//! lemon_leads serve
//! lemon_leads run --json-out ./runs
//! ```
//!
//! ## Architecture
//!
//! 1. **Queries**: keywords × subreddits, subreddit-major
//! 2. **Fetching**: one source call sequence per query, retried on transport errors
//! 3. **Normalizing**: raw posts to fixed-order rows, malformed posts skipped
//! 4. **Output**: batched sheet inserts, the HTTP API, and JSON reports

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod aggregate;
mod cli;
mod config;
mod error;
mod fetcher;
mod models;
mod normalize;
mod outputs;
mod run;
mod sentiment;
mod server;
mod sink;
mod sources;
mod utils;

use aggregate::Aggregator;
use cli::{Cli, Command};
use config::Config;
use fetcher::{Fetcher, RetryPolicy};
use models::header_row;
use normalize::{DATE_FORMAT, Normalizer};
use outputs::json::{RunReport, write_report};
use run::{RunCoordinator, RunRequest, RunStatus};
use server::{AppState, RequestDefaults};
use sink::TabularSink;
use sink::sheets::SheetsClient;
use sink::writer::BatchPlan;
use sources::PostSource;
use sources::reddit::RedditClient;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "lemon_leads starting up");

    let args = Cli::parse();
    debug!(config = %args.config, command = ?args.command, "Parsed CLI arguments");

    let config = Config::load(&args.config)?;

    match args.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let coordinator = Arc::new(build_coordinator(&config, true)?);
            let state = AppState::new(coordinator, RequestDefaults::from_config(&config));
            server::serve(state, &bind).await?;
        }
        Command::Run { json_out, no_sheet } => {
            run_once(&config, json_out.as_deref(), !no_sheet).await?;
        }
        Command::Clear { all } => {
            let sheet = open_sheet(&config)?;
            sheet.clear(!all).await?;
            info!(sheet = %sheet.location(), keep_header = !all, "Sheet cleared");
        }
        Command::Dump => {
            let rows = open_sheet(&config)?.get_all_rows().await?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Command::CheckSheet => {
            let sheet = open_sheet(&config)?;
            let mut row = vec![String::new(); header_row(config.sentiment).len()];
            row[0] = "Lemon Leads connection check".to_string();
            row[4] = Utc::now().format(DATE_FORMAT).to_string();
            sheet.append_row(row).await?;
            info!(sheet = %sheet.location(), "Test row appended");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Wire the Reddit source, the pipeline and (when configured) the sheet.
fn build_coordinator(
    config: &Config,
    with_sheet: bool,
) -> Result<RunCoordinator<RedditClient>, Box<dyn Error>> {
    let reddit = RedditClient::new(&config.reddit, config.request_timeout())?;
    let normalizer = Normalizer::new(reddit.platform(), config.sentiment);
    let fetcher = Fetcher::new(reddit, RetryPolicy::from(&config.retry));
    let aggregator = Aggregator::new(fetcher, normalizer, config.fetch_concurrency);

    let sink: Option<Arc<dyn TabularSink>> = if !with_sheet {
        None
    } else if config.sink.spreadsheet_id.is_some() {
        Some(Arc::new(SheetsClient::new(&config.sink, config.request_timeout())?))
    } else {
        warn!("No spreadsheet configured; rows will only be kept in memory");
        None
    };

    Ok(RunCoordinator::new(
        aggregator,
        sink,
        BatchPlan::from(&config.sink),
    ))
}

fn open_sheet(config: &Config) -> Result<SheetsClient, Box<dyn Error>> {
    Ok(SheetsClient::new(&config.sink, config.request_timeout())?)
}

/// One scrape with the configured keywords, outside the HTTP API.
async fn run_once(
    config: &Config,
    json_out: Option<&str>,
    with_sheet: bool,
) -> Result<(), Box<dyn Error>> {
    // Early check: fail before scraping if the report can't be written
    if let Some(dir) = json_out {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "JSON output directory is not writable");
            return Err(e);
        }
    }

    let coordinator = build_coordinator(config, with_sheet)?;
    let defaults = RequestDefaults::from_config(config);
    let state = coordinator
        .run(RunRequest {
            keywords: config.search_keywords.clone(),
            scopes: defaults.scopes,
            params: defaults.params,
        })
        .await?;

    for count in &state.per_query_counts {
        info!(keyword = %count.keyword, scope = ?count.scope, count = count.count, "Query result");
    }
    for failed in &state.errors {
        warn!(keyword = %failed.keyword, scope = ?failed.scope, kind = ?failed.kind, error = %failed.message, "Query failed");
    }

    if let Some(dir) = json_out {
        let now = Utc::now();
        let report = RunReport::new(&state, coordinator.with_sentiment(), now);
        if let Err(e) = write_report(&report, dir, now).await {
            error!(error = %e, "Failed to write JSON run report");
        }
    } else if !with_sheet {
        println!("{}", serde_json::to_string_pretty(&state.results)?);
    }

    info!(
        status = ?state.status,
        rows = state.results.len(),
        rows_written = state.rows_written,
        "Run complete"
    );
    match (state.status, state.sink_error) {
        (RunStatus::Partial | RunStatus::Failed, Some(e)) => Err(e.into()),
        _ => Ok(()),
    }
}
