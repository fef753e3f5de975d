//! Command-line interface definitions for Lemon Leads.
//!
//! This module defines the CLI arguments and subcommands using the `clap`
//! crate. The config path can also come from the environment.

use clap::{Parser, Subcommand};

/// Command-line arguments for the Lemon Leads scraper.
///
/// # Examples
///
/// ```sh
/// # Serve the HTTP API
/// lemon_leads serve
///
/// # One run with the configured keywords, also archived as JSON
/// lemon_leads --config ./config.yaml run --json-out ./runs
///
/// # Empty the sheet but keep its header row
/// lemon_leads clear
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to config.yaml; a missing file means "configure from the environment"
    #[arg(short, long, env = "LEMON_LEADS_CONFIG", default_value = crate::config::DEFAULT_CONFIG_PATH)]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API
    Serve {
        /// Address to bind, overriding `server.bind`
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run one scrape with the configured keywords and exit
    Run {
        /// Also write the run as JSON under this directory
        #[arg(short, long)]
        json_out: Option<String>,

        /// Collect and print only; do not write to the sheet
        #[arg(long)]
        no_sheet: bool,
    },

    /// Clear the sheet, keeping the header row unless `--all` is given
    Clear {
        #[arg(long)]
        all: bool,
    },

    /// Print every sheet row as JSON
    Dump,

    /// Append a test row to verify the sheet credentials
    CheckSheet,
}
