//! JSON run reports.
//!
//! A report holds the column header, the rows in sheet order, the per-query
//! counts and any recorded query or sheet errors of one run. Reports are
//! grouped by UTC date and named after the UTC time the run finished:
//!
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     └── 081500.json
//! ```

use crate::models::header_row;
use crate::run::RunState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::error::Error;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info, instrument};

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub generated_at: String,
    pub header: Vec<String>,
    #[serde(flatten)]
    pub state: &'a RunState,
}

impl<'a> RunReport<'a> {
    pub fn new(state: &'a RunState, with_sentiment: bool, at: DateTime<Utc>) -> Self {
        Self {
            generated_at: at.to_rfc3339(),
            header: header_row(with_sentiment),
            state,
        }
    }
}

/// Path of the report for a run finished at `at`.
pub fn report_path(json_output_dir: &str, at: DateTime<Utc>) -> PathBuf {
    PathBuf::from(json_output_dir)
        .join(at.format("%Y-%m-%d").to_string())
        .join(format!("{}.json", at.format("%H%M%S")))
}

/// Write `report` under `json_output_dir` and return the file's path.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_report(
    report: &RunReport<'_>,
    json_output_dir: &str,
    at: DateTime<Utc>,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    let path = report_path(json_output_dir, at);

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), rows = report.state.results.len(), "Wrote JSON run report");
    Ok(path)
}
