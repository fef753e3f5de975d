//! Scraper configuration.
//!
//! Settings come from `config.yaml` when it exists. Without the file, each
//! setting falls back to an environment variable, and then to its default:
//!
//! | YAML key | Environment | Default |
//! |----------|-------------|---------|
//! | `search_keywords` | `SEARCH_KEYWORDS` (comma separated) | none |
//! | `target_subreddits` | `TARGET_SUBREDDITS` (comma separated) | none (search all of Reddit) |
//! | `post_limit` | `POST_LIMIT` | 50 |
//! | `time_filter` | `TIME_FILTER` | `month` |
//! | `sort_by` | `SORT_BY` | `relevance` |
//! | `strategy` | `SEARCH_STRATEGY` | `search` |
//! | `reddit.client_id` / `client_secret` / `user_agent` | `REDDIT_CLIENT_ID` / `REDDIT_CLIENT_SECRET` / `REDDIT_USER_AGENT` | anonymous |
//! | `sink.spreadsheet_id` / `sheet` / `credentials` | `GOOGLE_SHEET_ID` / `GOOGLE_SHEET_TAB` / `GOOGLE_CREDENTIALS` | no sheet |
//!
//! Reddit and Google credentials are also read from the environment when the
//! file leaves them out, so secrets can stay out of `config.yaml`.

use crate::models::{SortMode, Strategy, TimeWindow};
use serde::Deserialize;
use std::error::Error;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub search_keywords: Vec<String>,
    #[serde(default, alias = "scopes")]
    pub target_subreddits: Vec<String>,
    #[serde(default = "default_post_limit")]
    pub post_limit: usize,
    #[serde(default = "default_time_filter")]
    pub time_filter: String,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    #[serde(default = "default_true")]
    pub sentiment: bool,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_one")]
    pub backoff_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_secs: default_one(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default = "default_sheet")]
    pub sheet: String,
    /// Path to a service-account JSON key, or the JSON document itself.
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_one")]
    pub batch_delay_secs: u64,
    #[serde(default = "default_insert_row")]
    pub insert_row: usize,
    /// Sheets v4 `spreadsheets` collection URL.
    #[serde(default = "default_sheets_api")]
    pub api_base: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            sheet: default_sheet(),
            credentials: None,
            batch_size: default_batch_size(),
            batch_delay_secs: default_one(),
            insert_row: default_insert_row(),
            api_base: default_sheets_api(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_post_limit() -> usize {
    50
}
fn default_time_filter() -> String {
    "month".to_string()
}
fn default_sort_by() -> String {
    "relevance".to_string()
}
fn default_strategy() -> String {
    "search".to_string()
}
fn default_true() -> bool {
    true
}
fn default_fetch_concurrency() -> usize {
    1
}
fn default_max_retries() -> usize {
    3
}
fn default_one() -> u64 {
    1
}
fn default_timeout_secs() -> u64 {
    10
}
fn default_sheet() -> String {
    "Sheet1".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_insert_row() -> usize {
    2
}
fn default_sheets_api() -> String {
    "https://sheets.googleapis.com/v4/spreadsheets".to_string()
}
fn default_user_agent() -> String {
    format!("LemonLeads/{}", env!("CARGO_PKG_VERSION"))
}
fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_keywords: Vec::new(),
            target_subreddits: Vec::new(),
            post_limit: default_post_limit(),
            time_filter: default_time_filter(),
            sort_by: default_sort_by(),
            strategy: default_strategy(),
            sentiment: true,
            fetch_concurrency: default_fetch_concurrency(),
            retry: RetryConfig::default(),
            sink: SinkConfig::default(),
            reddit: RedditConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    /// Load `path` if it exists, otherwise build the config from the environment.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let path = path.as_ref();
        let lookup = |key: &str| std::env::var(key).ok();
        let config = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            let mut config = Self::from_yaml(&text)?;
            config.fill_secrets(lookup);
            info!("Loaded configuration file");
            config
        } else {
            info!("No configuration file; using environment");
            Self::from_env(lookup)
        };
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        // an empty file deserializes to null, which we treat as "all defaults"
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Build a config purely from variables resolved by `lookup`.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup("SEARCH_KEYWORDS") {
            config.search_keywords = split_list(&v);
        }
        if let Some(v) = lookup("TARGET_SUBREDDITS") {
            config.target_subreddits = split_list(&v);
        }
        if let Some(n) = lookup("POST_LIMIT").and_then(|v| v.trim().parse().ok()) {
            config.post_limit = n;
        }
        if let Some(v) = lookup("TIME_FILTER") {
            config.time_filter = v;
        }
        if let Some(v) = lookup("SORT_BY") {
            config.sort_by = v;
        }
        if let Some(v) = lookup("SEARCH_STRATEGY") {
            config.strategy = v;
        }
        config.fill_secrets(lookup);
        config
    }

    /// Fill credentials the file left empty from the environment.
    fn fill_secrets(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fill(&mut self.reddit.client_id, lookup("REDDIT_CLIENT_ID"));
        fill(&mut self.reddit.client_secret, lookup("REDDIT_CLIENT_SECRET"));
        if let Some(agent) = lookup("REDDIT_USER_AGENT") {
            self.reddit.user_agent = agent;
        }
        fill(&mut self.sink.spreadsheet_id, lookup("GOOGLE_SHEET_ID"));
        fill(&mut self.sink.credentials, lookup("GOOGLE_CREDENTIALS"));
        if let Some(tab) = lookup("GOOGLE_SHEET_TAB") {
            self.sink.sheet = tab;
        }
    }

    pub fn sort_mode(&self) -> SortMode {
        SortMode::parse_or_default(&self.sort_by)
    }

    pub fn time_window(&self) -> TimeWindow {
        TimeWindow::parse_or_default(&self.time_filter)
    }

    pub fn search_strategy(&self) -> Strategy {
        Strategy::parse_or_default(&self.strategy)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.retry.timeout_secs)
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.as_deref().is_none_or(str::is_empty) {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            *slot = Some(v);
        }
    }
}

/// Split a comma separated list, dropping blank entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
