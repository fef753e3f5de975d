//! Data models for queries, fetched posts and the rows written to the sheet.
//!
//! This module defines the core data structures used throughout the application:
//! - [`Query`]: one unit of search work (keyword, optional scope, paging knobs)
//! - [`RawPost`]: a post exactly as the source returned it
//! - [`NormalizedRow`]: the flat, ordered row the sheet and the API receive
//! - [`AggregationRun`]: everything one fan-out over the queries produced

use crate::error::{ErrorKind, FetchError};
use serde::Serialize;
use serde::ser::{SerializeSeq, Serializer};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Column titles, in the order [`NormalizedRow::cells`] emits them.
pub const BASE_HEADER: [&str; 6] = ["Title", "Content", "URL", "Source", "Date", "Keyword"];
/// Extra columns present when sentiment scoring is enabled.
pub const SENTIMENT_HEADER: [&str; 3] = ["Sentiment", "Upvotes", "Comments"];

/// Result ordering requested from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    #[default]
    Relevance,
    Hot,
    New,
    Top,
    Comments,
}

impl SortMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::Relevance => "relevance",
            SortMode::Hot => "hot",
            SortMode::New => "new",
            SortMode::Top => "top",
            SortMode::Comments => "comments",
        }
    }

    /// Parse a user-supplied value, falling back to the default on anything unknown.
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!(value, fallback = SortMode::default().as_str(), "Unknown sort mode");
            SortMode::default()
        })
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relevance" => Ok(SortMode::Relevance),
            "hot" => Ok(SortMode::Hot),
            "new" => Ok(SortMode::New),
            "top" => Ok(SortMode::Top),
            "comments" => Ok(SortMode::Comments),
            other => Err(format!("unknown sort mode `{other}`")),
        }
    }
}

/// How far back the source should look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeWindow {
    Hour,
    Day,
    Week,
    #[default]
    Month,
    Year,
    All,
}

impl TimeWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Hour => "hour",
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }

    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!(value, fallback = TimeWindow::default().as_str(), "Unknown time window");
            TimeWindow::default()
        })
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(TimeWindow::Hour),
            "day" => Ok(TimeWindow::Day),
            "week" => Ok(TimeWindow::Week),
            "month" => Ok(TimeWindow::Month),
            "year" => Ok(TimeWindow::Year),
            "all" => Ok(TimeWindow::All),
            other => Err(format!("unknown time window `{other}`")),
        }
    }
}

/// Whether queries search the source or walk a scope's listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Search,
    Listing,
}

impl Strategy {
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "search" => Strategy::Search,
            "listing" => Strategy::Listing,
            other => {
                warn!(value = other, fallback = "search", "Unknown search strategy");
                Strategy::Search
            }
        }
    }
}

/// The access pattern a [`Query`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode<'a> {
    /// Search inside one named scope.
    Scoped(&'a str),
    /// Search across every scope.
    Global,
    /// Walk a scope's default ordering and keep posts mentioning the keyword.
    Listing(Option<&'a str>),
}

/// One unit of search work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub keyword: String,
    pub scope: Option<String>,
    pub limit: usize,
    pub sort: SortMode,
    pub time_window: TimeWindow,
    pub strategy: Strategy,
}

impl Query {
    pub fn mode(&self) -> QueryMode<'_> {
        match (self.strategy, self.scope.as_deref()) {
            (Strategy::Listing, scope) => QueryMode::Listing(scope),
            (Strategy::Search, Some(scope)) => QueryMode::Scoped(scope),
            (Strategy::Search, None) => QueryMode::Global,
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "'{}' in {}", self.keyword, scope),
            None => write!(f, "'{}' everywhere", self.keyword),
        }
    }
}

/// A post as returned by the source.
///
/// Fields the source may omit are optional here; the normalizer decides which
/// of them a row cannot do without.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPost {
    pub id: Option<String>,
    pub title: Option<String>,
    /// Self-post text. Empty for link posts.
    pub body: Option<String>,
    /// Target URL, absolute for link posts.
    pub url: Option<String>,
    /// Path of the discussion page, relative to the platform's base URL.
    pub permalink: Option<String>,
    pub scope_name: Option<String>,
    pub created_utc: Option<f64>,
    pub score: i64,
    pub comment_count: u64,
}

/// Sentiment-related trailing columns of a row.
#[derive(Debug, Clone, PartialEq)]
pub struct Engagement {
    pub sentiment: f64,
    pub upvotes: i64,
    pub comments: u64,
}

/// The canonical output row.
///
/// Serialises as a flat array of strings in sheet column order, matching the
/// layout of [`BASE_HEADER`] followed by [`SENTIMENT_HEADER`] when present.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub title: String,
    pub body_excerpt: String,
    pub link: String,
    pub source_label: String,
    pub human_date: String,
    pub keyword: String,
    pub engagement: Option<Engagement>,
}

impl NormalizedRow {
    pub fn cells(&self) -> Vec<String> {
        let mut cells = vec![
            self.title.clone(),
            self.body_excerpt.clone(),
            self.link.clone(),
            self.source_label.clone(),
            self.human_date.clone(),
            self.keyword.clone(),
        ];
        if let Some(e) = &self.engagement {
            cells.push(format!("{:.3}", e.sentiment));
            cells.push(e.upvotes.to_string());
            cells.push(e.comments.to_string());
        }
        cells
    }
}

impl Serialize for NormalizedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let cells = self.cells();
        let mut seq = serializer.serialize_seq(Some(cells.len()))?;
        for cell in &cells {
            seq.serialize_element(cell)?;
        }
        seq.end()
    }
}

/// Header row matching the rows a run produces.
pub fn header_row(with_sentiment: bool) -> Vec<String> {
    let mut header: Vec<String> = BASE_HEADER.iter().map(|s| s.to_string()).collect();
    if with_sentiment {
        header.extend(SENTIMENT_HEADER.iter().map(|s| s.to_string()));
    }
    header
}

/// A query that yielded nothing because the source failed it.
#[derive(Debug, Clone, Serialize)]
pub struct QueryError {
    pub keyword: String,
    pub scope: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn new(query: &Query, err: &FetchError) -> Self {
        Self {
            keyword: query.keyword.clone(),
            scope: query.scope.clone(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// How many rows a single query contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryCount {
    pub keyword: String,
    pub scope: Option<String>,
    pub count: usize,
}

/// Everything one aggregation produced, in query order.
#[derive(Debug, Default)]
pub struct AggregationRun {
    pub queries: Vec<Query>,
    pub collected_rows: Vec<NormalizedRow>,
    pub per_query_counts: Vec<QueryCount>,
    pub errors: Vec<QueryError>,
    /// Posts dropped by the normalizer.
    pub skipped_posts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(scope: Option<&str>, strategy: Strategy) -> Query {
        Query {
            keyword: "crm".to_string(),
            scope: scope.map(str::to_string),
            limit: 10,
            sort: SortMode::New,
            time_window: TimeWindow::Week,
            strategy,
        }
    }

    #[test]
    fn test_sort_mode_fallback() {
        assert_eq!(SortMode::parse_or_default("TOP"), SortMode::Top);
        assert_eq!(SortMode::parse_or_default("bogus"), SortMode::Relevance);
        assert_eq!(SortMode::parse_or_default(""), SortMode::Relevance);
    }

    #[test]
    fn test_time_window_fallback() {
        assert_eq!(TimeWindow::parse_or_default("year"), TimeWindow::Year);
        assert_eq!(TimeWindow::parse_or_default("decade"), TimeWindow::Month);
    }

    #[test]
    fn test_query_mode() {
        assert_eq!(query(None, Strategy::Search).mode(), QueryMode::Global);
        assert_eq!(
            query(Some("smallbusiness"), Strategy::Search).mode(),
            QueryMode::Scoped("smallbusiness")
        );
        assert_eq!(
            query(Some("sales"), Strategy::Listing).mode(),
            QueryMode::Listing(Some("sales"))
        );
        assert_eq!(query(None, Strategy::Listing).mode(), QueryMode::Listing(None));
    }

    #[test]
    fn test_row_cells_without_engagement() {
        let row = NormalizedRow {
            title: "t".into(),
            body_excerpt: "b".into(),
            link: "https://x".into(),
            source_label: "reddit/r/sales".into(),
            human_date: "2025-03-04 10:00:00".into(),
            keyword: "crm".into(),
            engagement: None,
        };
        assert_eq!(row.cells().len(), BASE_HEADER.len());
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(
            json,
            r#"["t","b","https://x","reddit/r/sales","2025-03-04 10:00:00","crm"]"#
        );
    }

    #[test]
    fn test_row_cells_with_engagement() {
        let row = NormalizedRow {
            title: "t".into(),
            body_excerpt: String::new(),
            link: "l".into(),
            source_label: "reddit".into(),
            human_date: "d".into(),
            keyword: "k".into(),
            engagement: Some(Engagement {
                sentiment: 0.5,
                upvotes: 12,
                comments: 3,
            }),
        };
        let cells = row.cells();
        assert_eq!(cells.len(), header_row(true).len());
        assert_eq!(&cells[6..], &["0.500", "12", "3"]);
    }

    #[test]
    fn test_query_outcomes_serialize() {
        let q = query(Some("sales"), Strategy::Search);
        let count = QueryCount {
            keyword: q.keyword.clone(),
            scope: q.scope.clone(),
            count: 4,
        };
        assert_eq!(
            serde_json::to_value(&count).unwrap(),
            serde_json::json!({"keyword": "crm", "scope": "sales", "count": 4})
        );

        let failed = QueryError::new(
            &q,
            &FetchError::Rejected(crate::error::SourceError::Api {
                status: 404,
                message: "banned".into(),
            }),
        );
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["kind"], "source_rejected");
        assert_eq!(json["scope"], "sales");
        assert!(json["message"].as_str().unwrap().contains("banned"));
    }
}
