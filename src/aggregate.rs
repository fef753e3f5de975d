//! Keyword × scope fan-out.
//!
//! A run expands its keywords and scopes into [`Query`]s, fetches each one,
//! normalizes what comes back and concatenates the rows in query order:
//!
//! - no scopes: one global query per keyword
//! - scopes: one query per (scope, keyword), scope-major, so rows come out
//!   grouped by scope
//!
//! A failing query is recorded on the run and contributes zero rows; it never
//! stops the remaining queries. Posts matched by several queries appear once
//! per query, each tagged with the keyword that found it.

use crate::error::{FetchError, StartError};
use crate::fetcher::Fetcher;
use crate::models::{
    AggregationRun, Query, QueryCount, QueryError, RawPost, SortMode, Strategy, TimeWindow,
};
use crate::normalize::Normalizer;
use crate::sources::PostSource;
use crate::utils::normalize_scope;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::pin::pin;
use tracing::{info, instrument, warn};

/// Knobs shared by every query of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub limit: usize,
    pub sort: SortMode,
    pub time_window: TimeWindow,
    pub strategy: Strategy,
}

/// Expand keywords and scopes into the ordered query list.
///
/// Blank keywords and scopes are skipped. Fails when no keyword is left or
/// the limit is zero.
pub fn build_queries(
    keywords: &[String],
    scopes: &[String],
    params: SearchParams,
) -> Result<Vec<Query>, StartError> {
    if params.limit == 0 {
        return Err(StartError::InvalidQuery("post limit must be positive".into()));
    }

    let keywords: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();
    if keywords.is_empty() {
        return Err(StartError::InvalidQuery("no search keywords given".into()));
    }
    let scopes: Vec<String> = scopes.iter().filter_map(|s| normalize_scope(s)).collect();

    let query = |scope: Option<&String>, keyword: &String| Query {
        keyword: keyword.clone(),
        scope: scope.cloned(),
        limit: params.limit,
        sort: params.sort,
        time_window: params.time_window,
        strategy: params.strategy,
    };

    let queries = if scopes.is_empty() {
        keywords.iter().map(|k| query(None, k)).collect()
    } else {
        scopes
            .iter()
            .cartesian_product(keywords.iter())
            .map(|(s, k)| query(Some(s), k))
            .collect()
    };
    Ok(queries)
}

pub struct Aggregator<S> {
    fetcher: Fetcher<S>,
    normalizer: Normalizer,
    concurrency: usize,
}

impl<S: PostSource> Aggregator<S> {
    /// `concurrency` bounds in-flight fetches; results keep query order regardless.
    pub fn new(fetcher: Fetcher<S>, normalizer: Normalizer, concurrency: usize) -> Self {
        Self {
            fetcher,
            normalizer,
            concurrency: concurrency.max(1),
        }
    }

    pub fn with_sentiment(&self) -> bool {
        self.normalizer.with_sentiment()
    }

    /// Build the queries for `keywords` × `scopes` and run them.
    pub async fn aggregate(
        &self,
        keywords: &[String],
        scopes: &[String],
        params: SearchParams,
    ) -> Result<AggregationRun, StartError> {
        let queries = build_queries(keywords, scopes, params)?;
        Ok(self.run_queries(queries, |_| {}).await)
    }

    /// Run `queries`, calling `on_progress` after each one is folded into the run.
    #[instrument(level = "info", skip_all, fields(queries = queries.len(), concurrency = self.concurrency))]
    pub async fn run_queries(
        &self,
        queries: Vec<Query>,
        mut on_progress: impl FnMut(&AggregationRun),
    ) -> AggregationRun {
        let mut run = AggregationRun::default();

        let mut results = pin!(
            stream::iter(queries)
                .map(|q| async move {
                    let result = self.fetcher.fetch(&q).await;
                    (q, result)
                })
                .buffered(self.concurrency)
        );

        while let Some((query, result)) = results.next().await {
            self.absorb(&mut run, &query, result);
            run.queries.push(query);
            on_progress(&run);
        }

        info!(
            rows = run.collected_rows.len(),
            failed_queries = run.errors.len(),
            skipped_posts = run.skipped_posts,
            "Aggregation finished"
        );
        run
    }

    /// Fold one query's outcome into `run`.
    fn absorb(
        &self,
        run: &mut AggregationRun,
        query: &Query,
        result: Result<Vec<RawPost>, FetchError>,
    ) {
        let before = run.collected_rows.len();
        match result {
            Ok(posts) => {
                for raw in posts {
                    match self
                        .normalizer
                        .normalize(raw, &query.keyword, query.scope.as_deref())
                    {
                        Ok(row) => run.collected_rows.push(row),
                        Err(e) => {
                            warn!(error = %e, kind = ?e.kind(), %query, "Skipping malformed post");
                            run.skipped_posts += 1;
                        }
                    }
                }
                info!(%query, count = run.collected_rows.len() - before, "Query complete");
            }
            Err(e) => {
                warn!(%query, error = %e, "Query failed; continuing with the rest");
                run.errors.push(QueryError::new(query, &e));
            }
        }
        run.per_query_counts.push(QueryCount {
            keyword: query.keyword.clone(),
            scope: query.scope.clone(),
            count: run.collected_rows.len() - before,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, SourceError};
    use crate::fetcher::RetryPolicy;
    use crate::sources::mock::{MockSource, Step, post};
    use crate::sources::reddit::REDDIT;
    use std::time::Duration;

    fn params() -> SearchParams {
        SearchParams {
            limit: 20,
            sort: SortMode::Relevance,
            time_window: TimeWindow::Month,
            strategy: Strategy::Search,
        }
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn aggregator(source: MockSource, concurrency: usize) -> Aggregator<MockSource> {
        Aggregator::new(
            Fetcher::new(source, RetryPolicy::default()),
            Normalizer::new(REDDIT, false),
            concurrency,
        )
    }

    #[test]
    fn test_global_queries_one_per_keyword() {
        let queries = build_queries(&strings(&["crm", "invoicing", "payroll"]), &[], params()).unwrap();
        assert_eq!(queries.len(), 3);
        assert!(queries.iter().all(|q| q.scope.is_none()));
        assert_eq!(queries[1].keyword, "invoicing");
    }

    #[test]
    fn test_scoped_queries_are_scope_major() {
        let queries = build_queries(
            &strings(&["crm", "invoicing"]),
            &strings(&["sales", "r/startups", "smallbusiness"]),
            params(),
        )
        .unwrap();
        let pairs: Vec<(String, String)> = queries
            .iter()
            .map(|q| (q.scope.clone().unwrap(), q.keyword.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("sales".into(), "crm".into()),
                ("sales".into(), "invoicing".into()),
                ("startups".into(), "crm".into()),
                ("startups".into(), "invoicing".into()),
                ("smallbusiness".into(), "crm".into()),
                ("smallbusiness".into(), "invoicing".into()),
            ]
        );
    }

    #[test]
    fn test_blank_entries_are_skipped() {
        let queries = build_queries(
            &strings(&[" crm ", "  ", ""]),
            &strings(&["", "  "]),
            params(),
        )
        .unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].keyword, "crm");
        assert_eq!(queries[0].scope, None);
    }

    #[test]
    fn test_invalid_queries() {
        assert!(matches!(
            build_queries(&strings(&["  "]), &[], params()),
            Err(StartError::InvalidQuery(_))
        ));
        let zero = SearchParams { limit: 0, ..params() };
        assert!(matches!(
            build_queries(&strings(&["crm"]), &[], zero),
            Err(StartError::InvalidQuery(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_sale_scenario() {
        let source = MockSource::new().on(
            "search:all:sale",
            Step::Posts(vec![post("long", &"x".repeat(600)), post("short", &"y".repeat(10))]),
        );
        let run = aggregator(source, 1)
            .aggregate(&strings(&["sale"]), &[], params())
            .await
            .unwrap();

        assert_eq!(run.collected_rows.len(), 2);
        assert_eq!(run.collected_rows[0].body_excerpt.len(), 503);
        assert!(run.collected_rows[0].body_excerpt.ends_with("..."));
        assert_eq!(run.collected_rows[1].body_excerpt, "y".repeat(10));
        assert!(run.collected_rows.iter().all(|r| r.keyword == "sale"));
        assert!(run.errors.is_empty());
        assert_eq!(run.queries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_query_does_not_abort_run() {
        let fail = || Step::Fail(SourceError::Transport("503".into()));
        let source = MockSource::new()
            .on("search:sales:crm", Step::Posts(vec![post("a", "")]))
            .on("search:startups:crm", fail())
            .on("search:startups:crm", fail())
            .on("search:startups:crm", fail())
            .on("search:smallbusiness:crm", Step::Posts(vec![post("b", ""), post("c", "")]));

        let run = aggregator(source, 1)
            .aggregate(
                &strings(&["crm"]),
                &strings(&["sales", "startups", "smallbusiness"]),
                params(),
            )
            .await
            .unwrap();

        assert_eq!(run.collected_rows.len(), 3);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].scope.as_deref(), Some("startups"));
        assert_eq!(run.errors[0].kind, ErrorKind::SourceUnavailable);
        let counts: Vec<usize> = run.per_query_counts.iter().map(|c| c.count).collect();
        assert_eq!(counts, vec![1, 0, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_posts_are_skipped() {
        let mut broken = post("bad", "");
        broken.title = None;
        let source = MockSource::new().on(
            "search:all:crm",
            Step::Posts(vec![post("a", ""), broken, post("b", "")]),
        );
        let run = aggregator(source, 1)
            .aggregate(&strings(&["crm"]), &[], params())
            .await
            .unwrap();
        assert_eq!(run.collected_rows.len(), 2);
        assert_eq!(run.skipped_posts, 1);
        assert!(run.errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_fetch_keeps_query_order() {
        let source = MockSource::new()
            .on(
                "search:all:slow",
                Step::Delay(Duration::from_secs(5), vec![post("first", "")]),
            )
            .on("search:all:fast", Step::Posts(vec![post("second", "")]));
        let run = aggregator(source, 4)
            .aggregate(&strings(&["slow", "fast"]), &[], params())
            .await
            .unwrap();
        let titles: Vec<&str> = run.collected_rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Post first", "Post second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reports_each_query() {
        let source = MockSource::new()
            .on("search:all:a", Step::Posts(vec![post("1", "")]))
            .on("search:all:b", Step::Posts(vec![post("2", "")]));
        let queries = build_queries(&strings(&["a", "b"]), &[], params()).unwrap();
        let mut seen = Vec::new();
        aggregator(source, 1)
            .run_queries(queries, |run| seen.push(run.collected_rows.len()))
            .await;
        assert_eq!(seen, vec![1, 2]);
    }
}
