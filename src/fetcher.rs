//! Query execution against a [`PostSource`] with a bounded retry policy.
//!
//! The fetcher picks the source call that matches the query's
//! [`QueryMode`], bounds each call with a deadline and retries transport
//! failures with linear backoff and jitter:
//!
//! ```text
//! delay = base_delay * attempt + random_jitter(0..250ms)
//! ```
//!
//! A call may page through several requests (plus an access-token request),
//! so its deadline is the per-request timeout times that request count.
//! A transient failure on any page retries the whole query.
//!
//! Rejections (bad subreddit, undecodable payload) are not retried. After the
//! last attempt the query fails with [`FetchError::Unavailable`], which the
//! aggregator records without stopping the run.

use crate::config::RetryConfig;
use crate::error::{FetchError, SourceError};
use crate::models::{Query, QueryMode, RawPost};
use crate::sources::PostSource;
use rand::{Rng, rng};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, instrument, warn};

/// Scope listed when a listing query has no scope of its own.
const ALL_SCOPE: &str = "all";

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per query, including the first.
    pub max_attempts: usize,
    /// Delay before the second attempt; grows linearly afterwards.
    pub base_delay: Duration,
    /// Upper bound for a single HTTP request of a source call.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(c: &RetryConfig) -> Self {
        Self {
            max_attempts: c.max_retries.max(1),
            base_delay: Duration::from_secs(c.backoff_secs),
            timeout: Duration::from_secs(c.timeout_secs),
        }
    }
}

pub struct Fetcher<S> {
    source: S,
    policy: RetryPolicy,
}

impl<S: PostSource> Fetcher<S> {
    pub fn new(source: S, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    /// Run `query`, retrying transport failures per the policy.
    #[instrument(level = "info", skip_all, fields(keyword = %query.keyword, scope = ?query.scope))]
    pub async fn fetch(&self, query: &Query) -> Result<Vec<RawPost>, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            let deadline = self.deadline(query.limit);
            let result = match timeout(deadline, self.call(query)).await {
                Ok(r) => r,
                Err(_) => Err(SourceError::Transport(format!("timed out after {deadline:?}"))),
            };

            let err = match result {
                Ok(posts) => {
                    debug!(attempt, count = posts.len(), "Query fetched");
                    return Ok(posts);
                }
                Err(e) if !e.is_transient() => {
                    warn!(error = %e, "Source rejected query; not retrying");
                    return Err(FetchError::Rejected(e));
                }
                Err(e) => e,
            };

            let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
            let elapsed_ms_total = total_t0.elapsed().as_millis();
            if attempt >= self.policy.max_attempts {
                error!(
                    attempt,
                    max = self.policy.max_attempts,
                    elapsed_ms_attempt,
                    elapsed_ms_total,
                    error = %err,
                    "fetch exhausted retries"
                );
                return Err(FetchError::Unavailable {
                    attempts: attempt,
                    last: err,
                });
            }

            let jitter_ms: u64 = rng().random_range(0..=250);
            let delay = self.policy.base_delay.saturating_mul(attempt as u32)
                + Duration::from_millis(jitter_ms);
            warn!(
                attempt,
                max = self.policy.max_attempts,
                elapsed_ms_attempt,
                elapsed_ms_total,
                ?delay,
                error = %err,
                "fetch attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }

    /// Time allowed for one source call: a timeout per page plus one for
    /// the access token.
    fn deadline(&self, limit: usize) -> Duration {
        let pages = limit.div_ceil(self.source.platform().page_size.max(1)).max(1);
        self.policy
            .timeout
            .saturating_mul(u32::try_from(pages + 1).unwrap_or(u32::MAX))
    }

    /// One source call for `query`, without retries.
    async fn call(&self, query: &Query) -> Result<Vec<RawPost>, SourceError> {
        let Query {
            keyword,
            limit,
            sort,
            time_window,
            ..
        } = query;

        match query.mode() {
            QueryMode::Scoped(scope) => {
                self.source
                    .search_scope(scope, keyword, *limit, *sort, *time_window)
                    .await
            }
            QueryMode::Global => {
                self.source
                    .search_global(keyword, *limit, *sort, *time_window)
                    .await
            }
            QueryMode::Listing(scope) => {
                let posts = self
                    .source
                    .list_scope(scope.unwrap_or(ALL_SCOPE), *sort, *time_window, *limit)
                    .await?;
                Ok(posts
                    .into_iter()
                    .filter(|p| mentions(p, keyword))
                    .collect())
            }
        }
    }
}

/// Case-insensitive keyword match against a post's title and body.
fn mentions(post: &RawPost, keyword: &str) -> bool {
    let needle = keyword.to_lowercase();
    [post.title.as_deref(), post.body.as_deref()]
        .into_iter()
        .flatten()
        .any(|text| text.to_lowercase().contains(&needle))
}
