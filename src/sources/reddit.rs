//! Reddit post source.
//!
//! Two access paths share one code path:
//!
//! - **App-only OAuth** when a client id and secret are configured: a
//!   client-credentials token is fetched from `/api/v1/access_token` and
//!   requests go to `https://oauth.reddit.com`.
//! - **Anonymous** otherwise: the public `.json` endpoints on
//!   `https://www.reddit.com`, which are more aggressively rate limited.
//!
//! Listings are paged with Reddit's `after` cursor, 100 posts per page at
//! most, until the query's limit is reached or the cursor runs out.

use crate::config::RedditConfig;
use crate::error::SourceError;
use crate::models::{RawPost, SortMode, TimeWindow};
use crate::sources::{Platform, PostSource};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

const PAGE_SIZE: usize = 100;

pub const REDDIT: Platform = Platform {
    name: "reddit",
    scope_prefix: "r",
    base_url: "https://www.reddit.com",
    page_size: PAGE_SIZE,
};

const OAUTH_BASE: &str = "https://oauth.reddit.com";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Child {
    kind: String,
    data: PostData,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: Option<String>,
    title: Option<String>,
    selftext: Option<String>,
    url: Option<String>,
    permalink: Option<String>,
    subreddit: Option<String>,
    created_utc: Option<f64>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: u64,
}

impl From<PostData> for RawPost {
    fn from(p: PostData) -> Self {
        RawPost {
            id: p.id,
            title: p.title,
            body: p.selftext,
            url: p.url,
            permalink: p.permalink,
            scope_name: p.subreddit,
            created_utc: p.created_utc,
            score: p.score,
            comment_count: p.num_comments,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_ttl")]
    expires_in: u64,
}

fn default_token_ttl() -> u64 {
    3600
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditClient {
    http: Client,
    credentials: Option<(String, String)>,
    token: Mutex<Option<AccessToken>>,
}

impl RedditClient {
    /// Build a client; `timeout` bounds every single HTTP request.
    pub fn new(config: &RedditConfig, timeout: Duration) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        let credentials = match (&config.client_id, &config.client_secret) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some((id.clone(), secret.clone()))
            }
            _ => None,
        };
        info!(
            authenticated = credentials.is_some(),
            user_agent = %config.user_agent,
            "Initialized Reddit client"
        );
        Ok(Self {
            http,
            credentials,
            token: Mutex::new(None),
        })
    }

    fn authenticated(&self) -> bool {
        self.credentials.is_some()
    }

    /// Absolute URL for an API path such as `r/sales/search`.
    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, SourceError> {
        let raw = if self.authenticated() {
            format!("{OAUTH_BASE}/{path}")
        } else {
            format!("{}/{path}.json", REDDIT.base_url)
        };
        let mut url = Url::parse(&raw).map_err(|e| SourceError::Parse(e.to_string()))?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .append_pair("raw_json", "1");
        Ok(url)
    }

    /// Current bearer token, fetching a new one when missing or expired.
    async fn bearer(&self) -> Result<Option<String>, SourceError> {
        let Some((id, secret)) = &self.credentials else {
            return Ok(None);
        };
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(Some(token.value.clone()));
            }
        }

        debug!("Requesting Reddit access token");
        let resp = self
            .http
            .post(TOKEN_URL)
            .basic_auth(id, Some(secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let token: TokenResponse = resp.json().await?;
        let value = token.access_token.clone();
        // refresh a minute early so in-flight pages don't race the expiry
        let ttl = Duration::from_secs(token.expires_in.saturating_sub(60));
        *guard = Some(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + ttl,
        });
        Ok(Some(value))
    }

    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get_page(&self, url: Url) -> Result<ListingData, SourceError> {
        let mut req = self.http.get(url);
        if let Some(token) = self.bearer().await? {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if resp.status() == StatusCode::UNAUTHORIZED && self.authenticated() {
            // stale token: forget it and let the retry policy try again
            *self.token.lock().await = None;
        }
        let resp = check_status(resp).await?;
        let listing: Listing = resp.json().await?;
        Ok(listing.data)
    }

    async fn paginate(
        &self,
        path: &str,
        params: Vec<(&'static str, String)>,
        limit: usize,
    ) -> Result<Vec<RawPost>, SourceError> {
        let client = self;
        collect_pages(limit, move |size, after| {
            let mut page_params = params.clone();
            page_params.push(("limit", size.to_string()));
            if let Some(cursor) = after {
                page_params.push(("after", cursor));
            }
            async move {
                let url = client.endpoint(path, &page_params)?;
                client.get_page(url).await
            }
        })
        .await
    }
}

/// Follow the `after` cursor until `limit` posts are collected.
///
/// `fetch_page(size, after)` returns one listing page. Collection stops at
/// `limit`, when the cursor runs out, or on a page that adds no posts.
async fn collect_pages<F, Fut>(limit: usize, mut fetch_page: F) -> Result<Vec<RawPost>, SourceError>
where
    F: FnMut(usize, Option<String>) -> Fut,
    Fut: Future<Output = Result<ListingData, SourceError>>,
{
    let mut posts = Vec::new();
    let mut after: Option<String> = None;

    while posts.len() < limit {
        let page = fetch_page(page_size(posts.len(), limit), after.take()).await?;
        let before = posts.len();
        posts.extend(page_posts(page.children).take(limit - before));
        debug!(page_count = posts.len() - before, total = posts.len(), "Fetched page");

        match page.after {
            Some(next) if posts.len() > before => after = Some(next),
            _ => break,
        }
    }
    Ok(posts)
}

/// Size of the next page request.
fn page_size(collected: usize, limit: usize) -> usize {
    limit.saturating_sub(collected).clamp(1, PAGE_SIZE)
}

/// Posts (kind `t3`) from a listing page; comments and other kinds are dropped.
fn page_posts(children: Vec<Child>) -> impl Iterator<Item = RawPost> {
    children
        .into_iter()
        .filter(|c| c.kind == "t3")
        .map(|c| RawPost::from(c.data))
}

/// Listing endpoints only know a subset of the search orders.
fn listing_sort(sort: SortMode) -> &'static str {
    match sort {
        SortMode::Hot | SortMode::New | SortMode::Top => sort.as_str(),
        SortMode::Relevance | SortMode::Comments => "hot",
    }
}

/// Map a non-success response to a [`SourceError`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = truncate_for_log(&resp.text().await.unwrap_or_default(), 200);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::UNAUTHORIZED
        || status.is_server_error()
    {
        warn!(status = status.as_u16(), "Reddit responded with a retryable status");
        Err(SourceError::Transport(format!("HTTP {status}: {message}")))
    } else {
        Err(SourceError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

fn search_params(keyword: &str, sort: SortMode, window: TimeWindow) -> Vec<(&'static str, String)> {
    vec![
        ("q", keyword.to_string()),
        ("sort", sort.as_str().to_string()),
        ("t", window.as_str().to_string()),
        ("type", "link".to_string()),
    ]
}

#[async_trait]
impl PostSource for RedditClient {
    fn platform(&self) -> Platform {
        REDDIT
    }

    #[instrument(level = "info", skip(self, sort, window), fields(sort = sort.as_str(), t = window.as_str()))]
    async fn search_scope(
        &self,
        scope: &str,
        keyword: &str,
        limit: usize,
        sort: SortMode,
        window: TimeWindow,
    ) -> Result<Vec<RawPost>, SourceError> {
        let mut params = search_params(keyword, sort, window);
        params.push(("restrict_sr", "1".to_string()));
        self.paginate(&format!("r/{scope}/search"), params, limit).await
    }

    #[instrument(level = "info", skip(self, sort, window), fields(sort = sort.as_str(), t = window.as_str()))]
    async fn search_global(
        &self,
        keyword: &str,
        limit: usize,
        sort: SortMode,
        window: TimeWindow,
    ) -> Result<Vec<RawPost>, SourceError> {
        self.paginate("search", search_params(keyword, sort, window), limit)
            .await
    }

    #[instrument(level = "info", skip(self, sort, window), fields(sort = sort.as_str(), t = window.as_str()))]
    async fn list_scope(
        &self,
        scope: &str,
        sort: SortMode,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<RawPost>, SourceError> {
        let path = format!("r/{scope}/{}", listing_sort(sort));
        self.paginate(&path, vec![("t", window.as_str().to_string())], limit)
            .await
    }
}
