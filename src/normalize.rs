//! Turns raw source posts into sheet rows.

use crate::error::NormalizeError;
use crate::models::{Engagement, NormalizedRow, RawPost};
use crate::sentiment;
use crate::sources::Platform;
use chrono::DateTime;

/// Bodies longer than this many characters are cut and suffixed with `...`.
pub const EXCERPT_CHARS: usize = 500;

/// Timestamps are rendered in UTC with this layout.
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct Normalizer {
    platform: Platform,
    with_sentiment: bool,
}

impl Normalizer {
    pub fn new(platform: Platform, with_sentiment: bool) -> Self {
        Self {
            platform,
            with_sentiment,
        }
    }

    pub fn with_sentiment(&self) -> bool {
        self.with_sentiment
    }

    /// Build the row for `raw`, found by searching `keyword` (in `scope`, if any).
    ///
    /// The post's own scope name wins over the query scope for the source
    /// label, so global searches still say where a post came from.
    pub fn normalize(
        &self,
        raw: RawPost,
        keyword: &str,
        scope: Option<&str>,
    ) -> Result<NormalizedRow, NormalizeError> {
        let id = raw.id.clone().unwrap_or_else(|| "<unknown>".to_string());
        let missing = |field| NormalizeError::MalformedPost {
            id: id.clone(),
            field,
        };

        let title = raw.title.ok_or_else(|| missing("title"))?;
        let created = raw.created_utc.ok_or_else(|| missing("created_utc"))?;
        let link = self
            .link(raw.url.as_deref(), raw.permalink.as_deref())
            .ok_or_else(|| missing("url"))?;
        let human_date = DateTime::from_timestamp(created as i64, 0)
            .ok_or_else(|| missing("created_utc"))?
            .format(DATE_FORMAT)
            .to_string();

        let body = raw.body.unwrap_or_default();
        let source_label = match raw.scope_name.as_deref().or(scope) {
            Some(name) if !name.is_empty() => format!(
                "{}/{}/{}",
                self.platform.name, self.platform.scope_prefix, name
            ),
            _ => self.platform.name.to_string(),
        };

        let engagement = self.with_sentiment.then(|| Engagement {
            sentiment: sentiment::score(&format!("{title} {body}")),
            upvotes: raw.score,
            comments: raw.comment_count,
        });

        Ok(NormalizedRow {
            title,
            body_excerpt: excerpt(&body),
            link,
            source_label,
            human_date,
            keyword: keyword.to_string(),
            engagement,
        })
    }

    /// Prefer an absolute URL; otherwise resolve the permalink against the platform.
    fn link(&self, url: Option<&str>, permalink: Option<&str>) -> Option<String> {
        let absolute = |s: &str| s.starts_with("http://") || s.starts_with("https://");
        match (url.filter(|u| !u.is_empty()), permalink.filter(|p| !p.is_empty())) {
            (Some(u), _) if absolute(u) => Some(u.to_string()),
            (_, Some(p)) if absolute(p) => Some(p.to_string()),
            (_, Some(p)) => Some(self.resolve(p)),
            (Some(u), None) => Some(self.resolve(u)),
            (None, None) => None,
        }
    }

    fn resolve(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.platform.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// First [`EXCERPT_CHARS`] characters of `body`, plus `...` when cut.
pub fn excerpt(body: &str) -> String {
    match body.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
