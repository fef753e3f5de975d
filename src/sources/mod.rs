//! Post sources the scraper can search.
//!
//! A source answers three kinds of request, mirroring [`QueryMode`]:
//!
//! | Request | Used for |
//! |---------|----------|
//! | [`PostSource::search_scope`] | keyword search inside one scope |
//! | [`PostSource::search_global`] | keyword search across the whole platform |
//! | [`PostSource::list_scope`] | a scope's own ordering (hot, new, top…) |
//!
//! Sources must report transport failures as [`SourceError::Transport`] so
//! the fetcher can retry them, and return `Ok(vec![])` for "nothing found".
//!
//! [`QueryMode`]: crate::models::QueryMode

use crate::error::SourceError;
use crate::models::{RawPost, SortMode, TimeWindow};
use async_trait::async_trait;

pub mod reddit;

/// Static description of a platform, used to label and link rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    /// Short name used as the first segment of a row's source label.
    pub name: &'static str,
    /// Scope type segment of the label (`r` for subreddits).
    pub scope_prefix: &'static str,
    /// Public base URL that relative permalinks are resolved against.
    pub base_url: &'static str,
    /// Most posts one request returns; larger limits are paged.
    pub page_size: usize,
}

#[async_trait]
pub trait PostSource: Send + Sync {
    fn platform(&self) -> Platform;

    async fn search_scope(
        &self,
        scope: &str,
        keyword: &str,
        limit: usize,
        sort: SortMode,
        window: TimeWindow,
    ) -> Result<Vec<RawPost>, SourceError>;

    async fn search_global(
        &self,
        keyword: &str,
        limit: usize,
        sort: SortMode,
        window: TimeWindow,
    ) -> Result<Vec<RawPost>, SourceError>;

    async fn list_scope(
        &self,
        scope: &str,
        sort: SortMode,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<RawPost>, SourceError>;
}
