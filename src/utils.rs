//! Small helpers shared across the pipeline.
//!
//! - Scope name cleanup for user-supplied subreddit names
//! - String truncation for log lines
//! - File system validation for output directories

use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};

static SCOPE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://(?:www\.)?reddit\.com)?/?(?:r/)?").expect("static regex")
});

/// Clean a user-supplied scope name.
///
/// Accepts the forms people paste (`sales`, `r/sales`, `/r/sales/`,
/// `https://www.reddit.com/r/sales`) and returns the bare name, or `None`
/// when nothing is left.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(normalize_scope(" r/sales "), Some("sales".to_string()));
/// assert_eq!(normalize_scope("  "), None);
/// ```
pub fn normalize_scope(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let name = SCOPE_PREFIX.replace(trimmed, "");
    let name = name.trim_matches('/').trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Truncate a string for logging purposes.
///
/// Long strings are cut to `max` characters with an ellipsis and byte count
/// indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if it doesn't exist, then performs a write test by
/// creating and immediately deleting a probe file.
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    // a small sync write gives a simpler error surface
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    match stdfs::File::create(&probe_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&probe_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_scope() {
        assert_eq!(normalize_scope("sales"), Some("sales".to_string()));
        assert_eq!(normalize_scope(" r/sales "), Some("sales".to_string()));
        assert_eq!(normalize_scope("/r/smallbusiness/"), Some("smallbusiness".to_string()));
        assert_eq!(
            normalize_scope("https://www.reddit.com/r/startups"),
            Some("startups".to_string())
        );
        assert_eq!(normalize_scope(""), None);
        assert_eq!(normalize_scope("  r/ "), None);
    }

    #[test]
    fn test_truncate_for_log_short_string() {
        let s = "Hello, world!";
        assert_eq!(truncate_for_log(s, 100), "Hello, world!");
    }

    #[test]
    fn test_truncate_for_log_long_string() {
        let s = "a".repeat(500);
        let result = truncate_for_log(&s, 100);
        assert!(result.starts_with(&"a".repeat(100)));
        assert!(result.contains("…(+400 bytes)"));
    }

    #[tokio::test]
    async fn test_ensure_writable_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        ensure_writable_dir(nested.to_str().unwrap()).await.unwrap();
        assert!(nested.is_dir());
    }
}
