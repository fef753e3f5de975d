//! Error types for every stage of the lead pipeline.
//!
//! Errors are split by boundary so that each layer can decide what it
//! contains and what it propagates:
//!
//! - [`SourceError`]: one call against the post source failed
//! - [`FetchError`]: a whole query failed after the retry policy ran out
//! - [`NormalizeError`]: a raw post could not be turned into a row
//! - [`SinkError`]: the spreadsheet rejected or failed a write
//! - [`StartError`]: a run could not be started
//!
//! [`ErrorKind`] is the flat, serialisable classification recorded on an
//! aggregation run and reported through the HTTP API.

use serde::Serialize;
use thiserror::Error;

/// Classification of a failure, as recorded on a run and shown to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuery,
    SourceUnavailable,
    SourceRejected,
    MalformedPost,
    SinkAuthExpired,
    SinkWriteFailed,
    ConcurrentRunRejected,
}

/// A single call against the post source failed.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Connection, timeout, throttling or server-side failure. Worth retrying.
    #[error("transport error: {0}")]
    Transport(String),

    /// The source answered but refused the request.
    #[error("source rejected request (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("could not decode source response: {0}")]
    Parse(String),
}

impl SourceError {
    /// Only transport failures go through the retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transport(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SourceError::Parse(err.to_string())
        } else {
            SourceError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Parse(err.to_string())
    }
}

/// A query produced no results because the source could not serve it.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("source unavailable after {attempts} attempts: {last}")]
    Unavailable { attempts: usize, last: SourceError },

    #[error("{0}")]
    Rejected(SourceError),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Unavailable { .. } => ErrorKind::SourceUnavailable,
            FetchError::Rejected(_) => ErrorKind::SourceRejected,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("post {id} is missing required field `{field}`")]
    MalformedPost { id: String, field: &'static str },
}

impl NormalizeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::MalformedPost
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    /// 401 from the sheet API; the caller may refresh credentials once.
    #[error("sink credentials expired: {0}")]
    Unauthorized(String),

    #[error("sink write failed: {0}")]
    Write(String),

    #[error("sink credentials unusable: {0}")]
    Credentials(String),
}

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Unauthorized(_) => ErrorKind::SinkAuthExpired,
            SinkError::Write(_) | SinkError::Credentials(_) => ErrorKind::SinkWriteFailed,
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Write(err.to_string())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("A scraping operation is already in progress")]
    ConcurrentRunRejected,
}

impl StartError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StartError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            StartError::ConcurrentRunRejected => ErrorKind::ConcurrentRunRejected,
        }
    }
}
