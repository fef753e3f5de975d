//! HTTP API over the run coordinator.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/start_scrape` | Start a run in the background |
//! | `GET`  | `/status` | Progress and rows of the latest run |
//! | `GET`  | `/export` | Rows of the latest run, 404 when there are none |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "status": "error", "message": "No keywords provided" }
//! ```
//!
//! `400` for missing input, `404` for an empty export, `409` when a run is
//! already active. Refused starts also carry the error `kind`.

use crate::aggregate::SearchParams;
use crate::config::Config;
use crate::error::{ErrorKind, StartError};
use crate::models::{NormalizedRow, SortMode, TimeWindow, header_row};
use crate::run::{RunCoordinator, RunRequest, RunState};
use crate::sources::PostSource;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, instrument, warn};

/// Values a start request falls back to for anything it leaves out.
#[derive(Debug, Clone)]
pub struct RequestDefaults {
    pub scopes: Vec<String>,
    pub params: SearchParams,
}

impl RequestDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scopes: config.target_subreddits.clone(),
            params: SearchParams {
                limit: config.post_limit,
                sort: config.sort_mode(),
                time_window: config.time_window(),
                strategy: config.search_strategy(),
            },
        }
    }
}

pub struct AppState<S> {
    coordinator: Arc<RunCoordinator<S>>,
    defaults: Arc<RequestDefaults>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
            defaults: Arc::clone(&self.defaults),
        }
    }
}

impl<S> AppState<S> {
    pub fn new(coordinator: Arc<RunCoordinator<S>>, defaults: RequestDefaults) -> Self {
        Self {
            coordinator,
            defaults: Arc::new(defaults),
        }
    }
}

pub fn router<S: PostSource + 'static>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/start_scrape", post(start_scrape::<S>))
        .route("/status", get(status::<S>))
        .route("/export", get(export::<S>))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Bind `bind` and serve the API until the process stops.
#[instrument(level = "info", skip(state))]
pub async fn serve<S: PostSource + 'static>(
    state: AppState<S>,
    bind: &str,
) -> Result<(), Box<dyn Error>> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<ErrorKind>,
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    kind: Option<ErrorKind>,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            kind: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            status: "error",
            message: self.message,
            kind: self.kind,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StartError> for AppError {
    fn from(err: StartError) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::ConcurrentRunRejected => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        };
        warn!(?kind, error = %err, "Start request refused");
        AppError {
            status,
            message: err.to_string(),
            kind: Some(kind),
        }
    }
}

// ============ POST /start_scrape ============

#[derive(Debug, Default, Deserialize)]
pub struct StartScrapeRequest {
    #[serde(default)]
    pub keywords: Vec<String>,
    pub subreddits: Option<Vec<String>>,
    pub post_limit: Option<usize>,
    pub time_filter: Option<String>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartScrapeResponse {
    status: &'static str,
    message: &'static str,
}

async fn start_scrape<S: PostSource + 'static>(
    State(state): State<AppState<S>>,
    Json(body): Json<StartScrapeRequest>,
) -> Result<Json<StartScrapeResponse>, AppError> {
    if body.keywords.iter().all(|k| k.trim().is_empty()) {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "No keywords provided"));
    }

    let defaults = &state.defaults;
    let request = RunRequest {
        keywords: body.keywords,
        scopes: body.subreddits.unwrap_or_else(|| defaults.scopes.clone()),
        params: SearchParams {
            limit: body.post_limit.unwrap_or(defaults.params.limit),
            sort: body
                .sort_by
                .as_deref()
                .map_or(defaults.params.sort, SortMode::parse_or_default),
            time_window: body
                .time_filter
                .as_deref()
                .map_or(defaults.params.time_window, TimeWindow::parse_or_default),
            strategy: defaults.params.strategy,
        },
    };
    info!(
        keywords = request.keywords.len(),
        scopes = request.scopes.len(),
        limit = request.params.limit,
        "Start requested over HTTP"
    );

    // detached: progress is read back through /status
    state.coordinator.start(request)?;
    Ok(Json(StartScrapeResponse {
        status: "success",
        message: "Scraping process started",
    }))
}

// ============ GET /status ============

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    is_scraping: bool,
    result_count: usize,
    header: Vec<String>,
    #[serde(flatten)]
    run: RunState,
}

async fn status<S: PostSource + 'static>(State(state): State<AppState<S>>) -> Json<StatusResponse> {
    let run = state.coordinator.snapshot();
    Json(StatusResponse {
        is_scraping: state.coordinator.is_scraping(),
        result_count: run.results.len(),
        header: header_row(state.coordinator.with_sentiment()),
        run,
    })
}

// ============ GET /export ============

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    status: &'static str,
    header: Vec<String>,
    data: Vec<NormalizedRow>,
}

async fn export<S: PostSource + 'static>(
    State(state): State<AppState<S>>,
) -> Result<Json<ExportResponse>, AppError> {
    let run = state.coordinator.snapshot();
    if run.results.is_empty() {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            "No data available for export",
        ));
    }
    Ok(Json(ExportResponse {
        status: "success",
        header: header_row(state.coordinator.with_sentiment()),
        data: run.results,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregator;
    use crate::fetcher::{Fetcher, RetryPolicy};
    use crate::models::Strategy;
    use crate::normalize::Normalizer;
    use crate::run::RunStatus;
    use crate::sink::writer::BatchPlan;
    use crate::sources::mock::{MockSource, Step, post};
    use crate::sources::reddit::REDDIT;
    use std::time::Duration;

    fn state(source: MockSource) -> AppState<MockSource> {
        let aggregator = Aggregator::new(
            Fetcher::new(source, RetryPolicy::default()),
            Normalizer::new(REDDIT, false),
            1,
        );
        let coordinator = Arc::new(RunCoordinator::new(aggregator, None, BatchPlan::default()));
        AppState::new(
            coordinator,
            RequestDefaults {
                scopes: vec![],
                params: SearchParams {
                    limit: 50,
                    sort: SortMode::Relevance,
                    time_window: TimeWindow::Month,
                    strategy: Strategy::Search,
                },
            },
        )
    }

    fn body(keywords: &[&str]) -> Json<StartScrapeRequest> {
        Json(StartScrapeRequest {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            ..StartScrapeRequest::default()
        })
    }

    async fn wait_idle(state: &AppState<MockSource>) {
        while state.coordinator.is_scraping() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test]
    async fn test_start_without_keywords_is_bad_request() {
        let state = state(MockSource::new());
        let err = start_scrape(State(state.clone()), body(&[" ", ""]))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "No keywords provided");
        assert!(!state.coordinator.is_scraping());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_then_status_then_export() {
        let source = MockSource::new().on(
            "search:all:crm",
            Step::Posts(vec![post("a", "looking for a crm"), post("b", "")]),
        );
        let state = state(source);

        let Json(started) = start_scrape(State(state.clone()), body(&["crm"]))
            .await
            .unwrap();
        assert_eq!(started.status, "success");
        assert_eq!(started.message, "Scraping process started");

        wait_idle(&state).await;

        let Json(snapshot) = status(State(state.clone())).await;
        assert!(!snapshot.is_scraping);
        assert_eq!(snapshot.result_count, 2);
        assert_eq!(snapshot.run.status, RunStatus::Completed);

        let Json(exported) = export(State(state.clone())).await.unwrap();
        assert_eq!(exported.status, "success");
        assert_eq!(exported.data.len(), 2);
        assert_eq!(exported.header.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_start_is_conflict() {
        let source = MockSource::new().on(
            "search:all:crm",
            Step::Delay(Duration::from_secs(5), vec![post("a", "")]),
        );
        let state = state(source);

        let Json(started) = start_scrape(State(state.clone()), body(&["crm"]))
            .await
            .unwrap();
        assert_eq!(started.status, "success");
        let err = start_scrape(State(state.clone()), body(&["other"]))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.kind, Some(ErrorKind::ConcurrentRunRejected));
        assert_eq!(err.message, "A scraping operation is already in progress");

        let Json(snapshot) = status(State(state.clone())).await;
        assert!(snapshot.is_scraping);
        assert_eq!(snapshot.result_count, 0);
        wait_idle(&state).await;
    }

    #[tokio::test]
    async fn test_export_without_data_is_not_found() {
        let state = state(MockSource::new());
        let err = export(State(state)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let Json(health) = health().await;
        assert_eq!(health.status, "ok");
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_request_body_defaults() {
        let body: StartScrapeRequest =
            serde_json::from_str(r#"{"keywords":["crm"],"time_filter":"week"}"#).unwrap();
        assert_eq!(body.keywords, vec!["crm"]);
        assert!(body.subreddits.is_none());
        assert_eq!(body.time_filter.as_deref(), Some("week"));
    }

    #[test]
    fn test_error_body_shape() {
        let resp = AppError::from(StartError::ConcurrentRunRejected).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_start_errors_map_to_status_and_kind() {
        let err = AppError::from(StartError::InvalidQuery("post limit must be positive".into()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, Some(ErrorKind::InvalidQuery));

        let err = AppError::from(StartError::ConcurrentRunRejected);
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.kind, Some(ErrorKind::ConcurrentRunRejected));
    }
}
