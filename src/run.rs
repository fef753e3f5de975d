//! Single-run coordinator.
//!
//! At most one aggregation runs per process. [`RunCoordinator::start`] claims
//! the run flag with an atomic compare-and-swap, spawns the run and returns
//! immediately; a second start while the flag is held is rejected and leaves
//! the published state alone. The flag is released by a guard when the run
//! task ends, however it ends.
//!
//! The coordinator owns the published [`RunState`]. Rows are appended after
//! every finished query so status readers see progress mid-run, and they
//! stay available when the sheet write fails afterwards.

use crate::aggregate::{Aggregator, SearchParams, build_queries};
use crate::error::StartError;
use crate::models::{AggregationRun, NormalizedRow, Query, QueryCount, QueryError};
use crate::sink::TabularSink;
use crate::sink::writer::{BatchPlan, BatchWriter, WriteOutcome};
use crate::sources::PostSource;
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    /// Some batches reached the sheet before a write failed.
    Partial,
    /// The sheet write failed outright. Rows are still published.
    Failed,
}

/// What the API and the CLI see of the latest run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunState {
    pub status: RunStatus,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub results: Vec<NormalizedRow>,
    pub per_query_counts: Vec<QueryCount>,
    pub errors: Vec<QueryError>,
    pub skipped_posts: usize,
    pub rows_written: usize,
    pub sink_error: Option<String>,
}

/// Inputs of one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub keywords: Vec<String>,
    pub scopes: Vec<String>,
    pub params: SearchParams,
}

/// Clears the run flag when dropped.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct RunCoordinator<S> {
    aggregator: Aggregator<S>,
    sink: Option<Arc<dyn TabularSink>>,
    plan: BatchPlan,
    active: Arc<AtomicBool>,
    state: Mutex<RunState>,
}

impl<S: PostSource + 'static> RunCoordinator<S> {
    /// Without a sink, runs only collect and publish rows.
    pub fn new(
        aggregator: Aggregator<S>,
        sink: Option<Arc<dyn TabularSink>>,
        plan: BatchPlan,
    ) -> Self {
        Self {
            aggregator,
            sink,
            plan,
            active: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(RunState::default()),
        }
    }

    pub fn is_scraping(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn with_sentiment(&self) -> bool {
        self.aggregator.with_sentiment()
    }

    pub fn snapshot(&self) -> RunState {
        self.state().clone()
    }

    /// Validate `request`, claim the run flag and spawn the run.
    pub fn start(self: &Arc<Self>, request: RunRequest) -> Result<JoinHandle<()>, StartError> {
        let queries = build_queries(&request.keywords, &request.scopes, request.params)?;
        let guard = self.claim()?;
        self.begin(&queries);
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _guard = guard;
            this.execute(queries).await;
        }))
    }

    /// Run to completion on the current task and return the final state.
    pub async fn run(&self, request: RunRequest) -> Result<RunState, StartError> {
        let queries = build_queries(&request.keywords, &request.scopes, request.params)?;
        let _guard = self.claim()?;
        self.begin(&queries);
        self.execute(queries).await;
        Ok(self.snapshot())
    }

    fn claim(&self) -> Result<RunGuard, StartError> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                warn!("Rejected start; a run is already active");
                StartError::ConcurrentRunRejected
            })?;
        Ok(RunGuard(Arc::clone(&self.active)))
    }

    fn begin(&self, queries: &[Query]) {
        info!(queries = queries.len(), "Run started");
        *self.state() = RunState {
            status: RunStatus::Running,
            started_at: Some(Utc::now().to_rfc3339()),
            ..RunState::default()
        };
    }

    #[instrument(level = "info", skip_all, fields(queries = queries.len()))]
    async fn execute(&self, queries: Vec<Query>) {
        let run = self
            .aggregator
            .run_queries(queries, |progress| self.publish(progress))
            .await;
        self.publish(&run);

        let outcome = match &self.sink {
            Some(sink) => Some(
                BatchWriter::new(sink.as_ref(), self.plan)
                    .write(&run.collected_rows, self.aggregator.with_sentiment())
                    .await,
            ),
            None => None,
        };

        let mut state = self.state();
        state.finished_at = Some(Utc::now().to_rfc3339());
        state.status = match &outcome {
            None | Some(WriteOutcome::Complete { .. }) => RunStatus::Completed,
            Some(WriteOutcome::Partial { .. }) => RunStatus::Partial,
            Some(WriteOutcome::Failed(_)) => RunStatus::Failed,
        };
        if let Some(outcome) = &outcome {
            state.rows_written = outcome.written_rows();
            if let Some(e) = outcome.error() {
                error!(kind = ?e.kind(), error = %e, rows = run.collected_rows.len(), "Run could not be saved to the sheet");
                state.sink_error = Some(e.to_string());
            }
        }
        info!(
            status = ?state.status,
            rows = state.results.len(),
            failed_queries = state.errors.len(),
            "Run finished"
        );
    }

    /// Copy what `run` holds beyond the published state into it.
    fn publish(&self, run: &AggregationRun) {
        let mut state = self.state();
        let known = state.results.len();
        state
            .results
            .extend_from_slice(&run.collected_rows[known.min(run.collected_rows.len())..]);
        state.per_query_counts.clone_from(&run.per_query_counts);
        state.errors.clone_from(&run.errors);
        state.skipped_posts = run.skipped_posts;
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
